use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::error::{StoreError, StoreResult};
use super::store::{validate_name, RemoteEntry, RemoteStore};
use crate::exec::{describe_command, CommandExecutor, SystemCommandExecutor};

/// rclone exits with 3 (directory not found) or 4 (file not found).
const EXIT_DIR_NOT_FOUND: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;

/// Backend that drives an rclone remote (`name:path`) through the CLI.
pub struct RcloneStore {
    binary: String,
    remote: String,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for RcloneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcloneStore")
            .field("binary", &self.binary)
            .field("remote", &self.remote)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonEntry {
    path: String,
    size: i64,
    mod_time: DateTime<Utc>,
    #[serde(default)]
    is_dir: bool,
}

impl RcloneStore {
    pub fn new(
        binary: impl Into<String>,
        remote: Option<&str>,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> StoreResult<Self> {
        let remote = remote
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| StoreError::NotConfigured("no rclone remote configured".into()))?;
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Ok(Self {
            binary: binary.into(),
            remote: remote.to_string(),
            executor,
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn target(&self, name: &str) -> String {
        if name.is_empty() {
            return self.remote.clone();
        }
        if self.remote.ends_with(':') || self.remote.ends_with('/') {
            format!("{}{}", self.remote, name)
        } else {
            format!("{}/{}", self.remote, name)
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        name: &str,
        args: &[String],
    ) -> StoreResult<Vec<u8>> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        let rendered = describe_command(&command);
        debug!(command = %rendered, "running rclone");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| StoreError::Transient {
                operation,
                name: name.to_string(),
                message: err.to_string(),
            })?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code();
        if matches!(code, Some(EXIT_DIR_NOT_FOUND | EXIT_FILE_NOT_FOUND))
            || reports_missing_object(&stderr)
        {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        Err(StoreError::CommandFailure {
            command: rendered,
            status: code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr,
        })
    }
}

/// True when an error line names a missing object. Informational lines such
/// as `NOTICE: Config file ... not found` never count.
fn reports_missing_object(stderr: &str) -> bool {
    stderr
        .lines()
        .filter(|line| !line.contains("NOTICE") && !line.contains("INFO"))
        .any(|line| line.contains("object not found") || line.contains("directory not found"))
}

#[async_trait]
impl RemoteStore for RcloneStore {
    fn location(&self, name: &str) -> String {
        self.target(name)
    }

    async fn download(&self, name: &str) -> StoreResult<Vec<u8>> {
        validate_name(name)?;
        self.run("download", name, &["cat".into(), self.target(name)])
            .await
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        validate_name(name)?;
        let staging = tempfile::NamedTempFile::new().map_err(|err| StoreError::Transient {
            operation: "upload",
            name: name.to_string(),
            message: err.to_string(),
        })?;
        tokio::fs::write(staging.path(), bytes)
            .await
            .map_err(|err| StoreError::io(staging.path(), err))?;
        let source = staging.path().to_string_lossy().into_owned();
        self.run("upload", name, &["copyto".into(), source, self.target(name)])
            .await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        self.run(
            "rename",
            from,
            &["moveto".into(), self.target(from), self.target(to)],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        self.run("delete", name, &["deletefile".into(), self.target(name)])
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteEntry>> {
        if !prefix.is_empty() {
            validate_name(prefix)?;
        }
        let stdout = match self
            .run(
                "list",
                prefix,
                &[
                    "lsjson".into(),
                    "-R".into(),
                    "--files-only".into(),
                    self.target(prefix),
                ],
            )
            .await
        {
            Ok(stdout) => stdout,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let parsed: Vec<LsJsonEntry> = serde_json::from_slice(&stdout)?;
        let base = prefix.trim_end_matches('/');
        let mut entries: Vec<RemoteEntry> = parsed
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter(|entry| !entry.path.split('/').any(|part| part.starts_with('.')))
            .map(|entry| RemoteEntry {
                rel_path: if base.is_empty() {
                    entry.path
                } else {
                    format!("{base}/{}", entry.path)
                },
                size: entry.size.max(0) as u64,
                modified_at: entry.mod_time,
            })
            .collect();
        entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(entries)
    }
}
