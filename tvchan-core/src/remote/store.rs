use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use walkdir::WalkDir;

use super::error::{StoreError, StoreResult};

/// A file as reported by a backend listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub rel_path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Object store with whole-object operations only. No transactions, no
/// locking; `rename` replaces the target.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human readable location of `name`, e.g. `remote:state/channels.json`.
    fn location(&self, name: &str) -> String;

    async fn download(&self, name: &str) -> StoreResult<Vec<u8>>;

    async fn upload(&self, name: &str, bytes: &[u8]) -> StoreResult<()>;

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;

    async fn delete(&self, name: &str) -> StoreResult<()>;

    /// Recursive file listing under `prefix` (empty for the whole store).
    async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteEntry>>;
}

/// Directory-backed store. Local schedules run through the same atomic
/// protocol as remote ones.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if name.trim().is_empty() || escapes {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn map_io(name: &str, path: &Path, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound {
            name: name.to_string(),
        }
    } else {
        StoreError::io(path, err)
    }
}

#[async_trait]
impl RemoteStore for LocalDirStore {
    fn location(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }

    async fn download(&self, name: &str) -> StoreResult<Vec<u8>> {
        let path = self.resolve(name)?;
        fs::read(&path).await.map_err(|err| map_io(name, &path, err))
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|err| StoreError::io(&path, err))
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        fs::rename(&source, &target)
            .await
            .map_err(|err| map_io(from, &source, err))
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| map_io(name, &path, err))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteEntry>> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?
        };
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_files(&root, &base))
            .await
            .map_err(|err| StoreError::io(&self.root, std::io::Error::other(err)))?
    }
}

fn walk_files(root: &Path, base: &Path) -> StoreResult<Vec<RemoteEntry>> {
    if !base.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let walker = WalkDir::new(base)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(base).to_path_buf();
            StoreError::io(path, std::io::Error::other(err))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| StoreError::io(entry.path(), std::io::Error::other(err)))?;
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|err| StoreError::io(entry.path(), err))?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(RemoteEntry {
            rel_path,
            size: metadata.len(),
            modified_at,
        });
    }
    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trip_and_rename() {
        let temp = tempdir().unwrap();
        let store = LocalDirStore::new(temp.path());
        store.upload("state/.tmp", b"{}").await.unwrap();
        store.rename("state/.tmp", "state/doc.json").await.unwrap();
        assert_eq!(store.download("state/doc.json").await.unwrap(), b"{}");
        assert!(store.download("state/.tmp").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listing_skips_hidden_entries() {
        let temp = tempdir().unwrap();
        let store = LocalDirStore::new(temp.path());
        store.upload("shows/a.mp4", b"aaaa").await.unwrap();
        store.upload("shows/.partial", b"x").await.unwrap();
        store.upload(".cache/b.mp4", b"b").await.unwrap();
        let listing = store.list("").await.unwrap();
        let paths: Vec<_> = listing.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["shows/a.mp4"]);
        assert_eq!(listing[0].size, 4);
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let temp = tempdir().unwrap();
        let store = LocalDirStore::new(temp.path());
        assert!(matches!(
            store.download("../etc/passwd").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.upload("/abs.json", b"{}").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(store.delete("absent.json").await.unwrap_err().is_not_found());
    }
}
