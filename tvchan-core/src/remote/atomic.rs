use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::locks::LockTable;
use super::repair::recover_document;
use super::store::{RemoteEntry, RemoteStore};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// How `atomic_update` treats a document it cannot use as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Fail with `NotFound` instead of seeding from the default.
    pub require_existing: bool,
    /// Abort on read errors instead of seeding from the default.
    pub require_existing_on_error: bool,
    /// Top-level key a repaired document must still contain. Without it a
    /// corrupted document is handled like a read error.
    pub repair_key: Option<String>,
}

impl UpdateOptions {
    /// Read errors abort the update.
    pub fn safe() -> Self {
        Self {
            require_existing_on_error: true,
            ..Self::default()
        }
    }

    /// Read errors fall back to the default value.
    pub fn legacy() -> Self {
        Self::default()
    }

    pub fn require_existing(mut self) -> Self {
        self.require_existing = true;
        self
    }

    pub fn repair_with(mut self, key: impl Into<String>) -> Self {
        self.repair_key = Some(key.into());
        self
    }
}

pub(crate) enum ReadOutcome {
    Found(Vec<u8>),
    NotFound,
    Failed(StoreError),
}

/// Read-modify-write over a [`RemoteStore`], serialized per document name
/// within this instance. Writes go to a hidden temp object and are renamed
/// into place.
pub struct AtomicJsonStore {
    backend: Arc<dyn RemoteStore>,
    locks: Arc<LockTable>,
    operation_timeout: Duration,
    list_timeout: Duration,
}

impl std::fmt::Debug for AtomicJsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicJsonStore")
            .field("operation_timeout", &self.operation_timeout)
            .field("list_timeout", &self.list_timeout)
            .finish()
    }
}

impl AtomicJsonStore {
    pub fn new(backend: Arc<dyn RemoteStore>) -> Self {
        Self {
            backend,
            locks: LockTable::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, limit: Duration) -> Self {
        self.operation_timeout = limit;
        self
    }

    pub fn with_list_timeout(mut self, limit: Duration) -> Self {
        self.list_timeout = limit;
        self
    }

    pub fn with_lock_table(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn backend(&self) -> &Arc<dyn RemoteStore> {
        &self.backend
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn location(&self, name: &str) -> String {
        self.backend.location(name)
    }

    /// Reads `name`; a missing document yields `default`, anything else
    /// unreadable is an error.
    pub async fn read<T>(&self, name: &str, default: T) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let _guard = self.locks.acquire(name).await;
        match self.fetch(name).await {
            ReadOutcome::Found(bytes) => {
                serde_json::from_slice(&bytes).map_err(|err| StoreError::Corrupted {
                    name: name.to_string(),
                    message: err.to_string(),
                })
            }
            ReadOutcome::NotFound => Ok(default),
            ReadOutcome::Failed(err) => Err(err),
        }
    }

    /// Replaces `name` with `value` and returns its location.
    pub async fn write<T>(&self, name: &str, value: &T) -> StoreResult<String>
    where
        T: Serialize + ?Sized,
    {
        let _guard = self.locks.acquire(name).await;
        self.write_unlocked(name, value).await
    }

    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<RemoteEntry>> {
        self.call_with(
            "list",
            prefix,
            self.list_timeout,
            self.backend.list(prefix),
        )
        .await
    }

    /// Applies `modifier` to the current document under the resource lock
    /// and writes the result back. Nothing is written when the modifier
    /// fails.
    pub async fn atomic_update<T, F, E>(
        &self,
        name: &str,
        default: T,
        options: &UpdateOptions,
        modifier: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(T) -> Result<T, E> + Send,
        E: From<StoreError>,
    {
        let _guard = self.locks.acquire(name).await;
        let current = self.load_for_update(name, default, options).await?;
        let updated = modifier(current)?;
        self.write_unlocked(name, &updated).await?;
        Ok(updated)
    }

    async fn load_for_update<T>(
        &self,
        name: &str,
        default: T,
        options: &UpdateOptions,
    ) -> StoreResult<T>
    where
        T: DeserializeOwned + Send,
    {
        match self.fetch(name).await {
            ReadOutcome::Found(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => Ok(value),
                Err(err) => {
                    self.recover_for_update(name, &bytes, err, default, options)
                        .await
                }
            },
            ReadOutcome::NotFound if options.require_existing => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            ReadOutcome::NotFound => Ok(default),
            ReadOutcome::Failed(err) => fallback_on_error(name, err, default, options),
        }
    }

    async fn recover_for_update<T>(
        &self,
        name: &str,
        bytes: &[u8],
        parse_error: serde_json::Error,
        default: T,
        options: &UpdateOptions,
    ) -> StoreResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let corrupted = StoreError::Corrupted {
            name: name.to_string(),
            message: parse_error.to_string(),
        };
        let syntactically_valid = serde_json::from_slice::<Value>(bytes).is_ok();
        let key = match (&options.repair_key, syntactically_valid) {
            (Some(key), false) => key,
            // valid JSON with the wrong shape is not something repair can fix
            _ => return fallback_on_error(name, corrupted, default, options),
        };

        warn!(document = %name, error = %parse_error, "document is corrupted, attempting repair");
        let (backup, _) = self.backup_corrupted(name, bytes).await?;
        let recovered = recover_document(bytes, key).and_then(|recovery| {
            let strategy = recovery.strategy;
            serde_json::from_value::<T>(recovery.value)
                .ok()
                .map(|value| (value, strategy))
        });
        match recovered {
            Some((value, strategy)) => {
                warn!(
                    document = %name,
                    backup = %backup,
                    strategy = strategy.name(),
                    "recovered corrupted document before update"
                );
                Ok(value)
            }
            None => fallback_on_error(name, corrupted, default, options),
        }
    }

    pub(crate) async fn fetch(&self, name: &str) -> ReadOutcome {
        match self.call("download", name, self.backend.download(name)).await {
            Ok(bytes) => ReadOutcome::Found(bytes),
            Err(StoreError::NotFound { .. }) => ReadOutcome::NotFound,
            Err(err) => ReadOutcome::Failed(err),
        }
    }

    pub(crate) async fn write_unlocked<T>(&self, name: &str, value: &T) -> StoreResult<String>
    where
        T: Serialize + ?Sized,
    {
        let serialization = |err: serde_json::Error| StoreError::Serialization {
            name: name.to_string(),
            message: err.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(value).map_err(serialization)?;
        serde_json::from_slice::<Value>(&bytes).map_err(serialization)?;

        let temp = temp_name(name);
        if let Err(err) = self
            .call("upload", &temp, self.backend.upload(&temp, &bytes))
            .await
        {
            self.discard_temp(&temp).await;
            return Err(err);
        }
        if let Err(err) = self
            .call("rename", name, self.backend.rename(&temp, name))
            .await
        {
            self.discard_temp(&temp).await;
            return Err(err);
        }
        debug!(document = %name, bytes = bytes.len(), "document written");
        Ok(self.backend.location(name))
    }

    async fn discard_temp(&self, temp: &str) {
        match self.call("delete", temp, self.backend.delete(temp)).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(err) => {
                warn!(temp = %temp, error = %err, "failed to remove temporary object");
            }
        }
    }

    pub(crate) async fn call<T, Fut>(
        &self,
        operation: &'static str,
        name: &str,
        future: Fut,
    ) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        self.call_with(operation, name, self.operation_timeout, future)
            .await
    }

    async fn call_with<T, Fut>(
        &self,
        operation: &'static str,
        name: &str,
        limit: Duration,
        future: Fut,
    ) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        match timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                name: name.to_string(),
                timeout: limit,
            }),
        }
    }
}

fn fallback_on_error<T>(
    name: &str,
    err: StoreError,
    default: T,
    options: &UpdateOptions,
) -> StoreResult<T> {
    if options.require_existing_on_error {
        return Err(err);
    }
    warn!(
        document = %name,
        error = %err,
        kind = %err.kind(),
        "LEGACY MODE: document unreadable, continuing from the default value; existing content will be overwritten"
    );
    Ok(default)
}

/// Hidden sibling of `name`: `.<file>.tmp-<epoch-ms>-<8 hex>`.
pub fn temp_name(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let stamp = Utc::now().timestamp_millis();
    match name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/.{file}.tmp-{stamp}-{}", &suffix[..8]),
        None => format!(".{name}.tmp-{stamp}-{}", &suffix[..8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_names_are_hidden_siblings() {
        let flat = temp_name("channels.json");
        assert!(flat.starts_with(".channels.json.tmp-"));
        let nested = temp_name("state/channels.json");
        assert!(nested.starts_with("state/.channels.json.tmp-"));
        let hex = nested.rsplit('-').next().unwrap();
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(temp_name("a"), temp_name("a"));
    }

    #[test]
    fn option_presets() {
        let safe = UpdateOptions::safe().repair_with("channels");
        assert!(safe.require_existing_on_error);
        assert!(!safe.require_existing);
        assert_eq!(safe.repair_key.as_deref(), Some("channels"));
        assert!(!UpdateOptions::legacy().require_existing_on_error);
    }
}
