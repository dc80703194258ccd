mod atomic;
mod error;
mod locks;
mod rclone;
mod repair;
mod store;

use std::sync::Arc;

pub use atomic::{temp_name, AtomicJsonStore, UpdateOptions};
pub use error::{StoreError, StoreResult};
pub use locks::{LockTable, ResourceGuard};
pub use rclone::RcloneStore;
pub use repair::{
    backup_name, count_entries, recover_document, DocumentStatus, Recovery, RepairReport,
    RepairStrategy, StatusReport,
};
pub use store::{LocalDirStore, RemoteEntry, RemoteStore};

use crate::config::TvchanConfig;
use crate::exec::CommandExecutor;

/// Backend for state documents: the rclone state remote when enabled,
/// otherwise the local state directory.
pub fn state_backend(
    config: &TvchanConfig,
    executor: Option<Arc<dyn CommandExecutor>>,
) -> StoreResult<Arc<dyn RemoteStore>> {
    if config.remote.enabled {
        let store = RcloneStore::new(
            config.remote.rclone_binary.clone(),
            config.remote.state_remote.as_deref(),
            executor,
        )?;
        Ok(Arc::new(store))
    } else {
        Ok(Arc::new(LocalDirStore::new(&config.store.local_dir)))
    }
}

/// Backend listing the video library: the rclone media remote when enabled,
/// otherwise `store.media_dir`.
pub fn media_backend(
    config: &TvchanConfig,
    executor: Option<Arc<dyn CommandExecutor>>,
) -> StoreResult<Arc<dyn RemoteStore>> {
    if !config.remote.enabled {
        let dir = config.store.media_dir.as_deref().ok_or_else(|| {
            StoreError::NotConfigured(
                "neither remote.media_remote nor store.media_dir is set".into(),
            )
        })?;
        return Ok(Arc::new(LocalDirStore::new(config.resolve_path(dir))));
    }
    let store = RcloneStore::new(
        config.remote.rclone_binary.clone(),
        config.remote.media_remote.as_deref(),
        executor,
    )?;
    Ok(Arc::new(store))
}

/// Atomic store over the configured state backend with configured timeouts.
pub fn state_store(
    config: &TvchanConfig,
    executor: Option<Arc<dyn CommandExecutor>>,
) -> StoreResult<AtomicJsonStore> {
    let backend = state_backend(config, executor)?;
    Ok(AtomicJsonStore::new(backend)
        .with_operation_timeout(config.store.operation_timeout())
        .with_list_timeout(config.store.list_timeout()))
}
