use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-document async mutexes. Waiters are served in FIFO order (tokio's
/// mutex is fair) and an entry disappears once nobody holds or waits on it.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn acquire(self: &Arc<Self>, resource: &str) -> ResourceGuard {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries
                .entry(resource.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.clone().lock_owned().await;
        ResourceGuard {
            table: Arc::clone(self),
            resource: resource.to_string(),
            entry,
            guard: Some(guard),
        }
    }

    /// Names with a live lock entry (held or awaited).
    pub fn active_resources(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    fn release(&self, resource: &str, entry: &Arc<AsyncMutex<()>>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one in the releasing guard
        if Arc::strong_count(entry) == 2 {
            if let Some(current) = entries.get(resource) {
                if Arc::ptr_eq(current, entry) {
                    entries.remove(resource);
                }
            }
        }
    }
}

pub struct ResourceGuard {
    table: Arc<LockTable>,
    resource: String,
    entry: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ResourceGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.resource)
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        // the owned guard holds its own Arc; drop it before counting
        self.guard.take();
        self.table.release(&self.resource, &self.entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let table = LockTable::new();
        {
            let guard = table.acquire("channels.json").await;
            assert_eq!(guard.resource(), "channels.json");
            assert_eq!(table.active_resources(), vec!["channels.json".to_string()]);
        }
        assert!(table.active_resources().is_empty());
    }

    #[tokio::test]
    async fn waiters_keep_the_entry_alive() {
        let table = LockTable::new();
        let first = table.acquire("doc").await;
        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let _guard = table.acquire("doc").await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        assert_eq!(table.active_resources(), vec!["doc".to_string()]);
        waiter.await.unwrap();
        assert!(table.active_resources().is_empty());
    }

    #[tokio::test]
    async fn distinct_resources_do_not_block() {
        let table = LockTable::new();
        let _a = table.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), table.acquire("b")).await;
        assert!(b.is_ok());
    }
}
