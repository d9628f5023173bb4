//! In-process key-value store
//!
//! Versions come from one global modification index, like etcd's. Useful for
//! tests and for single-process deployments.

use crate::store::{
    KeyValueStore, StoreAction, StoreEvent, StoreEventStream, VersionedValue, WriteCondition,
};
use crate::{CoreError, Result};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 256;

pub struct MemoryStore {
    entries: RwLock<HashMap<String, VersionedValue>>,
    directories: RwLock<HashSet<String>>,
    index: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: RwLock::new(HashMap::new()),
            directories: RwLock::new(HashSet::new()),
            index: AtomicU64::new(0),
            events,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a key currently exists
    pub async fn contains(&self, path: &str) -> bool {
        self.entries.read().await.contains_key(path)
    }

    pub async fn is_directory(&self, path: &str) -> bool {
        self.directories.read().await.contains(path)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::StoreUnavailable("memory store is offline".to_string()))
        }
    }

    fn next_version(&self) -> u64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn condition_holds(current: Option<&VersionedValue>, condition: WriteCondition) -> bool {
    match (condition, current) {
        (WriteCondition::Always, _) => true,
        (WriteCondition::Absent, existing) => existing.is_none(),
        (WriteCondition::Version(v), Some(existing)) => existing.version == v,
        (WriteCondition::Version(_), None) => false,
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<VersionedValue>> {
        self.check_available()?;
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: &str, condition: WriteCondition) -> Result<u64> {
        self.check_available()?;

        let mut entries = self.entries.write().await;
        if !condition_holds(entries.get(path), condition) {
            return Err(CoreError::Conflict(path.to_string()));
        }

        let version = self.next_version();
        entries.insert(
            path.to_string(),
            VersionedValue {
                value: value.to_string(),
                version,
            },
        );
        drop(entries);

        debug!("memory store: set {} @{}", path, version);
        self.publish(StoreEvent {
            path: path.to_string(),
            action: StoreAction::Set,
            value: Some(value.to_string()),
            version,
        });
        Ok(version)
    }

    async fn delete(&self, path: &str, condition: WriteCondition) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.write().await;
        match entries.get(path) {
            None if matches!(condition, WriteCondition::Version(_)) => {
                return Err(CoreError::Conflict(path.to_string()));
            }
            None => return Ok(()),
            Some(current) if !condition_holds(Some(current), condition) => {
                return Err(CoreError::Conflict(path.to_string()));
            }
            Some(_) => {}
        }

        entries.remove(path);
        let version = self.next_version();
        drop(entries);

        debug!("memory store: delete {} @{}", path, version);
        self.publish(StoreEvent {
            path: path.to_string(),
            action: StoreAction::Delete,
            value: None,
            version,
        });
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        self.check_available()?;
        self.directories.write().await.insert(path.to_string());
        Ok(())
    }

    async fn watch(&self, path: &str) -> Result<StoreEventStream> {
        self.check_available()?;

        let rx = self.events.subscribe();
        let path = path.to_string();
        let stream = futures::stream::unfold((rx, path), |(mut rx, path)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.path == path => return Some((Ok(event), (rx, path))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("memory store: watcher on {} skipped {} events", path, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("/ns/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_versions_increase() {
        let store = MemoryStore::new();
        let v1 = store.set("/ns/a", "1", WriteCondition::Always).await.unwrap();
        let v2 = store.set("/ns/b", "2", WriteCondition::Always).await.unwrap();
        assert!(v2 > v1);
        assert_eq!(store.get("/ns/a").await.unwrap().unwrap().version, v1);
    }

    #[tokio::test]
    async fn test_conditional_set() {
        let store = MemoryStore::new();
        let v1 = store.set("/ns/a", "1", WriteCondition::Absent).await.unwrap();
        assert!(matches!(
            store.set("/ns/a", "x", WriteCondition::Absent).await,
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            store.set("/ns/a", "x", WriteCondition::Version(v1 + 10)).await,
            Err(CoreError::Conflict(_))
        ));
        store.set("/ns/a", "2", WriteCondition::Version(v1)).await.unwrap();
        assert_eq!(store.get("/ns/a").await.unwrap().unwrap().value, "2");
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let store = MemoryStore::new();
        store.delete("/ns/missing", WriteCondition::Always).await.unwrap();
        assert!(matches!(
            store.delete("/ns/missing", WriteCondition::Version(3)).await,
            Err(CoreError::Conflict(_))
        ));

        let v = store.set("/ns/a", "1", WriteCondition::Always).await.unwrap();
        assert!(store.delete("/ns/a", WriteCondition::Version(v + 1)).await.is_err());
        store.delete("/ns/a", WriteCondition::Version(v)).await.unwrap();
        assert!(!store.contains("/ns/a").await);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.get("/ns/a").await.unwrap_err().is_unavailable());
        assert!(store.make_directory("/ns").await.unwrap_err().is_unavailable());
        store.set_available(true);
        store.make_directory("/ns").await.unwrap();
        assert!(store.is_directory("/ns").await);
    }

    #[tokio::test]
    async fn test_watch_filters_by_path() {
        let store = MemoryStore::new();
        let mut events = store.watch("/ns/a").await.unwrap();

        store.set("/ns/b", "ignored", WriteCondition::Always).await.unwrap();
        store.set("/ns/a", "seen", WriteCondition::Always).await.unwrap();
        store.delete("/ns/a", WriteCondition::Always).await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.action, StoreAction::Set);
        assert_eq!(first.value.as_deref(), Some("seen"));

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.action, StoreAction::Delete);
        assert_eq!(second.value, None);
    }
}
