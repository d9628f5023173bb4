//! Push notifications for changes to a service's address set

use crate::store::{KeyValueStore, StoreAction, StoreEvent};
use crate::{AddressRecord, Namespace, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one watch subscription
pub type SubscriptionId = Uuid;

/// A parsed change to a watched service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub name: String,
    pub version: u64,
    pub kind: WatchEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The record now holds this set
    Updated(AddressRecord),
    /// The record is gone: nothing is registered
    Removed,
    /// The store holds a value that is not a valid address record
    Malformed { raw: String, reason: String },
}

impl WatchEvent {
    fn from_store(name: &str, event: StoreEvent) -> Self {
        let kind = match (event.action, event.value) {
            (StoreAction::Set, Some(raw)) => match AddressRecord::from_json(&event.path, &raw) {
                Ok(record) => WatchEventKind::Updated(record),
                Err(e) => WatchEventKind::Malformed {
                    raw,
                    reason: e.to_string(),
                },
            },
            (StoreAction::Set, None) => WatchEventKind::Malformed {
                raw: String::new(),
                reason: "set event without a value".to_string(),
            },
            (StoreAction::Delete, _) | (StoreAction::Expire, _) => WatchEventKind::Removed,
        };

        Self {
            name: name.to_string(),
            version: event.version,
            kind,
        }
    }

    /// Current address set, empty for removals and malformed values
    pub fn record(&self) -> AddressRecord {
        match &self.kind {
            WatchEventKind::Updated(record) => record.clone(),
            _ => AddressRecord::new(),
        }
    }
}

struct Subscription {
    name: String,
    task: JoinHandle<()>,
}

/// Relays store change streams to caller-supplied handlers
pub struct Watcher {
    store: Arc<dyn KeyValueStore>,
    namespace: Namespace,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
}

impl Watcher {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self {
            store,
            namespace,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Call `handler` for every change to `name` until [`Watcher::unwatch`].
    ///
    /// Events are delivered in store order from a background task.
    pub async fn watch<F>(&self, name: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        let path = self.namespace.path(name);
        self.store.make_directory(self.namespace.as_str()).await?;
        let mut events = self.store.watch(&path).await?;

        let id = Uuid::new_v4();
        let service = name.to_string();
        let subscriptions = self.subscriptions.clone();

        // Held until the subscription is recorded, so a stream that ends
        // immediately cannot remove it before it is inserted
        let mut active = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => handler(WatchEvent::from_store(&service, event)),
                    Err(e) => {
                        warn!("watch on {} ended: {}", service, e);
                        break;
                    }
                }
            }
            debug!("watch stream for {} closed", service);
            subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        active.insert(
            id,
            Subscription {
                name: name.to_string(),
                task,
            },
        );
        drop(active);

        info!("watching {} ({})", name, id);
        Ok(id)
    }

    /// Stop a subscription. Returns false if it was not active.
    pub fn unwatch(&self, id: &SubscriptionId) -> bool {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match removed {
            Some(subscription) => {
                subscription.task.abort();
                info!("stopped watching {} ({})", subscription.name, id);
                true
            }
            None => false,
        }
    }

    /// Stop every subscription on `name`, returning how many were stopped
    pub fn unwatch_all(&self, name: &str) -> usize {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<SubscriptionId> = subscriptions
            .iter()
            .filter(|(_, s)| s.name == name)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(subscription) = subscriptions.remove(id) {
                subscription.task.abort();
            }
        }
        ids.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for subscription in subscriptions.values() {
            subscription.task.abort();
        }
    }
}
