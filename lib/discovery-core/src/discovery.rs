//! Client facade bundling registration, resolution and watching

use crate::config::DiscoveryConfig;
use crate::lifecycle::RegistrationHandle;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::selector::HostSelector;
use crate::store::KeyValueStore;
use crate::watcher::{SubscriptionId, WatchEvent, Watcher};
use crate::{AddressRecord, Endpoint, Namespace, Result};
use std::sync::Arc;

/// One discovery client over one store and namespace
pub struct ServiceDiscovery {
    registry: Registry,
    resolver: Resolver,
    watcher: Watcher,
}

impl ServiceDiscovery {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self {
            registry: Registry::new(store.clone(), namespace.clone()),
            resolver: Resolver::new(store.clone(), namespace.clone()),
            watcher: Watcher::new(store, namespace),
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &DiscoveryConfig) -> Result<Self> {
        let namespace = config.namespace()?;
        Ok(Self {
            registry: Registry::new(store.clone(), namespace.clone())
                .with_max_conflict_retries(config.max_conflict_retries),
            resolver: Resolver::with_selector(
                store.clone(),
                namespace.clone(),
                config.selection.selector(),
            ),
            watcher: Watcher::new(store, namespace),
        })
    }

    /// Replace the host selection policy
    pub fn with_selector(mut self, selector: Box<dyn HostSelector>) -> Self {
        self.resolver = Resolver::with_selector(
            self.registry.store(),
            self.registry.namespace().clone(),
            selector,
        );
        self
    }

    pub fn namespace(&self) -> &Namespace {
        self.registry.namespace()
    }

    pub async fn register(&self, name: &str, uri: &str) -> Result<RegistrationHandle> {
        self.registry.register(name, uri).await
    }

    pub async fn unregister(&self, name: &str, uri: &str) -> Result<()> {
        self.registry.unregister(name, uri).await
    }

    pub async fn discover(&self, name: &str) -> Result<Endpoint> {
        self.resolver.discover(name).await
    }

    pub async fn lookup(&self, name: &str) -> Result<AddressRecord> {
        self.resolver.lookup(name).await
    }

    pub async fn watch<F>(&self, name: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        self.watcher.watch(name, handler).await
    }

    pub fn unwatch(&self, id: &SubscriptionId) -> bool {
        self.watcher.unwatch(id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleGuard;
    use crate::memory::MemoryStore;
    use crate::selector::{RoundRobinSelector, SelectionStrategy};

    #[tokio::test]
    async fn test_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let provider = ServiceDiscovery::new(store.clone(), Namespace::new("/services").unwrap());
        let consumer = ServiceDiscovery::new(store.clone(), Namespace::new("/services").unwrap());

        let mut guard = LifecycleGuard::new();
        guard.track(provider.register("svc", "10.0.0.1:9000").await.unwrap());

        assert_eq!(
            consumer.discover("svc").await.unwrap(),
            Endpoint::new("10.0.0.1", 9000)
        );

        guard.shutdown().await;
        assert!(consumer.discover("svc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let prod = ServiceDiscovery::new(store.clone(), Namespace::new("/prod").unwrap());
        let staging = ServiceDiscovery::new(store.clone(), Namespace::new("/staging").unwrap());

        let _h = prod.register("svc", "a:1").await.unwrap();
        assert!(staging.discover("svc").await.unwrap().is_empty());
        assert!(store.contains("/prod/svc").await);
    }

    #[tokio::test]
    async fn test_from_config_uses_strategy() {
        let store = Arc::new(MemoryStore::new());
        let config = DiscoveryConfig {
            selection: SelectionStrategy::RoundRobin,
            ..Default::default()
        };
        let client = ServiceDiscovery::from_config(store, &config).unwrap();

        let _a = client.register("svc", "a:1").await.unwrap();
        let _b = client.register("svc", "b:2").await.unwrap();
        let picks = [
            client.discover("svc").await.unwrap(),
            client.discover("svc").await.unwrap(),
        ];
        assert_eq!(picks, [Endpoint::new("a", 1), Endpoint::new("b", 2)]);
    }

    #[tokio::test]
    async fn test_with_selector_overrides_policy() {
        let store = Arc::new(MemoryStore::new());
        let client = ServiceDiscovery::new(store, Namespace::new("/services").unwrap())
            .with_selector(Box::new(RoundRobinSelector::new()));

        let _a = client.register("svc", "a:1").await.unwrap();
        let _b = client.register("svc", "b:2").await.unwrap();
        assert_eq!(client.discover("svc").await.unwrap(), Endpoint::new("a", 1));
        assert_eq!(client.lookup("svc").await.unwrap().len(), 2);
    }
}
