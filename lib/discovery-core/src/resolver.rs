//! Resolves a service name to one of its registered endpoints

use crate::selector::{HostSelector, RandomSelector};
use crate::store::KeyValueStore;
use crate::{AddressRecord, Endpoint, Namespace, Result};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Resolver {
    store: Arc<dyn KeyValueStore>,
    namespace: Namespace,
    selector: Box<dyn HostSelector>,
}

impl Resolver {
    /// Resolver with uniform random selection
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self::with_selector(store, namespace, Box::new(RandomSelector))
    }

    pub fn with_selector(
        store: Arc<dyn KeyValueStore>,
        namespace: Namespace,
        selector: Box<dyn HostSelector>,
    ) -> Self {
        Self {
            store,
            namespace,
            selector,
        }
    }

    /// Current address set for `name`; empty when nothing is registered.
    ///
    /// Store failures and malformed records are returned as errors.
    pub async fn lookup(&self, name: &str) -> Result<AddressRecord> {
        let path = self.namespace.path(name);
        self.store.make_directory(self.namespace.as_str()).await?;

        match self.store.get(&path).await? {
            Some(stored) => AddressRecord::from_json(&path, &stored.value),
            None => Ok(AddressRecord::new()),
        }
    }

    /// Pick one endpoint registered under `name`.
    ///
    /// Returns [`Endpoint::empty`] when nothing is registered or the store
    /// cannot be read. A record that exists but cannot be parsed is an error.
    pub async fn discover(&self, name: &str) -> Result<Endpoint> {
        let path = self.namespace.path(name);

        if let Err(e) = self.store.make_directory(self.namespace.as_str()).await {
            error!("service name {} not found: {}", name, e);
            return Ok(Endpoint::empty());
        }

        let stored = match self.store.get(&path).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!("service name {} not found", name);
                return Ok(Endpoint::empty());
            }
            Err(e) => {
                error!("service name {} not found: {}", name, e);
                return Ok(Endpoint::empty());
            }
        };

        let record = AddressRecord::from_json(&path, &stored.value).map_err(|e| {
            error!("{} discovery parse error: {:?}", name, stored.value);
            e
        })?;

        // One bad entry fails the record, whichever host would be picked
        let mut endpoints = record.endpoints(&path).map_err(|e| {
            error!("{} discovery parse error: {:?}", name, stored.value);
            e
        })?;

        let Some(uri) = self.selector.pick_host(record.uris()) else {
            warn!("service name {} has an empty address record", name);
            return Ok(Endpoint::empty());
        };

        let index = record.uris().iter().position(|u| u == uri).unwrap_or_default();
        let endpoint = endpoints.swap_remove(index);
        debug!("{} resolved to {}", name, endpoint);
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use crate::memory::MemoryStore;
    use crate::registry::Registry;
    use crate::selector::RoundRobinSelector;
    use crate::store::WriteCondition;
    use std::collections::HashSet;

    fn setup() -> (Arc<MemoryStore>, Registry, Resolver) {
        let store = Arc::new(MemoryStore::new());
        let ns = Namespace::new("/services").unwrap();
        let registry = Registry::new(store.clone(), ns.clone());
        let resolver = Resolver::new(store.clone(), ns);
        (store, registry, resolver)
    }

    #[tokio::test]
    async fn test_resolve_after_register() {
        let (_store, registry, resolver) = setup();
        let _h = registry.register("svc", "10.0.0.1:9000").await.unwrap();

        let ep = resolver.discover("svc").await.unwrap();
        assert_eq!(ep, Endpoint::new("10.0.0.1", 9000));
    }

    #[tokio::test]
    async fn test_not_found_sentinel() {
        let (_store, _registry, resolver) = setup();
        let ep = resolver.discover("nobody").await.unwrap();
        assert!(ep.is_empty());
        assert_eq!(ep.host, "");
        assert_eq!(ep.port, 0);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_sentinel() {
        let (store, registry, resolver) = setup();
        let _h = registry.register("svc", "10.0.0.1:9000").await.unwrap();
        store.set_available(false);

        assert!(resolver.discover("svc").await.unwrap().is_empty());
        assert!(resolver.lookup("svc").await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_malformed_record_is_hard_failure() {
        let (store, _registry, resolver) = setup();
        store
            .set("/services/svc", "{not json", WriteCondition::Always)
            .await
            .unwrap();

        let err = resolver.discover("svc").await.unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_bad_uri_in_record_is_hard_failure() {
        let (store, _registry, resolver) = setup();
        store
            .set("/services/svc", r#"{"uri":["no-port"]}"#, WriteCondition::Always)
            .await
            .unwrap();

        assert!(matches!(
            resolver.discover("svc").await,
            Err(CoreError::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_one_bad_uri_fails_every_discover() {
        let (store, _registry, resolver) = setup();
        store
            .set(
                "/services/svc",
                r#"{"uri":["10.0.0.1:80","garbage"]}"#,
                WriteCondition::Always,
            )
            .await
            .unwrap();

        for _ in 0..100 {
            assert!(matches!(
                resolver.discover("svc").await,
                Err(CoreError::MalformedRecord { .. })
            ));
        }
        assert!(matches!(
            resolver.lookup("svc").await.unwrap().endpoints("/services/svc"),
            Err(CoreError::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_reads_ensure_namespace_directory() {
        let (store, _registry, resolver) = setup();
        assert!(!store.is_directory("/services").await);

        assert!(resolver.discover("svc").await.unwrap().is_empty());
        assert!(store.is_directory("/services").await);

        let store = Arc::new(MemoryStore::new());
        let resolver = Resolver::new(store.clone(), Namespace::new("/other").unwrap());
        assert!(resolver.lookup("svc").await.unwrap().is_empty());
        assert!(store.is_directory("/other").await);
    }

    #[tokio::test]
    async fn test_empty_record_is_not_found() {
        let (store, _registry, resolver) = setup();
        store
            .set("/services/svc", r#"{"uri":[]}"#, WriteCondition::Always)
            .await
            .unwrap();

        assert!(resolver.discover("svc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_selection_covers_all_hosts() {
        let (_store, registry, resolver) = setup();
        let uris = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"];
        let mut handles = Vec::new();
        for uri in uris {
            handles.push(registry.register("svc", uri).await.unwrap());
        }

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let ep = resolver.discover("svc").await.unwrap();
            assert!(uris.contains(&ep.to_string().as_str()), "unexpected {}", ep);
            seen.insert(ep);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_custom_selector() {
        let store = Arc::new(MemoryStore::new());
        let ns = Namespace::new("/services").unwrap();
        let registry = Registry::new(store.clone(), ns.clone());
        let resolver =
            Resolver::with_selector(store.clone(), ns, Box::new(RoundRobinSelector::new()));

        let _a = registry.register("svc", "a:1").await.unwrap();
        let _b = registry.register("svc", "b:2").await.unwrap();

        assert_eq!(resolver.discover("svc").await.unwrap(), Endpoint::new("a", 1));
        assert_eq!(resolver.discover("svc").await.unwrap(), Endpoint::new("b", 2));
        assert_eq!(resolver.discover("svc").await.unwrap(), Endpoint::new("a", 1));
    }

    #[tokio::test]
    async fn test_lookup_returns_full_set() {
        let (_store, registry, resolver) = setup();
        assert!(resolver.lookup("svc").await.unwrap().is_empty());

        let _a = registry.register("svc", "a:1").await.unwrap();
        let _b = registry.register("svc", "b:2").await.unwrap();
        let record = resolver.lookup("svc").await.unwrap();
        assert_eq!(record.uris(), &["a:1".to_string(), "b:2".to_string()]);
    }
}
