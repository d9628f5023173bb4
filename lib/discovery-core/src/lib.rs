//! Service registration and discovery over a shared key-value store
//!
//! This library provides:
//! - Registry for advertising `host:port` uris under a service name
//! - Resolver for picking one registered endpoint per lookup
//! - Watcher for push notifications when a service's address set changes
//! - Lifecycle handles that take registrations back out on shutdown

pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod namespace;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod selector;
pub mod store;
pub mod watcher;

pub use config::DiscoveryConfig;
pub use discovery::ServiceDiscovery;
pub use endpoint::Endpoint;
pub use error::{CoreError, Result};
pub use lifecycle::{shutdown_signal, LifecycleGuard, RegistrationHandle, ShutdownReport};
pub use memory::MemoryStore;
pub use namespace::Namespace;
pub use record::AddressRecord;
pub use registry::Registry;
pub use resolver::Resolver;
pub use selector::{HostSelector, RandomSelector, RoundRobinSelector, SelectionStrategy};
pub use store::{
    KeyValueStore, StoreAction, StoreEvent, StoreEventStream, VersionedValue, WriteCondition,
};
pub use watcher::{SubscriptionId, WatchEvent, WatchEventKind, Watcher};
