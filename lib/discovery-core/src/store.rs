//! Key-value store boundary
//!
//! The core only ever talks to the store through [`KeyValueStore`]. Atomicity
//! is per key; conditional writes are how the registry avoids lost updates.

use crate::Result;
use futures::stream::BoxStream;

/// A value read from the store together with its modification version
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: String,
    pub version: u64,
}

/// Precondition attached to a write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional, last writer wins
    Always,
    /// Only if the key does not exist
    Absent,
    /// Only if the key still has this version
    Version(u64),
}

/// What happened to a watched key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreAction {
    Set,
    Delete,
    Expire,
}

/// A raw change notification from the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub path: String,
    pub action: StoreAction,
    /// New value for `Set`, `None` otherwise
    pub value: Option<String>,
    pub version: u64,
}

pub type StoreEventStream = BoxStream<'static, Result<StoreEvent>>;

/// Capability set the registry, resolver and watcher depend on
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key. A missing key is `Ok(None)`, not an error.
    async fn get(&self, path: &str) -> Result<Option<VersionedValue>>;

    /// Write a key, returning the new version. A failed condition is `CoreError::Conflict`.
    async fn set(&self, path: &str, value: &str, condition: WriteCondition) -> Result<u64>;

    /// Delete a key. Deleting a missing key unconditionally succeeds.
    async fn delete(&self, path: &str, condition: WriteCondition) -> Result<()>;

    /// Create a directory; succeeds if it already exists
    async fn make_directory(&self, path: &str) -> Result<()>;

    /// Subscribe to changes of a single key
    async fn watch(&self, path: &str) -> Result<StoreEventStream>;
}
