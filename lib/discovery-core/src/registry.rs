//! Service registry: merges registrations into the shared address record

use crate::lifecycle::RegistrationHandle;
use crate::store::{KeyValueStore, WriteCondition};
use crate::{AddressRecord, CoreError, Endpoint, Namespace, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Registry of this process's service registrations.
///
/// Every change is a read-modify-write of the record at `{namespace}/{name}`
/// guarded by a conditional write on the version that was read. A writer that
/// loses the race re-reads and tries again, so concurrent registrations from
/// different processes are merged rather than overwritten.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KeyValueStore>,
    namespace: Namespace,
    max_conflict_retries: u32,
    // (name, uri) -> number of live handles in this process
    held: Arc<Mutex<HashMap<(String, String), usize>>>,
}

impl Registry {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: Namespace) -> Self {
        Self {
            store,
            namespace,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn path(&self, name: &str) -> String {
        self.namespace.path(name)
    }

    /// Register `uri` under `name` and return the handle that owns its removal
    pub async fn register(&self, name: &str, uri: &str) -> Result<RegistrationHandle> {
        validate_name(name)?;
        Endpoint::parse(uri)?;

        self.modify(name, |record| record.insert(uri)).await?;
        self.acquire(name, uri);

        info!("{} registered at {}", name, uri);
        Ok(RegistrationHandle::new(self.clone(), name, uri))
    }

    /// Remove `uri` from `name`. Missing records and missing uris are no-ops.
    pub async fn unregister(&self, name: &str, uri: &str) -> Result<()> {
        validate_name(name)?;

        self.modify(name, |record| record.remove(uri)).await?;

        info!("{} unregistered from {}", name, uri);
        Ok(())
    }

    /// Uris this process currently holds handles for under `name`
    pub fn registered(&self, name: &str) -> Vec<String> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut uris: Vec<String> = held
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, uri)| uri.clone())
            .collect();
        uris.sort();
        uris
    }

    pub(crate) fn acquire(&self, name: &str, uri: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held.entry((name.to_string(), uri.to_string())).or_insert(0) += 1;
    }

    /// Drop one hold on (name, uri). Returns true when it was the last one.
    pub(crate) fn release_hold(&self, name: &str, uri: &str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (name.to_string(), uri.to_string());
        match held.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                held.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Apply `change` to the record for `name` and persist it conditionally.
    ///
    /// `change` returns whether it altered the record; an unaltered record is
    /// not written back. A record that ends up empty is deleted.
    async fn modify<F>(&self, name: &str, mut change: F) -> Result<()>
    where
        F: FnMut(&mut AddressRecord) -> bool,
    {
        let path = self.path(name);
        let mut conflicts = 0;

        loop {
            self.store.make_directory(self.namespace.as_str()).await?;

            let current = self.store.get(&path).await?;
            let (mut record, condition) = match &current {
                Some(stored) => (
                    AddressRecord::from_json(&path, &stored.value)?,
                    WriteCondition::Version(stored.version),
                ),
                None => (AddressRecord::new(), WriteCondition::Absent),
            };

            if !change(&mut record) {
                debug!("{}: record unchanged, skipping write", path);
                return Ok(());
            }

            let outcome = if record.is_empty() {
                self.store.delete(&path, condition).await
            } else {
                let value = record.to_json()?;
                self.store.set(&path, &value, condition).await.map(|_| ())
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(CoreError::Conflict(_)) => {
                    conflicts += 1;
                    if conflicts > self.max_conflict_retries {
                        warn!("{}: giving up after {} conflicts", path, conflicts);
                        return Err(CoreError::ConflictRetriesExhausted {
                            path,
                            attempts: conflicts,
                        });
                    }
                    debug!("{}: concurrent update, retrying ({})", path, conflicts);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::InvalidServiceName(name.to_string()));
    }
    Ok(())
}
