//! Address records as stored under a service path
//!
//! Wire format: `{ "uri": ["host:port", ...] }`. The sequence is ordered for
//! storage but is a set: it never holds the same uri twice.

use crate::{CoreError, Endpoint, Result};
use serde::{Deserialize, Serialize};

/// The deduplicated set of uris registered under one service name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    uri: Vec<String>,
}

impl AddressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored value. `path` is only used for error context.
    pub fn from_json(path: &str, raw: &str) -> Result<Self> {
        let decoded: AddressRecord =
            serde_json::from_str(raw).map_err(|e| CoreError::malformed(path, e))?;

        // A concurrent writer may have left duplicates behind
        let mut record = AddressRecord::new();
        for uri in decoded.uri {
            record.insert(&uri);
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Add a uri, keeping first-seen order. Returns false if it was already present.
    pub fn insert(&mut self, uri: &str) -> bool {
        if self.contains(uri) {
            return false;
        }
        self.uri.push(uri.to_string());
        true
    }

    /// Remove a uri by exact string match. Returns false if it was absent.
    pub fn remove(&mut self, uri: &str) -> bool {
        let before = self.uri.len();
        self.uri.retain(|u| u != uri);
        self.uri.len() != before
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.uri.iter().any(|u| u == uri)
    }

    pub fn uris(&self) -> &[String] {
        &self.uri
    }

    pub fn len(&self) -> usize {
        self.uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uri.is_empty()
    }

    /// Parse every uri into an endpoint; any bad entry fails the whole record
    pub fn endpoints(&self, path: &str) -> Result<Vec<Endpoint>> {
        self.uri
            .iter()
            .map(|u| Endpoint::parse(u).map_err(|e| CoreError::malformed(path, e)))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for AddressRecord {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut record = AddressRecord::new();
        for uri in iter {
            let uri: String = uri.into();
            record.insert(&uri);
        }
        record
    }
}
