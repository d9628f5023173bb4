//! Client configuration

use crate::registry::DEFAULT_MAX_CONFLICT_RETRIES;
use crate::selector::SelectionStrategy;
use crate::{CoreError, Namespace, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_STORE_URL: &str = "DISCOVERY_STORE_URL";
pub const ENV_NAMESPACE: &str = "DISCOVERY_NAMESPACE";
pub const ENV_SELECTION: &str = "DISCOVERY_SELECTION";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "DISCOVERY_MAX_CONFLICT_RETRIES";

/// Discovery client configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Base URL of the key-value store
    pub store_url: String,
    /// Prefix under which every service record lives
    pub namespace: String,
    /// How discover() picks among registered uris
    pub selection: SelectionStrategy,
    /// Conditional-write conflicts tolerated per register/unregister
    pub max_conflict_retries: u32,
    /// Timeout for a single store request
    pub request_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            store_url: "http://127.0.0.1:2379".to_string(),
            namespace: "/services".to_string(),
            selection: SelectionStrategy::Random,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            request_timeout_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Load from an optional YAML file, then apply environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Configuration(format!("failed to read {}: {}", path.display(), e))
                })?;
                info!("Loaded discovery configuration from {}", path.display());
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::Configuration(e.to_string()))
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_STORE_URL) {
            debug!("{} overrides store url", ENV_STORE_URL);
            self.store_url = url;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(selection) = lookup(ENV_SELECTION) {
            self.selection = selection.parse().map_err(CoreError::Configuration)?;
        }
        if let Some(retries) = lookup(ENV_MAX_CONFLICT_RETRIES) {
            self.max_conflict_retries = retries.parse().map_err(|_| {
                CoreError::Configuration(format!(
                    "{} must be a non-negative integer, got {:?}",
                    ENV_MAX_CONFLICT_RETRIES, retries
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_url.trim().is_empty() {
            return Err(CoreError::Configuration("store_url is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Configuration(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.namespace()?;
        Ok(())
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::new(self.namespace.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
