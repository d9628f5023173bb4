//! Registration lifecycle
//!
//! A [`RegistrationHandle`] is the obligation to take a registration back out
//! of the store. [`LifecycleGuard`] owns a set of handles for the life of a
//! process and releases all of them on shutdown.

use crate::registry::Registry;
use crate::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use tracing::{error, info, warn};

/// Handle for one (name, uri) registration held by this process
pub struct RegistrationHandle {
    registry: Registry,
    name: String,
    uri: String,
    registered_at: DateTime<Utc>,
    released: bool,
}

impl RegistrationHandle {
    pub(crate) fn new(registry: Registry, name: &str, uri: &str) -> Self {
        Self {
            registry,
            name: name.to_string(),
            uri: uri.to_string(),
            registered_at: Utc::now(),
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Unregister from the store. If other handles in this process still hold
    /// the same (name, uri), the record is left alone until the last one goes.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if self.registry.release_hold(&self.name, &self.uri) {
            self.registry.unregister(&self.name, &self.uri).await
        } else {
            info!(
                "{} at {} still held by another handle, not unregistering",
                self.name, self.uri
            );
            Ok(())
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // No async context here, so no store access
        self.registry.release_hold(&self.name, &self.uri);
        warn!(
            "{} at {} dropped without release; registration left in the store",
            self.name, self.uri
        );
    }
}

impl fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("registered_at", &self.registered_at)
            .field("released", &self.released)
            .finish()
    }
}

/// Outcome of a guard shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub released: usize,
    pub failed: usize,
}

/// Owns this process's registrations and releases them on every exit path
#[derive(Debug, Default)]
pub struct LifecycleGuard {
    handles: Vec<RegistrationHandle>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, handle: RegistrationHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release every tracked handle. Failures are logged, never returned:
    /// the process is going away and nobody is left to handle them.
    pub async fn shutdown(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for handle in self.handles {
            let name = handle.name.clone();
            let uri = handle.uri.clone();
            match handle.release().await {
                Ok(()) => report.released += 1,
                Err(e) => {
                    error!("Failed to unregister {} at {} on shutdown: {}", name, uri, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Lifecycle shutdown: {} released, {} failed",
            report.released, report.failed
        );
        report
    }

    /// Wait for `signal`, then shut down
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, releasing registrations");
        }
        _ = terminate => {
            info!("Received terminate signal, releasing registrations");
        }
    }
}
