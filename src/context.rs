//! Explicit server-wide dependencies
//!
//! Every long-running task receives a `ServerContext` clone instead of
//! reaching for process globals; tests construct a fresh context per case.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{ConfigError, ServerConfig};
use crate::metrics::Metrics;
use crate::net::auth::{self, AuthProvider};
use crate::net::registry::SessionRegistry;

#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<dyn AuthProvider>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Shutdown,
}

impl ServerContext {
    /// Build a context from a validated configuration. Returns the shutdown
    /// handle alongside so the signal handler can trigger it.
    pub fn new(config: ServerConfig) -> Result<(Self, ShutdownHandle), ConfigError> {
        let auth = auth::provider_from_config(&config)?;
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(config.clone()),
            metrics.clone(),
        ));
        let (handle, shutdown) = shutdown_channel();
        Ok((
            Self {
                config: Arc::new(config),
                registry,
                auth,
                metrics,
                shutdown,
            },
            handle,
        ))
    }
}

/// Process-wide shutdown flag. Long-running tasks check it at every
/// cooperative yield point and exit gracefully once set.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or the handle is dropped)
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_flag() {
        let (handle, shutdown) = shutdown_channel();
        assert!(!shutdown.triggered());

        handle.trigger();
        assert!(shutdown.triggered());
        // wait() resolves immediately once triggered
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let (handle, shutdown) = shutdown_channel();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        });
        handle.trigger();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_shutdown() {
        let (handle, shutdown) = shutdown_channel();
        drop(handle);
        shutdown.wait().await;
    }

    #[test]
    fn test_context_new() {
        let (ctx, _handle) = ServerContext::new(ServerConfig::default()).unwrap();
        assert_eq!(ctx.config.tick_rate, 30);
        assert!(!ctx.shutdown.triggered());
    }
}
