//! Long-running services and their lifecycle.

pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running component started at boot and stopped on shutdown.
#[async_trait]
pub trait Service: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or the service fails.
    ///
    /// Returning early (with or without an error) triggers a process shutdown.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Owns registered services and the tasks they run on.
pub struct ServiceManager {
    pending: Vec<Box<dyn Service>>,
    running: JoinSet<(&'static str, anyhow::Result<()>)>,
    shutdown: CancellationToken,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            running: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        self.pending.push(service);
    }

    /// Spawn every registered service onto the runtime.
    pub fn spawn_all(&mut self) {
        for service in self.pending.drain(..) {
            let name = service.name();
            let token = self.shutdown.child_token();
            info!(service = name, "Starting service");
            self.running
                .spawn(async move { (name, service.run(token).await) });
        }
    }

    /// Wait for the first service to stop on its own.
    ///
    /// Returns `None` when there is nothing left running.
    pub async fn next_exit(&mut self) -> Option<(&'static str, anyhow::Result<()>)> {
        match self.running.join_next().await? {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(error = %e, "Service task panicked or was aborted");
                Some(("unknown", Err(anyhow::anyhow!(e))))
            }
        }
    }

    /// Signal every service to stop, then wait for all of them.
    ///
    /// Returns `true` if every service stopped without error.
    pub async fn shutdown(&mut self) -> bool {
        self.shutdown.cancel();
        let mut clean = true;
        while let Some(joined) = self.running.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(service = name, "Service stopped"),
                Ok((name, Err(e))) => {
                    clean = false;
                    error!(service = name, error = ?e, "Service stopped with error");
                }
                Err(e) => {
                    clean = false;
                    error!(error = %e, "Service task panicked during shutdown");
                }
            }
        }
        clean
    }
}
