//! Long-running service abstraction and host.
//!
//! Background loops (job engine, health checker) implement `Service` and are
//! driven by a `ServiceHost` that owns the root shutdown token. The host
//! cancels the token on ctrl-c and waits for every service to return.

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running background service.
#[async_trait::async_trait]
pub trait Service: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run until completion or until `shutdown` is cancelled.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Owns the root cancellation token and the set of registered services.
pub struct ServiceHost {
    shutdown: CancellationToken,
    services: Vec<Box<dyn Service>>,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            services: Vec::new(),
        }
    }

    /// The root token. Child tokens derived from it are cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Spawn every service, then wait for ctrl-c (or an external cancellation
    /// of the root token) and join them all.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let mut set = JoinSet::new();

        for service in self.services {
            let name = service.name();
            let token = self.shutdown.clone();
            set.spawn(async move {
                info!(service = name, "service starting");
                if let Err(e) = service.run(token).await {
                    error!(service = name, error = %e, "service exited with error");
                } else {
                    info!(service = name, "service stopped");
                }
            });
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown.cancel();
        while set.join_next().await.is_some() {}

        Ok(())
    }
}
