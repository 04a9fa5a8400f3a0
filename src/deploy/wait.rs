//! Convergence waiting
//!
//! After a deploy the orchestrator schedules tasks on its own. The waiter
//! polls each service until as many tasks run as it wants running.

use super::cancelled;
use crate::cluster::ClusterClient;
use crate::error::{Result, StackError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default poll interval
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A service the waiter should watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedService {
    /// Cluster name
    pub name: String,
    /// Service ID
    pub id: String,
}

/// Polls services until they converge
pub struct ConvergenceWaiter<'a> {
    client: &'a dyn ClusterClient,
    timeout: Option<Duration>,
    interval: Duration,
    quiet: bool,
}

impl<'a> ConvergenceWaiter<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> Self {
        Self {
            client,
            timeout: None,
            interval: POLL_INTERVAL,
            quiet: false,
        }
    }

    /// Give up on a service after `timeout`; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Wait for every service in turn; each gets its own deadline
    pub async fn wait_all(
        &self,
        services: &[DeployedService],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        for service in services {
            self.wait(service, cancel).await?;
        }
        Ok(())
    }

    /// Wait until the service has desired > 0 and running >= desired
    pub async fn wait(
        &self,
        service: &DeployedService,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if !self.quiet {
            info!("Waiting for service {} to converge...", service.name);
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let expired = async move {
            match deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // the deadline and cancellation also bound an in-flight inspect
            let poll = async {
                ticker.tick().await;
                self.client.inspect_service(&service.id).await
            };
            let inspected = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    return Err(StackError::Cancelled(format!("service {}", service.name)));
                }
                _ = &mut expired => {
                    return Err(StackError::ConvergenceTimeout(service.name.clone()));
                }
                inspected = poll => inspected?,
            };
            let Some(status) = inspected.service_status else {
                continue;
            };

            if status.desired_tasks > 0 && status.running_tasks >= status.desired_tasks {
                if !self.quiet {
                    info!(
                        "Service {} converged ({}/{} tasks running)",
                        service.name, status.running_tasks, status.desired_tasks
                    );
                }
                return Ok(());
            }

            debug!(
                service = %service.name,
                running = status.running_tasks,
                desired = status.desired_tasks,
                "not converged yet"
            );
        }
    }
}
