//! Watch group supervision
//!
//! Spawns one [`Watcher`] per configured condition and aggregates their outcomes. Every
//! watcher failure is also reported on the channel returned by [`SupervisorBuilder::build`]
//! as soon as it happens, whatever the policy.

use super::dispatcher::ActionDispatcher;
use super::watcher::{WatchContext, Watcher, WatcherId};
use crate::error::{Result, WatchdogError};
use crate::health::{components, HealthRegistry};
use crate::metrics::MetricsSource;
use crate::models::WatchdogConfig;
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::runtime::ContainerRuntime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// What a watcher failure means for its siblings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Siblings keep running; `run` returns the first failure once all watchers ended
    #[default]
    Isolated,
    /// The first failure cancels every sibling
    AllOrNothing,
}

/// A watcher that ended with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherFailure {
    /// Health component of the watcher, or the supervisor for an aborted task
    pub watcher: String,
    pub reason: String,
}

impl fmt::Display for WatcherFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher {} failed: {}", self.watcher, self.reason)
    }
}

type Joined = std::result::Result<(WatcherId, Result<()>), JoinError>;

/// Runs the watchers of a configuration until shutdown or failure
pub struct Supervisor {
    config: WatchdogConfig,
    ctx: WatchContext,
    policy: FailurePolicy,
    failures: mpsc::Sender<WatcherFailure>,
}

impl Supervisor {
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// One watcher per present condition, in configuration order
    pub fn watchers(&self) -> Result<Vec<Watcher>> {
        let mut watchers = Vec::with_capacity(self.config.watcher_count());
        for spec in self.config.watch() {
            for kind in spec.conditions() {
                watchers.push(Watcher::new(Arc::clone(spec), kind, self.ctx.clone())?);
            }
        }
        Ok(watchers)
    }

    /// Run every watcher until `shutdown` fires or the failure policy ends the group
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let watchers = self.watchers()?;
        let health = &self.ctx.health;

        health.register(components::SUPERVISOR).await;
        for watcher in &watchers {
            health.register(&watcher.id().to_string()).await;
        }

        let (cancel_tx, _) = broadcast::channel(1);
        let mut tasks = JoinSet::new();
        for watcher in watchers {
            let id = watcher.id();
            let cancel = cancel_tx.subscribe();
            tasks.spawn(async move {
                let result = watcher.run(cancel).await;
                (id, result)
            });
        }

        let mut active = tasks.len();
        self.ctx.metrics.set_active_watchers(active);
        health.set_ready(true).await;
        info!(watchers = active, policy = ?self.policy, "All watchers started");

        let mut first_failure = None;
        loop {
            let next = tokio::select! {
                joined = tasks.join_next() => Some(joined),
                _ = shutdown.recv() => None,
            };

            let Some(next) = next else {
                info!("Shutdown requested, stopping watchers");
                let _ = cancel_tx.send(());
                self.drain(&mut tasks).await;
                return Ok(());
            };

            // Every watcher has ended
            let Some(joined) = next else {
                break;
            };

            active -= 1;
            self.ctx.metrics.set_active_watchers(active);

            let Some(error) = self.record(joined).await else {
                continue;
            };

            match self.policy {
                FailurePolicy::AllOrNothing => {
                    warn!(error = %error, "Watcher failed, cancelling remaining watchers");
                    let _ = cancel_tx.send(());
                    self.drain(&mut tasks).await;
                    return Err(error);
                }
                FailurePolicy::Isolated => {
                    first_failure.get_or_insert(error);
                }
            }
        }

        self.ctx.metrics.set_active_watchers(0);
        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Report a finished watcher; returns its error if it failed
    async fn record(&self, joined: Joined) -> Option<WatchdogError> {
        let (id, error) = match joined {
            Ok((id, Ok(()))) => {
                debug!(watcher = %id, "Watcher finished");
                return None;
            }
            Ok((id, Err(error))) => (id, error),
            Err(join_error) => {
                let error = WatchdogError::WatcherAborted(join_error.to_string());
                self.ctx
                    .health
                    .set_unhealthy(components::SUPERVISOR, error.to_string())
                    .await;
                self.report(components::SUPERVISOR.to_string(), &error).await;
                return Some(error);
            }
        };

        let reason = error.to_string();
        let condition = id.kind.as_str();
        self.ctx
            .health
            .set_unhealthy(&id.to_string(), reason.as_str())
            .await;
        self.ctx.metrics.inc_watcher_failures(&id.buffer, condition);
        self.ctx.logger.log_watcher_failed(&id.buffer, condition, &reason);
        self.report(id.to_string(), &error).await;

        Some(error)
    }

    async fn report(&self, watcher: String, error: &WatchdogError) {
        let failure = WatcherFailure {
            watcher,
            reason: error.to_string(),
        };
        if self.failures.send(failure).await.is_err() {
            debug!("Nobody listens for watcher failures");
        }
    }

    /// Wait for cancelled watchers to finish
    async fn drain(&self, tasks: &mut JoinSet<(WatcherId, Result<()>)>) {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => debug!(watcher = %id, "Watcher stopped"),
                Ok((id, Err(error))) => {
                    warn!(watcher = %id, error = %error, "Watcher failed while stopping")
                }
                Err(join_error) => warn!(error = %join_error, "Watcher task aborted"),
            }
        }
        self.ctx.metrics.set_active_watchers(0);
    }
}

/// Builder for a [`Supervisor`]
pub struct SupervisorBuilder {
    config: Option<WatchdogConfig>,
    source: Option<Arc<dyn MetricsSource>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    policy: FailurePolicy,
    health: Option<HealthRegistry>,
    metrics: Option<WatchdogMetrics>,
    logger: Option<StructuredLogger>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            source: None,
            runtime: None,
            policy: FailurePolicy::default(),
            health: None,
            metrics: None,
            logger: None,
        }
    }

    pub fn config(mut self, config: WatchdogConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set where buffer metrics are fetched from
    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the runtime remediation actions are applied through
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a health registry with the API server
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: WatchdogMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the supervisor and the receiving end of its failure reports
    pub fn build(self) -> anyhow::Result<(Supervisor, mpsc::Receiver<WatcherFailure>)> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("Watch configuration is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;

        let ctx = WatchContext {
            source,
            dispatcher: ActionDispatcher::new(runtime),
            health: self.health.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            logger: self.logger.unwrap_or_default(),
        };

        // Each watcher fails at most once, so reports never wait for the receiver
        let (failures, failures_rx) = mpsc::channel(config.watcher_count().max(1) + 1);

        Ok((
            Supervisor {
                config,
                ctx,
                policy: self.policy,
                failures,
            },
            failures_rx,
        ))
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
