//! Per-condition polling state machine
//!
//! A watcher warms up for one cooldown, then polls its buffer: fetch, parse, evaluate.
//! A violation dispatches the remediation and cools down before the next poll; otherwise
//! the watcher sleeps for the poll interval. Shutdown is observed at every await point.

use super::dispatcher::{ActionDispatcher, DispatchSummary};
use super::evaluator::{evaluate, unix_now};
use crate::error::{Result, WatchdogError};
use crate::health::{components, HealthRegistry};
use crate::metrics::{parse_metrics, MetricsSource};
use crate::models::{ConditionKind, ConditionRef, WatchSpec};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Lifecycle of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    WarmingUp,
    Polling,
    CoolingDown,
    /// Terminated by an unrecoverable error
    Failed,
    /// Terminated by shutdown
    Stopped,
}

impl WatcherState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherState::Failed | WatcherState::Stopped)
    }
}

/// Identifies a watcher by buffer and condition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatcherId {
    pub buffer: String,
    pub kind: ConditionKind,
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&components::watcher(&self.buffer, self.kind))
    }
}

/// Collaborators shared by every watcher
#[derive(Clone)]
pub struct WatchContext {
    pub source: Arc<dyn MetricsSource>,
    pub dispatcher: ActionDispatcher,
    pub health: HealthRegistry,
    pub metrics: WatchdogMetrics,
    pub logger: StructuredLogger,
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollOutcome {
    Healthy,
    Remediated(DispatchSummary),
}

/// Polls one condition of one buffer until shutdown or failure
pub struct Watcher {
    spec: Arc<WatchSpec>,
    kind: ConditionKind,
    ctx: WatchContext,
    state_tx: watch::Sender<WatcherState>,
}

impl Watcher {
    /// Create a watcher for the `kind` condition of `spec`
    pub fn new(spec: Arc<WatchSpec>, kind: ConditionKind, ctx: WatchContext) -> Result<Self> {
        if spec.condition(kind).is_none() {
            return Err(WatchdogError::Configuration(format!(
                "buffer {} has no {} condition",
                spec.buffer, kind
            )));
        }

        let (state_tx, _) = watch::channel(WatcherState::WarmingUp);
        Ok(Self {
            spec,
            kind,
            ctx,
            state_tx,
        })
    }

    pub fn id(&self) -> WatcherId {
        WatcherId {
            buffer: self.spec.buffer.clone(),
            kind: self.kind,
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state_tx.borrow()
    }

    /// Follow state transitions while the watcher runs
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, state: WatcherState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(
                buffer = %self.spec.buffer,
                condition = %self.kind,
                from = ?previous,
                to = ?state,
                "Watcher state changed"
            );
        }
    }

    /// Run until shutdown (`Ok`) or until a poll fails (`Err`)
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let spec = Arc::clone(&self.spec);
        let condition = spec.condition(self.kind).ok_or_else(|| {
            WatchdogError::Configuration(format!("buffer {} has no {} condition", spec.buffer, self.kind))
        })?;

        info!(
            buffer = %spec.buffer,
            condition = %self.kind,
            action = %condition.action(),
            cooldown_secs = condition.cooldown().as_secs(),
            poll_interval_secs = condition.poll_interval().as_secs(),
            "Starting watcher"
        );

        self.transition(WatcherState::WarmingUp);
        if !sleep_or_shutdown(condition.cooldown(), &mut shutdown).await {
            self.stop();
            return Ok(());
        }

        loop {
            self.transition(WatcherState::Polling);

            let outcome = tokio::select! {
                outcome = self.poll(condition) => Some(outcome),
                _ = shutdown.recv() => None,
            };

            let delay = match outcome {
                None => {
                    self.stop();
                    return Ok(());
                }
                Some(Ok(PollOutcome::Healthy)) => condition.poll_interval(),
                Some(Ok(PollOutcome::Remediated(_))) => {
                    self.transition(WatcherState::CoolingDown);
                    condition.cooldown()
                }
                Some(Err(e)) => {
                    self.transition(WatcherState::Failed);
                    return Err(e);
                }
            };

            if !sleep_or_shutdown(delay, &mut shutdown).await {
                self.stop();
                return Ok(());
            }
        }
    }

    fn stop(&self) {
        self.transition(WatcherState::Stopped);
        info!(buffer = %self.spec.buffer, condition = %self.kind, "Watcher stopped");
    }

    async fn poll(&self, condition: ConditionRef<'_>) -> Result<PollOutcome> {
        let buffer = self.spec.buffer.as_str();
        let kind = self.kind.as_str();
        let start = Instant::now();

        let payload = self.ctx.source.fetch(buffer).await?;
        let metrics = parse_metrics(&payload)?;
        let violated = evaluate(condition, &metrics, unix_now())?;

        self.ctx
            .metrics
            .observe_poll(buffer, kind, start.elapsed().as_secs_f64());

        if !violated {
            debug!(buffer = %buffer, condition = %kind, "Condition holds");
            return Ok(PollOutcome::Healthy);
        }

        let action = condition.action();
        self.ctx.metrics.inc_violations(buffer, kind);
        self.ctx.logger.log_violation(buffer, kind, action.as_str());

        let summary = self
            .ctx
            .dispatcher
            .dispatch(action, condition.selector())
            .await?;

        self.ctx
            .metrics
            .add_remediations(action.as_str(), summary.succeeded, summary.failed);
        self.ctx
            .logger
            .log_remediation(buffer, kind, action.as_str(), summary.matched, summary.failed);

        let component = components::watcher(buffer, self.kind);
        if summary.failed > 0 {
            self.ctx
                .health
                .set_degraded(
                    &component,
                    format!(
                        "{} of {} containers failed to {}",
                        summary.failed, summary.matched, action
                    ),
                )
                .await;
        } else {
            self.ctx.health.set_healthy(&component).await;
        }

        Ok(PollOutcome::Remediated(summary))
    }
}

/// Sleep for `delay`; false if shutdown was signalled first
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.recv() => false,
    }
}
