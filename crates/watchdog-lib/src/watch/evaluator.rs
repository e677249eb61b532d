//! Condition evaluation
//!
//! Pure decision functions over one scrape of buffer metrics.

use crate::error::Result;
use crate::metrics::{BufferMetrics, BUFFER_SIZE, LAST_RECEIVED_MESSAGE, LAST_SENT_MESSAGE};
use crate::models::{ConditionRef, FlowCondition, QueueCondition};

/// Current unix time in seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The queue holds more messages than allowed
pub fn queue_backlogged(metrics: &BufferMetrics, cfg: &QueueCondition) -> Result<bool> {
    Ok(metrics.require(BUFFER_SIZE)? > cfg.length as f64)
}

/// Nothing has been sent downstream for longer than allowed
pub fn egress_idle(metrics: &BufferMetrics, cfg: &FlowCondition, now: f64) -> Result<bool> {
    idle_since(metrics, LAST_SENT_MESSAGE, cfg, now)
}

/// Nothing has been received from upstream for longer than allowed
pub fn ingress_idle(metrics: &BufferMetrics, cfg: &FlowCondition, now: f64) -> Result<bool> {
    idle_since(metrics, LAST_RECEIVED_MESSAGE, cfg, now)
}

fn idle_since(metrics: &BufferMetrics, metric: &str, cfg: &FlowCondition, now: f64) -> Result<bool> {
    let last_activity = metrics.require(metric)?;
    Ok(now - last_activity > cfg.idle.as_secs_f64())
}

/// Evaluate whichever condition `condition` refers to
pub fn evaluate(condition: ConditionRef<'_>, metrics: &BufferMetrics, now: f64) -> Result<bool> {
    match condition {
        ConditionRef::Queue(cfg) => queue_backlogged(metrics, cfg),
        ConditionRef::Egress(cfg) => egress_idle(metrics, cfg, now),
        ConditionRef::Ingress(cfg) => ingress_idle(metrics, cfg, now),
    }
}
