//! Observability infrastructure for the watchdog
//!
//! Provides:
//! - Prometheus metrics (polls, violations, remediation outcomes, watcher failures, poll latency)
//! - Structured event logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for poll latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    polls: IntCounterVec,
    violations: IntCounterVec,
    remediations: IntCounterVec,
    watcher_failures: IntCounterVec,
    poll_latency_seconds: Histogram,
    active_watchers: IntGauge,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            polls: register_int_counter_vec!(
                "pipeline_watchdog_polls_total",
                "Number of buffer metric polls evaluated",
                &["buffer", "condition"]
            )
            .expect("Failed to register polls_total"),

            violations: register_int_counter_vec!(
                "pipeline_watchdog_violations_total",
                "Number of polls that found a condition violated",
                &["buffer", "condition"]
            )
            .expect("Failed to register violations_total"),

            remediations: register_int_counter_vec!(
                "pipeline_watchdog_remediations_total",
                "Container stop/restart attempts by outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register remediations_total"),

            watcher_failures: register_int_counter_vec!(
                "pipeline_watchdog_watcher_failures_total",
                "Watchers terminated by an unrecoverable error",
                &["buffer", "condition"]
            )
            .expect("Failed to register watcher_failures_total"),

            poll_latency_seconds: register_histogram!(
                "pipeline_watchdog_poll_latency_seconds",
                "Time spent fetching, parsing and evaluating buffer metrics",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),

            active_watchers: register_int_gauge!(
                "pipeline_watchdog_active_watchers",
                "Number of watchers currently running"
            )
            .expect("Failed to register active_watchers"),
        }
    }
}

/// Watchdog metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same metrics.
#[derive(Debug, Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_poll(&self, buffer: &str, condition: &str, duration_secs: f64) {
        self.inner().polls.with_label_values(&[buffer, condition]).inc();
        self.inner().poll_latency_seconds.observe(duration_secs);
    }

    pub fn inc_violations(&self, buffer: &str, condition: &str) {
        self.inner().violations.with_label_values(&[buffer, condition]).inc();
    }

    pub fn add_remediations(&self, action: &str, succeeded: usize, failed: usize) {
        let remediations = &self.inner().remediations;
        remediations
            .with_label_values(&[action, "success"])
            .inc_by(succeeded as u64);
        remediations
            .with_label_values(&[action, "failure"])
            .inc_by(failed as u64);
    }

    pub fn inc_watcher_failures(&self, buffer: &str, condition: &str) {
        self.inner()
            .watcher_failures
            .with_label_values(&[buffer, condition])
            .inc();
    }

    pub fn set_active_watchers(&self, count: usize) {
        self.inner().active_watchers.set(count as i64);
    }

    pub fn polls(&self, buffer: &str, condition: &str) -> u64 {
        self.inner().polls.with_label_values(&[buffer, condition]).get()
    }

    pub fn watcher_failures(&self, buffer: &str, condition: &str) -> u64 {
        self.inner()
            .watcher_failures
            .with_label_values(&[buffer, condition])
            .get()
    }
}

/// Structured logger for watchdog events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("pipeline-watchdog")
    }
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, buffers: usize, watchers: usize) {
        info!(
            event = "watchdog_started",
            instance = %self.instance,
            version = %version,
            buffers = buffers,
            watchers = watchers,
            "Pipeline watchdog started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watchdog_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Pipeline watchdog shutting down"
        );
    }

    pub fn log_violation(&self, buffer: &str, condition: &str, action: &str) {
        warn!(
            event = "condition_violated",
            instance = %self.instance,
            buffer = %buffer,
            condition = %condition,
            action = %action,
            "Buffer condition violated, applying remediation"
        );
    }

    pub fn log_remediation(
        &self,
        buffer: &str,
        condition: &str,
        action: &str,
        matched: usize,
        failed: usize,
    ) {
        if failed == 0 {
            info!(
                event = "remediation_applied",
                instance = %self.instance,
                buffer = %buffer,
                condition = %condition,
                action = %action,
                containers = matched,
                "Remediation applied"
            );
        } else {
            warn!(
                event = "remediation_applied",
                instance = %self.instance,
                buffer = %buffer,
                condition = %condition,
                action = %action,
                containers = matched,
                failed = failed,
                "Remediation partially failed"
            );
        }
    }

    pub fn log_watcher_failed(&self, buffer: &str, condition: &str, reason: &str) {
        error!(
            event = "watcher_failed",
            instance = %self.instance,
            buffer = %buffer,
            condition = %condition,
            reason = %reason,
            "Watcher terminated"
        );
    }
}
