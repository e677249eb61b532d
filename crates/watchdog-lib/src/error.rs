//! Error taxonomy for the watchdog

use thiserror::Error;

/// Errors raised while loading configuration, watching buffers, or remediating containers
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// Structurally invalid or incomplete configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The buffer metrics endpoint could not be reached
    #[error("failed to fetch metrics from {buffer}: {message}")]
    MetricsFetch { buffer: String, message: String },

    /// The metrics payload is not text
    #[error("failed to parse metrics: {0}")]
    MetricsParse(String),

    /// A metric required by a condition is absent from the payload
    #[error("metric `{0}` is missing from the buffer metrics")]
    MissingMetric(String),

    /// The container runtime could not list containers
    #[error("failed to list containers with labels {labels:?}: {message}")]
    ContainerList { labels: Vec<String>, message: String },

    /// A single container could not be stopped or restarted
    #[error("failed to {action} container {container_id}: {message}")]
    ContainerAction {
        action: String,
        container_id: String,
        message: String,
    },

    /// An action outside of stop/restart
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A watcher task panicked or was cancelled before reporting
    #[error("watcher {0} aborted")]
    WatcherAborted(String),
}

impl WatchdogError {
    /// Returns true if the error terminates the watcher that hit it
    pub fn is_fatal_to_watcher(&self) -> bool {
        !matches!(self, WatchdogError::ContainerAction { .. })
    }
}

pub type Result<T> = std::result::Result<T, WatchdogError>;
