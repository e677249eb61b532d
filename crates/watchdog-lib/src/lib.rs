//! Pipeline watchdog library
//!
//! This crate provides the core functionality for:
//! - Loading and validating watch configuration
//! - Scraping and parsing buffer metrics
//! - Evaluating queue, egress and ingress conditions
//! - Restarting or stopping containers through the Docker API
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod watch;

pub use error::{Result, WatchdogError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchdogMetrics};
pub use watch::{FailurePolicy, Supervisor, SupervisorBuilder, WatcherFailure};
