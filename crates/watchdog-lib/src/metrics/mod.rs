//! Buffer metrics retrieval and parsing
//!
//! Buffers expose Prometheus-style exposition text on `http://<buffer>/metrics`.
//! Only `name{labels} value timestamp` samples are consumed; everything else is ignored.

mod parser;
mod source;

pub use parser::{parse_metrics, BufferMetrics};
pub use source::{HttpMetricsSource, MetricsSource};

/// Number of messages waiting in the buffer queue
pub const BUFFER_SIZE: &str = "buffer_size";
/// Unix timestamp (seconds) of the last message sent downstream
pub const LAST_SENT_MESSAGE: &str = "last_sent_message";
/// Unix timestamp (seconds) of the last message received from upstream
pub const LAST_RECEIVED_MESSAGE: &str = "last_received_message";
