//! Exposition text parsing

use crate::error::{Result, WatchdogError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

static METRIC_PATTERN: OnceLock<Regex> = OnceLock::new();

fn metric_pattern() -> &'static Regex {
    METRIC_PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)\{[^}]*\} ([0-9.e+-]+) \d+").expect("metric pattern is a valid regex")
    })
}

/// Metric values of a single buffer scrape, keyed by metric name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferMetrics {
    values: HashMap<String, f64>,
}

impl BufferMetrics {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Value of a metric a condition cannot be evaluated without
    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| WatchdogError::MissingMetric(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for BufferMetrics {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Parse a metrics payload.
///
/// Samples look like `name{labels} value timestamp`. Text that does not match, or whose
/// value is not a number, is skipped. When a name repeats the last sample wins.
pub fn parse_metrics(payload: &[u8]) -> Result<BufferMetrics> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| WatchdogError::MetricsParse(format!("payload is not text: {}", e)))?;

    let mut values = HashMap::new();
    for captures in metric_pattern().captures_iter(text) {
        let name = &captures[1];
        match captures[2].parse::<f64>() {
            Ok(value) => {
                values.insert(name.to_string(), value);
            }
            Err(_) => {
                tracing::trace!(metric = %name, value = &captures[2], "Skipping non-numeric sample");
            }
        }
    }

    Ok(BufferMetrics { values })
}
