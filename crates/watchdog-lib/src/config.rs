//! Watch configuration loading
//!
//! Reads the YAML watch file through the `config` crate into raw serde shapes,
//! then converts them into the validated [`WatchdogConfig`].

use crate::error::{Result, WatchdogError};
use crate::models::{
    Action, FlowCondition, LabelSelector, LabelSet, QueueCondition, WatchSpec, WatchdogConfig,
};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    watch: Option<Vec<RawWatch>>,
}

#[derive(Debug, Deserialize)]
struct RawWatch {
    buffer: String,
    #[serde(default)]
    queue: Option<RawQueue>,
    #[serde(default)]
    egress: Option<RawFlow>,
    #[serde(default)]
    ingress: Option<RawFlow>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    action: String,
    length: u64,
    cooldown: RawDuration,
    polling_interval: RawDuration,
    container: Vec<RawLabels>,
}

#[derive(Debug, Deserialize)]
struct RawFlow {
    action: String,
    idle: RawDuration,
    cooldown: RawDuration,
    #[serde(default)]
    polling_interval: Option<RawDuration>,
    container: Vec<RawLabels>,
}

#[derive(Debug, Deserialize)]
struct RawLabels {
    labels: OneOrMany,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn to_duration(&self) -> Result<Duration> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            RawDuration::Text(text) => parse_duration(text),
        }
    }
}

/// Parse `<integer><unit>` durations with units s, m, h, d, w. A bare integer is seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = |reason: &str| {
        WatchdogError::Configuration(format!("invalid duration `{}`: {}", value, reason))
    };

    let Some(unit) = value.chars().last() else {
        return Err(invalid("empty value"));
    };

    let (number, multiplier) = if unit.is_ascii_digit() {
        (value, 1)
    } else {
        let multiplier = match unit {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            _ => return Err(invalid("unknown unit, expected one of s, m, h, d, w")),
        };
        (&value[..value.len() - unit.len_utf8()], multiplier)
    };

    let amount: u64 = number
        .parse()
        .map_err(|_| invalid("expected a non-negative integer"))?;

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid("value is too large"))
}

/// Load and validate the watch configuration from a YAML file
pub fn load_watch_config(path: impl AsRef<Path>) -> Result<WatchdogConfig> {
    let path = path.as_ref();
    let source = File::from(path).format(FileFormat::Yaml).required(true);

    build(Config::builder().add_source(source)).map_err(|e| match e {
        WatchdogError::Configuration(message) => WatchdogError::Configuration(format!(
            "{} ({})",
            message,
            path.display()
        )),
        other => other,
    })
}

/// Parse and validate a watch configuration held in memory
pub fn parse_watch_config(yaml: &str) -> Result<WatchdogConfig> {
    build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
}

fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<WatchdogConfig> {
    let raw: RawConfig = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| WatchdogError::Configuration(e.to_string()))?;

    let watch = raw
        .watch
        .unwrap_or_default()
        .into_iter()
        .map(convert_watch)
        .collect::<Result<Vec<_>>>()?;

    WatchdogConfig::new(watch)
}

fn convert_watch(raw: RawWatch) -> Result<WatchSpec> {
    Ok(WatchSpec {
        queue: raw.queue.map(convert_queue).transpose()?,
        egress: raw.egress.map(convert_flow).transpose()?,
        ingress: raw.ingress.map(convert_flow).transpose()?,
        buffer: raw.buffer,
    })
}

fn convert_queue(raw: RawQueue) -> Result<QueueCondition> {
    Ok(QueueCondition {
        action: raw.action.parse::<Action>()?,
        length: raw.length,
        cooldown: raw.cooldown.to_duration()?,
        poll_interval: raw.polling_interval.to_duration()?,
        selector: convert_labels(raw.container),
    })
}

fn convert_flow(raw: RawFlow) -> Result<FlowCondition> {
    let idle = raw.idle.to_duration()?;
    let poll_interval = match raw.polling_interval {
        Some(interval) => interval.to_duration()?,
        None => idle,
    };

    Ok(FlowCondition {
        action: raw.action.parse::<Action>()?,
        idle,
        cooldown: raw.cooldown.to_duration()?,
        poll_interval,
        selector: convert_labels(raw.container),
    })
}

fn convert_labels(raw: Vec<RawLabels>) -> LabelSelector {
    LabelSelector::new(
        raw.into_iter()
            .map(|entry| match entry.labels {
                OneOrMany::One(label) => LabelSet::new([label]),
                OneOrMany::Many(labels) => LabelSet::new(labels),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConditionKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
watch:
  - buffer: buffer1:8000
    queue:
      action: restart
      length: 18
      cooldown: 60s
      polling_interval: 10s
      container:
        - labels: [label1, label2=2]
        - labels: some-label
    egress:
      action: stop
      idle: 100s
      cooldown: 1m
      polling_interval: 20s
      container:
        - labels: egress-label=egress-value
        - labels: some-label
    ingress:
      action: restart
      idle: 60s
      cooldown: 30s
      container:
        - labels: some-label
  - buffer: buffer2:8002
    ingress:
      action: stop
      idle: 70
      cooldown: 1h
      container:
        - labels: [some-label]
"#;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::from_secs(0));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_invalid() {
        for value in ["1x", "-1s", "xs", "xx", "", "s"] {
            let err = parse_duration(value).unwrap_err();
            assert!(
                matches!(err, WatchdogError::Configuration(_)),
                "expected configuration error for {:?}",
                value
            );
        }
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse_watch_config(FULL_CONFIG).unwrap();

        assert_eq!(config.watch().len(), 2);
        assert_eq!(config.watcher_count(), 4);

        let first = &config.watch()[0];
        assert_eq!(first.buffer, "buffer1:8000");

        let queue = first.queue.as_ref().unwrap();
        assert_eq!(queue.action, Action::Restart);
        assert_eq!(queue.length, 18);
        assert_eq!(queue.cooldown, Duration::from_secs(60));
        assert_eq!(queue.poll_interval, Duration::from_secs(10));
        assert_eq!(
            queue.selector,
            LabelSelector::new(vec![
                LabelSet::new(["label1", "label2=2"]),
                LabelSet::new(["some-label"]),
            ])
        );

        let egress = first.egress.as_ref().unwrap();
        assert_eq!(egress.action, Action::Stop);
        assert_eq!(egress.idle, Duration::from_secs(100));
        assert_eq!(egress.cooldown, Duration::from_secs(60));
        assert_eq!(egress.poll_interval, Duration::from_secs(20));

        let second = &config.watch()[1];
        assert_eq!(second.conditions(), vec![ConditionKind::Ingress]);
        let ingress = second.ingress.as_ref().unwrap();
        assert_eq!(ingress.idle, Duration::from_secs(70));
        assert_eq!(ingress.cooldown, Duration::from_secs(3600));
    }

    #[test]
    fn test_flow_polling_interval_defaults_to_idle() {
        let config = parse_watch_config(FULL_CONFIG).unwrap();
        let ingress = config.watch()[0].ingress.as_ref().unwrap();

        assert_eq!(ingress.poll_interval, ingress.idle);
    }

    #[test]
    fn test_empty_configs_rejected() {
        for yaml in ["", "watch:", "watch: []", "some-key: some-value"] {
            let err = parse_watch_config(yaml).unwrap_err();
            assert!(
                matches!(err, WatchdogError::Configuration(_)),
                "expected configuration error for {:?}",
                yaml
            );
        }
    }

    #[test]
    fn test_incomplete_conditions_rejected() {
        let configs = [
            "watch:\n  - some-key: some-value\n",
            "watch:\n  - buffer: buffer1:8000\n    queue:\n      action: restart\n",
            "watch:\n  - buffer: buffer1:8000\n    egress:\n      action: restart\n",
            "watch:\n  - buffer: buffer1:8000\n    ingress:\n      action: restart\n",
        ];

        for yaml in configs {
            let err = parse_watch_config(yaml).unwrap_err();
            assert!(matches!(err, WatchdogError::Configuration(_)));
        }
    }

    #[test]
    fn test_empty_labels_rejected() {
        let yaml = r#"
watch:
  - buffer: buffer1:8000
    egress:
      action: restart
      idle: 100s
      cooldown: 60s
      container: []
"#;
        let err = parse_watch_config(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one label set"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = r#"
watch:
  - buffer: buffer1:8000
    ingress:
      action: reboot
      idle: 100s
      cooldown: 60s
      container:
        - labels: some-label
"#;
        let err = parse_watch_config(yaml).unwrap_err();
        assert!(matches!(err, WatchdogError::UnknownAction(ref a) if a == "reboot"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = load_watch_config(file.path()).unwrap();
        assert_eq!(config.watch().len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_watch_config("/nonexistent/watchdog.yml").unwrap_err();
        assert!(matches!(err, WatchdogError::Configuration(_)));
    }
}
