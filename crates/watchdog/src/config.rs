//! Process settings

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use watchdog_lib::runtime::DEFAULT_DOCKER_HOST;
use watchdog_lib::FailurePolicy;

/// Environment variable naming the watch configuration file when `WATCHDOG_CONFIG_FILE_PATH`
/// is not set
pub const CONFIG_FILE_PATH_ENV: &str = "CONFIG_FILE_PATH";

/// Docker daemon address used when `WATCHDOG_DOCKER_HOST` is not set
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Log level used when `RUST_LOG` is not set
pub const LOG_LEVEL_ENV: &str = "LOGLEVEL";

/// Unprefixed variables that settings fall back to
#[derive(Debug, Default)]
struct Fallbacks {
    config_file_path: Option<String>,
    docker_host: Option<String>,
}

impl Fallbacks {
    fn from_process_env() -> Self {
        Self {
            config_file_path: std::env::var(CONFIG_FILE_PATH_ENV).ok(),
            docker_host: std::env::var(DOCKER_HOST_ENV).ok().filter(|h| !h.is_empty()),
        }
    }
}

/// Watchdog process settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    /// Path to the YAML watch configuration
    pub config_file_path: PathBuf,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Docker Engine API endpoint, `unix://` socket or `http(s)://`/`tcp://` address
    pub docker_host: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Timeout for buffer metrics requests in seconds
    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_metrics_timeout() -> u64 {
    10
}

impl WatchdogSettings {
    /// Load settings from `WATCHDOG_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(
            config::Environment::with_prefix("WATCHDOG"),
            Fallbacks::from_process_env(),
        )
    }

    fn from_env(env: config::Environment, fallbacks: Fallbacks) -> Result<Self> {
        let docker_host = fallbacks
            .docker_host
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());

        let settings = config::Config::builder()
            .set_default("config_file_path", fallbacks.config_file_path)?
            .set_default("docker_host", docker_host)?
            .add_source(env)
            .build()?;

        settings.try_deserialize().with_context(|| {
            format!(
                "WATCHDOG_CONFIG_FILE_PATH or {} must name the watch configuration file",
                CONFIG_FILE_PATH_ENV
            )
        })
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics_timeout_secs)
    }
}

/// Tracing filter from `RUST_LOG`, else from a `LOGLEVEL` name such as `DEBUG` or `WARNING`
pub fn log_filter(rust_log: Option<String>, log_level: Option<String>) -> String {
    if let Some(filter) = rust_log.filter(|f| !f.trim().is_empty()) {
        return filter;
    }

    let level = log_level.unwrap_or_default().trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "error" => level,
        "warn" | "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        _ => "info".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("WATCHDOG").source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let settings = WatchdogSettings::from_env(
            env(&[("WATCHDOG_CONFIG_FILE_PATH", "/etc/watchdog.yml")]),
            Fallbacks::default(),
        )
        .unwrap();

        assert_eq!(settings.config_file_path, PathBuf::from("/etc/watchdog.yml"));
        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.docker_host, "unix:///var/run/docker.sock");
        assert_eq!(settings.failure_policy, FailurePolicy::Isolated);
        assert_eq!(settings.metrics_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let settings = WatchdogSettings::from_env(
            env(&[
                ("WATCHDOG_CONFIG_FILE_PATH", "/etc/watchdog.yml"),
                ("WATCHDOG_API_PORT", "9100"),
                ("WATCHDOG_DOCKER_HOST", "tcp://docker:2375"),
                ("WATCHDOG_FAILURE_POLICY", "all_or_nothing"),
                ("WATCHDOG_METRICS_TIMEOUT_SECS", "3"),
            ]),
            Fallbacks {
                docker_host: Some("unix:///run/user/1000/docker.sock".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(settings.api_port, 9100);
        assert_eq!(settings.docker_host, "tcp://docker:2375");
        assert_eq!(settings.failure_policy, FailurePolicy::AllOrNothing);
        assert_eq!(settings.metrics_timeout_secs, 3);
    }

    #[test]
    fn test_config_file_path_fallback() {
        let fallbacks = || Fallbacks {
            config_file_path: Some("/config/watchdog.yml".to_string()),
            ..Default::default()
        };

        let settings = WatchdogSettings::from_env(env(&[]), fallbacks()).unwrap();
        assert_eq!(settings.config_file_path, PathBuf::from("/config/watchdog.yml"));

        let settings = WatchdogSettings::from_env(
            env(&[("WATCHDOG_CONFIG_FILE_PATH", "/preferred.yml")]),
            fallbacks(),
        )
        .unwrap();
        assert_eq!(settings.config_file_path, PathBuf::from("/preferred.yml"));
    }

    #[test]
    fn test_missing_config_file_path() {
        let err = WatchdogSettings::from_env(env(&[]), Fallbacks::default()).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE_PATH_ENV));
    }

    #[test]
    fn test_docker_host_fallback() {
        let settings = WatchdogSettings::from_env(
            env(&[("WATCHDOG_CONFIG_FILE_PATH", "/etc/watchdog.yml")]),
            Fallbacks {
                docker_host: Some("tcp://10.0.0.5:2375".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(settings.docker_host, "tcp://10.0.0.5:2375");
    }

    #[test]
    fn test_log_filter() {
        let some = |s: &str| Some(s.to_string());

        assert_eq!(log_filter(None, None), "info");
        assert_eq!(log_filter(None, some("DEBUG")), "debug");
        assert_eq!(log_filter(None, some("WARNING")), "warn");
        assert_eq!(log_filter(None, some("CRITICAL")), "error");
        assert_eq!(log_filter(None, some("verbose")), "info");
        assert_eq!(log_filter(some("watchdog_lib=trace"), some("ERROR")), "watchdog_lib=trace");
        assert_eq!(log_filter(some(""), some("ERROR")), "error");
    }
}
