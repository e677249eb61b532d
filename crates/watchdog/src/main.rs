//! Pipeline Watchdog - buffer health watchdog for message pipelines
//!
//! Polls the metrics endpoint of every configured buffer and restarts or stops the
//! containers around a buffer whose queue backs up or whose traffic goes idle.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_lib::{
    config::load_watch_config,
    health::HealthRegistry,
    metrics::HttpMetricsSource,
    observability::{StructuredLogger, WatchdogMetrics},
    runtime::{ContainerRuntime, DockerClient},
    SupervisorBuilder,
};

mod api;
mod config;
mod run;

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stop and restart wait for the container to exit before answering
const DOCKER_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    let filter = config::log_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        std::env::var(config::LOG_LEVEL_ENV).ok(),
    );
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = WATCHDOG_VERSION, "Starting pipeline-watchdog");

    let settings = config::WatchdogSettings::load()?;
    let watch_config = load_watch_config(&settings.config_file_path).with_context(|| {
        format!(
            "Failed to load watch configuration from {}",
            settings.config_file_path.display()
        )
    })?;
    info!(
        config_file = %settings.config_file_path.display(),
        buffers = watch_config.watch().len(),
        watchers = watch_config.watcher_count(),
        failure_policy = ?settings.failure_policy,
        "Watchdog configured"
    );

    let health_registry = HealthRegistry::new();
    let metrics = WatchdogMetrics::new();
    let logger = StructuredLogger::default();

    let source = Arc::new(HttpMetricsSource::new(settings.metrics_timeout())?);
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerClient::new(&settings.docker_host, DOCKER_TIMEOUT)?);

    let buffers = watch_config.watch().len();
    let watchers = watch_config.watcher_count();
    let (supervisor, failures) = SupervisorBuilder::new()
        .config(watch_config)
        .source(source)
        .runtime(runtime.clone())
        .policy(settings.failure_policy)
        .health(health_registry.clone())
        .metrics(metrics)
        .logger(logger.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry));
    let api_handle = tokio::spawn(api::serve(
        settings.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    logger.log_startup(WATCHDOG_VERSION, buffers, watchers);
    let outcome = run::supervise(
        supervisor,
        failures,
        &shutdown_tx,
        shutdown_signal(),
        &logger,
    )
    .await;

    // Watchers have all observed cancellation by now
    runtime.close().await;

    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server exited with an error"),
        Err(e) => warn!(error = %e, "API server task panicked"),
    }

    // A watcher failure exits with status 1
    outcome?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM with the name of the signal
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
