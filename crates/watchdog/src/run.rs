//! Process run loop
//!
//! Runs the watch group until a shutdown signal arrives or a watcher fails. A single
//! watcher failure ends the process with an error under either failure policy.

use anyhow::{Context, Result};
use std::future::Future;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;
use tracing::{error, info};
use watchdog_lib::{StructuredLogger, Supervisor, WatcherFailure};

enum Stopped {
    Signal(&'static str),
    Failure(WatcherFailure),
    Finished(std::result::Result<watchdog_lib::Result<()>, JoinError>),
}

/// Run `supervisor` until `signal` resolves, a watcher fails or the group ends.
///
/// Watchers are told to stop through `shutdown_tx` and have all ended when this returns.
pub async fn supervise<S>(
    supervisor: Supervisor,
    mut failures: mpsc::Receiver<WatcherFailure>,
    shutdown_tx: &broadcast::Sender<()>,
    signal: S,
    logger: &StructuredLogger,
) -> Result<()>
where
    S: Future<Output = &'static str>,
{
    let mut handle = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));
    tokio::pin!(signal);

    let stopped = tokio::select! {
        reason = &mut signal => Stopped::Signal(reason),
        Some(failure) = failures.recv() => Stopped::Failure(failure),
        joined = &mut handle => Stopped::Finished(joined),
    };

    let (failure, joined) = match stopped {
        Stopped::Signal(reason) => {
            logger.log_shutdown(reason);
            (None, None)
        }
        Stopped::Failure(failure) => (Some(failure), None),
        Stopped::Finished(joined) => (None, Some(joined)),
    };

    let _ = shutdown_tx.send(());
    let joined = match joined {
        Some(joined) => joined,
        None => handle.await,
    };
    let outcome = joined.context("Supervisor task panicked")?;

    if let Some(failure) = failure {
        error!(
            watcher = %failure.watcher,
            reason = %failure.reason,
            "Watcher failed, stopping the watchdog"
        );
        logger.log_shutdown("watcher failure");
        anyhow::bail!("Pipeline watchdog stopped after a watcher failure: {}", failure);
    }

    if let Err(e) = outcome {
        error!(error = %e, "Watch group ended with a failure");
        logger.log_shutdown("watcher failure");
        return Err(e).context("Pipeline watchdog stopped after a watcher failure");
    }

    info!("Watch group stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use watchdog_lib::runtime::{Container, ContainerRuntime};
    use watchdog_lib::{
        metrics::MetricsSource, Action, LabelSelector, LabelSet, QueueCondition, SupervisorBuilder,
        WatchSpec, WatchdogConfig, WatchdogError,
    };

    const COOLDOWN: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct MockBuffers {
        payloads: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MockBuffers {
        fn fetches(&self, buffer: &str) -> usize {
            self.fetched
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.as_str() == buffer)
                .count()
        }
    }

    #[async_trait]
    impl MetricsSource for MockBuffers {
        async fn fetch(&self, buffer: &str) -> watchdog_lib::Result<Vec<u8>> {
            self.fetched.lock().unwrap().push(buffer.to_string());
            self.payloads
                .get(buffer)
                .map(|p| p.clone().into_bytes())
                .ok_or_else(|| WatchdogError::MetricsFetch {
                    buffer: buffer.to_string(),
                    message: "connection refused".to_string(),
                })
        }
    }

    struct NoContainers;

    #[async_trait]
    impl ContainerRuntime for NoContainers {
        async fn list_containers(&self, _labels: &LabelSet) -> watchdog_lib::Result<Vec<Container>> {
            Ok(Vec::new())
        }

        async fn stop_container(&self, _container: &Container) -> watchdog_lib::Result<()> {
            Ok(())
        }

        async fn restart_container(&self, _container: &Container) -> watchdog_lib::Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn spec(buffer: &str) -> WatchSpec {
        WatchSpec {
            buffer: buffer.to_string(),
            queue: Some(QueueCondition {
                action: Action::Restart,
                length: 10,
                cooldown: COOLDOWN,
                poll_interval: Duration::from_secs(5),
                selector: LabelSelector::new(vec![LabelSet::new(["worker"])]),
            }),
            egress: None,
            ingress: None,
        }
    }

    fn buffers(healthy: &[&str]) -> Arc<MockBuffers> {
        let payloads = healthy
            .iter()
            .map(|b| (b.to_string(), "buffer_size{} 0 1\n".to_string()))
            .collect();
        Arc::new(MockBuffers {
            payloads,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_failure_stops_the_process_with_an_error() {
        let buffers = buffers(&["run-test:ok"]);
        let (supervisor, failures) = SupervisorBuilder::new()
            .config(WatchdogConfig::new(vec![spec("run-test:ok"), spec("run-test:down")]).unwrap())
            .source(buffers.clone())
            .runtime(Arc::new(NoContainers))
            .build()
            .unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);

        let started = Instant::now();
        let err = supervise(
            supervisor,
            failures,
            &shutdown_tx,
            std::future::pending(),
            &StructuredLogger::default(),
        )
        .await
        .unwrap_err();

        // The unreachable buffer fails on its first poll, right after warm-up
        assert!(err.to_string().contains("run-test:down/queue"));
        assert!(started.elapsed() < COOLDOWN * 2);
        assert_eq!(buffers.fetches("run-test:down"), 1);

        // The healthy sibling was still polling and has been stopped as well
        let polls = buffers.fetches("run-test:ok");
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(buffers.fetches("run-test:ok"), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_stops_the_process_cleanly() {
        let buffers = buffers(&["run-test:a", "run-test:b"]);
        let (supervisor, failures) = SupervisorBuilder::new()
            .config(WatchdogConfig::new(vec![spec("run-test:a"), spec("run-test:b")]).unwrap())
            .source(buffers.clone())
            .runtime(Arc::new(NoContainers))
            .build()
            .unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);

        let signal = async {
            tokio::time::sleep(COOLDOWN * 2).await;
            "SIGTERM received"
        };
        supervise(
            supervisor,
            failures,
            &shutdown_tx,
            signal,
            &StructuredLogger::default(),
        )
        .await
        .unwrap();

        assert!(buffers.fetches("run-test:a") > 1);
        let polls = buffers.fetches("run-test:a");
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(buffers.fetches("run-test:a"), polls);
    }
}
