//! Remediation dispatch
//!
//! Resolves the containers selected by a label selector and applies an action to each of
//! them. One container failing does not stop the others.

use crate::error::Result;
use crate::models::{Action, LabelSelector};
use crate::runtime::{Container, ContainerRuntime};
use std::sync::Arc;
use tracing::{debug, error};

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Containers resolved from the selector, duplicates included
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Applies remediation actions through the container runtime
#[derive(Clone)]
pub struct ActionDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ActionDispatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Containers matched by each label set, concatenated in selector order
    pub async fn resolve(&self, selector: &LabelSelector) -> Result<Vec<Container>> {
        let mut containers = Vec::new();
        for labels in selector.sets() {
            containers.extend(self.runtime.list_containers(labels).await?);
        }
        Ok(containers)
    }

    /// Apply `action` to every container selected by `selector`
    pub async fn dispatch(&self, action: Action, selector: &LabelSelector) -> Result<DispatchSummary> {
        let containers = self.resolve(selector).await?;

        let mut summary = DispatchSummary {
            matched: containers.len(),
            ..Default::default()
        };

        if containers.is_empty() {
            debug!(selector = ?selector.sets(), "No containers found for selector");
            return Ok(summary);
        }

        debug!(action = %action, containers = containers.len(), "Applying action to containers");
        for container in &containers {
            let result = match action {
                Action::Stop => self.runtime.stop_container(container).await,
                Action::Restart => self.runtime.restart_container(container).await,
            };

            match result {
                Ok(()) => {
                    summary.succeeded += 1;
                    debug!(container_id = %container.id, action = %action, "Container action applied");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        container_id = %container.id,
                        action = %action,
                        error = %e,
                        "Failed to apply action to container, skipping"
                    );
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchdogError;
    use crate::models::LabelSet;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Runtime returning canned containers per label set and recording every call
    #[derive(Default)]
    struct MockRuntime {
        containers: HashMap<Vec<String>, Vec<Container>>,
        failing: Vec<String>,
        list_fails: bool,
        queries: Mutex<Vec<Vec<String>>>,
        stopped: Mutex<Vec<String>>,
        restarted: Mutex<Vec<String>>,
    }

    impl MockRuntime {
        fn with(mut self, labels: &[&str], ids: &[&str]) -> Self {
            self.containers.insert(
                labels.iter().map(|l| l.to_string()).collect(),
                ids.iter().map(|id| Container::new(*id)).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn list_containers(&self, labels: &LabelSet) -> Result<Vec<Container>> {
            self.queries.lock().unwrap().push(labels.labels().to_vec());
            if self.list_fails {
                return Err(WatchdogError::ContainerList {
                    labels: labels.labels().to_vec(),
                    message: "daemon unavailable".to_string(),
                });
            }
            Ok(self.containers.get(labels.labels()).cloned().unwrap_or_default())
        }

        async fn stop_container(&self, container: &Container) -> Result<()> {
            self.stopped.lock().unwrap().push(container.id.clone());
            self.fail_if_configured(container, "stop")
        }

        async fn restart_container(&self, container: &Container) -> Result<()> {
            self.restarted.lock().unwrap().push(container.id.clone());
            self.fail_if_configured(container, "restart")
        }

        async fn close(&self) {}
    }

    impl MockRuntime {
        fn fail_if_configured(&self, container: &Container, action: &str) -> Result<()> {
            if self.failing.contains(&container.id) {
                return Err(WatchdogError::ContainerAction {
                    action: action.to_string(),
                    container_id: container.id.clone(),
                    message: "conflict".to_string(),
                });
            }
            Ok(())
        }
    }

    fn selector(sets: &[&[&str]]) -> LabelSelector {
        LabelSelector::new(sets.iter().map(|s| LabelSet::new(s.iter().copied())).collect())
    }

    #[tokio::test]
    async fn test_one_query_per_label_set_without_dedup() {
        let runtime = Arc::new(
            MockRuntime::default()
                .with(&["l1"], &["c1", "shared"])
                .with(&["l2", "l3"], &["shared"]),
        );
        let dispatcher = ActionDispatcher::new(runtime.clone());

        let summary = dispatcher
            .dispatch(Action::Restart, &selector(&[&["l1"], &["l2", "l3"]]))
            .await
            .unwrap();

        assert_eq!(
            *runtime.queries.lock().unwrap(),
            vec![vec!["l1".to_string()], vec!["l2".to_string(), "l3".to_string()]]
        );
        assert_eq!(*runtime.restarted.lock().unwrap(), vec!["c1", "shared", "shared"]);
        assert_eq!(summary, DispatchSummary { matched: 3, succeeded: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_stop_action() {
        let runtime = Arc::new(MockRuntime::default().with(&["label1"], &["c1", "c2"]));
        let dispatcher = ActionDispatcher::new(runtime.clone());

        dispatcher
            .dispatch(Action::Stop, &selector(&[&["label1"]]))
            .await
            .unwrap();

        assert_eq!(*runtime.stopped.lock().unwrap(), vec!["c1", "c2"]);
        assert!(runtime.restarted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_container_set_is_noop() {
        for action in [Action::Stop, Action::Restart] {
            let runtime = Arc::new(MockRuntime::default());
            let dispatcher = ActionDispatcher::new(runtime.clone());

            let summary = dispatcher
                .dispatch(action, &selector(&[&["label1"]]))
                .await
                .unwrap();

            assert_eq!(summary, DispatchSummary::default());
            assert_eq!(runtime.queries.lock().unwrap().len(), 1);
            assert!(runtime.stopped.lock().unwrap().is_empty());
            assert!(runtime.restarted.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_container_failure_does_not_abort_batch() {
        let runtime = Arc::new(MockRuntime {
            failing: vec!["c2".to_string()],
            ..MockRuntime::default().with(&["label1"], &["c1", "c2", "c3"])
        });
        let dispatcher = ActionDispatcher::new(runtime.clone());

        let summary = dispatcher
            .dispatch(Action::Restart, &selector(&[&["label1"]]))
            .await
            .unwrap();

        assert_eq!(*runtime.restarted.lock().unwrap(), vec!["c1", "c2", "c3"]);
        assert_eq!(summary, DispatchSummary { matched: 3, succeeded: 2, failed: 1 });
    }

    #[tokio::test]
    async fn test_list_failure_aborts_dispatch() {
        let runtime = Arc::new(MockRuntime {
            list_fails: true,
            ..MockRuntime::default()
        });
        let dispatcher = ActionDispatcher::new(runtime.clone());

        let err = dispatcher
            .dispatch(Action::Stop, &selector(&[&["label1"], &["label2"]]))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchdogError::ContainerList { .. }));
        assert_eq!(runtime.queries.lock().unwrap().len(), 1);
        assert!(runtime.stopped.lock().unwrap().is_empty());
    }
}
