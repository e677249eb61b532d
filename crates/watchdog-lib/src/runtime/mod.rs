//! Container runtime access
//!
//! The watchdog only needs to find containers by label and stop or restart them.
//! [`DockerClient`] implements this against the Docker Engine HTTP API.

mod docker;

pub use docker::{DockerClient, DEFAULT_DOCKER_HOST, DEFAULT_DOCKER_SOCKET};

use crate::error::Result;
use crate::models::LabelSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A container known to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            names: Vec::new(),
        }
    }
}

/// Capability to query and act on containers. Must tolerate concurrent use.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers (running or not) carrying every label of `labels`
    async fn list_containers(&self, labels: &LabelSet) -> Result<Vec<Container>>;

    async fn stop_container(&self, container: &Container) -> Result<()>;

    async fn restart_container(&self, container: &Container) -> Result<()>;

    /// Release runtime resources once no watcher uses the runtime anymore
    async fn close(&self);
}
