//! Docker Engine API client
//!
//! Speaks HTTP either over TCP (`tcp://` / `http://` hosts) or over the daemon's Unix socket
//! (`unix://` hosts or a bare socket path).

use super::{Container, ContainerRuntime};
use crate::error::{Result, WatchdogError};
use crate::models::LabelSet;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Socket the Docker daemon listens on by default
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default Docker host when neither the settings nor `DOCKER_HOST` name one
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

#[derive(Debug, Clone)]
enum Endpoint {
    Tcp { client: Client, base_url: Url },
    Unix { socket: PathBuf },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { base_url, .. } => write!(f, "{}", base_url),
            Endpoint::Unix { socket } => write!(f, "unix://{}", socket.display()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
}

impl Verb {
    fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

/// Raw daemon answer: status code and body
struct Reply {
    status: u16,
    body: Bytes,
}

impl Reply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn describe(&self) -> String {
        format!("status {}: {}", self.status, String::from_utf8_lossy(&self.body).trim())
    }
}

/// Talks to the Docker daemon over TCP or its Unix socket
#[derive(Debug, Clone)]
pub struct DockerClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl DockerClient {
    /// Create a client for `host`, e.g. `unix:///var/run/docker.sock`,
    /// `tcp://docker:2375` or `http://localhost:2375`
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let host = host.trim();
        let invalid = |reason: String| {
            WatchdogError::Configuration(format!("invalid Docker host `{}`: {}", host, reason))
        };

        let socket = host
            .strip_prefix("unix://")
            .or_else(|| host.starts_with('/').then_some(host));
        if let Some(socket) = socket {
            if socket.is_empty() {
                return Err(invalid("missing socket path".to_string()));
            }
            return Ok(Self {
                endpoint: Endpoint::Unix {
                    socket: PathBuf::from(socket),
                },
                timeout,
            });
        }

        let normalized = match host.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => host.to_string(),
        };

        let mut base_url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", base_url.scheme())));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WatchdogError::Configuration(format!("failed to create Docker client: {}", e))
        })?;

        Ok(Self {
            endpoint: Endpoint::Tcp { client, base_url },
            timeout,
        })
    }

    /// Send a bodyless request; `path` is absolute and may carry a query string
    async fn send(&self, verb: Verb, path: &str) -> std::result::Result<Reply, String> {
        match &self.endpoint {
            Endpoint::Tcp { client, base_url } => {
                let url = base_url
                    .join(path.trim_start_matches('/'))
                    .map_err(|e| e.to_string())?;
                let request = match verb {
                    Verb::Get => client.get(url),
                    Verb::Post => client.post(url),
                };

                let response = request.send().await.map_err(|e| e.to_string())?;
                let status = response.status().as_u16();
                let body = response.bytes().await.map_err(|e| e.to_string())?;
                Ok(Reply { status, body })
            }
            Endpoint::Unix { socket } => {
                tokio::time::timeout(self.timeout, send_over_socket(socket, verb, path))
                    .await
                    .map_err(|_| format!("request timed out after {:?}", self.timeout))?
            }
        }
    }

    async fn post_action(&self, container: &Container, action: &str) -> Result<()> {
        let action_error = |message: String| WatchdogError::ContainerAction {
            action: action.to_string(),
            container_id: container.id.clone(),
            message,
        };

        let path = format!("/containers/{}/{}", container.id, action);
        let reply = self.send(Verb::Post, &path).await.map_err(action_error)?;

        match reply.status {
            _ if reply.is_success() => Ok(()),
            // Already stopped
            304 if action == "stop" => Ok(()),
            _ => Err(action_error(reply.describe())),
        }
    }
}

/// One HTTP/1 exchange over a fresh connection to the daemon socket
async fn send_over_socket(
    socket: &Path,
    verb: Verb,
    path: &str,
) -> std::result::Result<Reply, String> {
    use http_body_util::{BodyExt, Empty};

    let stream = tokio::net::UnixStream::connect(socket)
        .await
        .map_err(|e| format!("failed to connect to {}: {}", socket.display(), e))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake failed: {}", e))?;

    // Drive the connection in the background
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "Docker socket connection closed with an error");
        }
    });

    let request = http::Request::builder()
        .method(verb.as_str())
        .uri(path)
        .header(http::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(|e| e.to_string())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();

    Ok(Reply { status, body })
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_containers(&self, labels: &LabelSet) -> Result<Vec<Container>> {
        let list_error = |message: String| WatchdogError::ContainerList {
            labels: labels.labels().to_vec(),
            message,
        };

        let filters = serde_json::json!({ "label": labels.labels() }).to_string();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("all", "true")
            .append_pair("filters", &filters)
            .finish();

        let reply = self
            .send(Verb::Get, &format!("/containers/json?{}", query))
            .await
            .map_err(list_error)?;
        if !reply.is_success() {
            return Err(list_error(reply.describe()));
        }

        let containers: Vec<Container> = serde_json::from_slice(&reply.body)
            .map_err(|e| list_error(format!("invalid response: {}", e)))?;

        debug!(labels = ?labels.labels(), count = containers.len(), "Listed containers");
        Ok(containers)
    }

    async fn stop_container(&self, container: &Container) -> Result<()> {
        self.post_action(container, "stop").await
    }

    async fn restart_container(&self, container: &Container) -> Result<()> {
        self.post_action(container, "restart").await
    }

    async fn close(&self) {
        info!(host = %self.endpoint, "Closing Docker client");
    }
}
