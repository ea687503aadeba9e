//! Daemon and registry capabilities for hugodev
//!
//! The orchestrator never talks to Docker or a registry directly. It is handed
//! a [`ContainerProvider`] and a [`RegistryClient`], which makes every lifecycle
//! path testable against a substitute implementation.

mod docker;
mod error;
mod registry;
mod types;

pub use docker::DockerProvider;
pub use error::*;
pub use registry::*;
pub use types::*;

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Container daemon capability
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Check that the daemon is reachable
    async fn ping(&self) -> Result<()>;

    /// Pull an image from a registry, forwarding status lines to `progress`
    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<()>;

    /// Build an image, forwarding build output to `progress`
    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Attach to a running container's stdin/stdout/stderr
    async fn attach(&self, id: &ContainerId) -> Result<AttachStream>;

    /// Stop a container, killing it after `timeout` seconds
    async fn stop(&self, id: &ContainerId, timeout: u32) -> Result<()>;

    /// Remove a container
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Inspect a local image
    async fn inspect_image(&self, image: &str) -> Result<ImageDetails>;

    /// Tag `source` as `repo:tag`
    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()>;
}

/// Duplex stream to an attached container
pub struct AttachStream {
    /// Operator input destined for the container's stdin
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    /// Combined container stdout/stderr
    pub output: Pin<Box<dyn AsyncRead + Send>>,
}

/// Create the Docker provider described by the global config
pub async fn create_provider(
    config: &hugodev_config::GlobalConfig,
) -> Result<Box<dyn ContainerProvider>> {
    let socket = &config.docker.socket;
    match DockerProvider::new(socket).await {
        Ok(provider) => Ok(Box::new(provider)),
        Err(e) => {
            let socket_exists = is_local_socket(socket)
                .map(|path| std::path::Path::new(path).exists())
                .unwrap_or(true);
            Err(ProviderError::ConnectionError(format_connection_error(
                socket,
                socket_exists,
                &e,
            )))
        }
    }
}

fn is_local_socket(socket: &str) -> Option<&str> {
    if socket.starts_with("unix://") {
        Some(socket.trim_start_matches("unix://"))
    } else if socket.starts_with('/') {
        Some(socket)
    } else {
        None
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(socket: &str, socket_exists: bool, underlying: &ProviderError) -> String {
    let mut msg = String::from("Cannot connect to Docker\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket
        ));
        msg.push_str("Make sure Docker Desktop or the Docker daemon is running.\n");
        msg.push_str("On Linux:\n  sudo systemctl enable --now docker\n");
    } else {
        msg.push_str(&format!(
            "The daemon at {} is not responding.\n\n",
            socket
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg.push_str(
        "\nFor troubleshooting help, head here: https://docs.docker.com/engine/daemon/troubleshoot/\n",
    );
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_socket() {
        assert_eq!(
            is_local_socket("unix:///var/run/docker.sock"),
            Some("/var/run/docker.sock")
        );
        assert_eq!(
            is_local_socket("/var/run/docker.sock"),
            Some("/var/run/docker.sock")
        );
        assert_eq!(is_local_socket("tcp://10.0.0.2:2375"), None);
    }

    #[test]
    fn test_connection_error_missing_socket() {
        let msg = format_connection_error(
            "/nope/docker.sock",
            false,
            &ProviderError::ConnectionError("refused".into()),
        );
        assert!(msg.contains("was not found at"));
        assert!(msg.contains("/nope/docker.sock"));
        assert!(msg.contains("troubleshoot"));
    }

    #[test]
    fn test_connection_error_unresponsive_daemon() {
        let msg = format_connection_error(
            "/var/run/docker.sock",
            true,
            &ProviderError::ConnectionError("refused".into()),
        );
        assert!(msg.contains("not responding"));
        assert!(msg.contains("refused"));
    }
}
