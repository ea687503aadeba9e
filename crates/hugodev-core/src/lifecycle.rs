//! Container lifecycle: start, attach, stop, restart
//!
//! The manager owns at most one container at a time. Its state moves
//! `Absent -> Starting -> Running -> Stopping -> Absent`; anything else is
//! rejected with [`CoreError::InvalidState`].

use crate::path::translate_host_path;
use crate::{CoreError, OperatorIo, Result};
use hugodev_config::ServerConfig;
use hugodev_provider::{
    ContainerId, ContainerProvider, CreateContainerConfig, MountConfig, PortConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// Label set on every container this tool creates
pub const MANAGED_LABEL: &str = "hugodev.managed";

/// The container currently owned by a [`LifecycleManager`].
///
/// Only `start` hands these out, and `stop` consumes them.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    id: ContainerId,
}

impl ContainerHandle {
    pub(crate) fn new(id: ContainerId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Absent,
    Starting,
    Running,
    Stopping,
}

/// Forwarding tasks bridging the operator terminal and one container
pub struct Attachment {
    container: ContainerId,
    output_task: JoinHandle<()>,
    input_task: JoinHandle<()>,
}

impl Attachment {
    pub fn container_id(&self) -> &ContainerId {
        &self.container
    }

    /// True once the container closed its output
    pub fn is_finished(&self) -> bool {
        self.output_task.is_finished()
    }

    /// Stop forwarding; used before the container is torn down
    pub fn abort(self) {
        self.output_task.abort();
        self.input_task.abort();
    }
}

pub struct LifecycleManager {
    provider: Arc<dyn ContainerProvider>,
    io: Arc<dyn OperatorIo>,
    state: HandleState,
    current: Option<ContainerId>,
}

impl LifecycleManager {
    pub fn new(provider: Arc<dyn ContainerProvider>, io: Arc<dyn OperatorIo>) -> Self {
        Self {
            provider,
            io,
            state: HandleState::Absent,
            current: None,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Create and start a container for `cfg`
    pub async fn start(&mut self, cfg: &ServerConfig) -> Result<ContainerHandle> {
        if self.state != HandleState::Absent {
            return Err(CoreError::InvalidState(format!(
                "cannot start a container while one is {:?}",
                self.state
            )));
        }
        self.state = HandleState::Starting;

        let config = container_config(cfg);
        tracing::debug!("Creating container from {}", config.image);

        let id = match self.provider.create(&config).await {
            Ok(id) => id,
            Err(e) => {
                self.state = HandleState::Absent;
                return Err(e.into());
            }
        };

        if let Err(e) = self.provider.start(&id).await {
            tracing::warn!("Container {} failed to start, removing it", id.short());
            if let Err(remove_err) = self.provider.remove(&id, true).await {
                tracing::warn!("Failed to remove container {}: {}", id.short(), remove_err);
            }
            self.state = HandleState::Absent;
            return Err(e.into());
        }

        tracing::info!(
            "Started container {} serving http://localhost:{}",
            id.short(),
            cfg.host_port()
        );
        self.state = HandleState::Running;
        self.current = Some(id.clone());
        Ok(ContainerHandle::new(id))
    }

    /// Bridge the container's streams to the operator terminal.
    ///
    /// Forwarding runs in the background; its failures are logged only.
    pub async fn attach(&self, handle: &ContainerHandle) -> Result<Attachment> {
        self.ensure_owned(handle)?;

        let stream = self.provider.attach(handle.id()).await?;
        let mut container_output = stream.output;
        let mut container_input = stream.input;

        let mut operator_output = self.io.output();
        let short = handle.id().short().to_string();
        let output_task = tokio::spawn(async move {
            match tokio::io::copy(&mut container_output, &mut operator_output).await {
                Ok(_) => tracing::debug!("Output of container {} closed", short),
                Err(e) => tracing::warn!("Forwarding output of container {} failed: {}", short, e),
            }
            let _ = operator_output.flush().await;
        });

        let mut operator_input = self.io.input();
        let short = handle.id().short().to_string();
        let input_task = tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut operator_input, &mut container_input).await {
                tracing::warn!("Forwarding input to container {} failed: {}", short, e);
            }
        });

        Ok(Attachment {
            container: handle.id().clone(),
            output_task,
            input_task,
        })
    }

    /// Stop with the configured grace period, then force-remove.
    ///
    /// Best effort: failures are logged and the handle is gone either way.
    pub async fn stop(&mut self, handle: ContainerHandle, timeout: u32) {
        if let Err(e) = self.ensure_owned(&handle) {
            tracing::warn!("Not stopping container {}: {}", handle.id().short(), e);
            return;
        }
        self.state = HandleState::Stopping;

        let id = handle.id;
        tracing::info!("Stopping container {}", id.short());
        if let Err(e) = self.provider.stop(&id, timeout).await {
            tracing::warn!("Failed to stop container {}: {}", id.short(), e);
        }
        if let Err(e) = self.provider.remove(&id, true).await {
            tracing::warn!("Failed to remove container {}: {}", id.short(), e);
        }

        self.current = None;
        self.state = HandleState::Absent;
    }

    /// Stop `old`, then start a fresh container. The caller re-attaches.
    pub async fn restart(
        &mut self,
        cfg: &ServerConfig,
        old: ContainerHandle,
    ) -> Result<ContainerHandle> {
        self.stop(old, cfg.stop_timeout()).await;
        self.start(cfg).await
    }

    fn ensure_owned(&self, handle: &ContainerHandle) -> Result<()> {
        if self.state != HandleState::Running {
            return Err(CoreError::InvalidState(format!(
                "container {} is not running ({:?})",
                handle.id().short(),
                self.state
            )));
        }
        if self.current.as_ref() != Some(handle.id()) {
            return Err(CoreError::InvalidState(format!(
                "container {} is not managed here",
                handle.id().short()
            )));
        }
        Ok(())
    }
}

/// Daemon-side description of the development container
pub fn container_config(cfg: &ServerConfig) -> CreateContainerConfig {
    CreateContainerConfig {
        image: cfg.image().to_string(),
        cmd: Some(cfg.command().to_vec()),
        mounts: mounts(cfg),
        ports: vec![PortConfig {
            host_port: Some(cfg.host_port()),
            container_port: cfg.container_port(),
            protocol: "tcp".to_string(),
            host_ip: Some(cfg.host_ip().to_string()),
        }],
        tty: true,
        stdin_open: true,
        labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
    }
}

/// Watched directory bind, plus the config file bind when enabled and present
pub fn mounts(cfg: &ServerConfig) -> Vec<MountConfig> {
    let mut mounts = vec![MountConfig {
        source: translate_host_path(cfg.watch_dir()),
        target: cfg.repo_target().to_string(),
        read_only: false,
    }];

    if cfg.mount_config() {
        let config_path = cfg.config_path();
        if config_path.is_file() {
            mounts.push(MountConfig {
                source: translate_host_path(&config_path),
                target: cfg.config_target().to_string(),
                read_only: false,
            });
        } else {
            tracing::warn!(
                "{} not found, starting without it",
                config_path.display()
            );
        }
    }

    mounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider, NullIo};
    use hugodev_config::GlobalConfig;
    use hugodev_provider::{ErrorKind, ProviderError};

    fn server_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig::builder(&GlobalConfig::default())
            .watch_dir(dir)
            .build()
            .unwrap()
    }

    fn manager(provider: &Arc<MockProvider>) -> LifecycleManager {
        LifecycleManager::new(provider.clone(), Arc::new(NullIo))
    }

    #[test]
    fn test_container_config() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let config = container_config(&cfg);

        assert_eq!(config.image, "fortinet-hugo:latest");
        assert_eq!(
            config.cmd,
            Some(vec!["server".into(), "--bind".into(), "0.0.0.0".into()])
        );
        assert!(config.tty);
        assert!(config.stdin_open);
        assert_eq!(config.ports.len(), 1);
        assert_eq!(config.ports[0].container_key(), "1313/tcp");
        assert_eq!(config.ports[0].host_port, Some(1313));
        assert_eq!(config.ports[0].host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].target, "/home/UserRepo");
    }

    #[test]
    fn test_config_file_mount() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hugo.toml"), "title = 'site'").unwrap();
        let cfg = ServerConfig::builder(&GlobalConfig::default())
            .watch_dir(tmp.path())
            .mount_config(true)
            .build()
            .unwrap();

        let mounts = mounts(&cfg);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].target, "/home/CentralRepo/hugo.toml");
        assert!(mounts[1].source.ends_with("hugo.toml"));
    }

    #[test]
    fn test_missing_config_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::builder(&GlobalConfig::default())
            .watch_dir(tmp.path())
            .mount_config(true)
            .build()
            .unwrap();

        assert_eq!(mounts(&cfg).len(), 1);
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        let mut lifecycle = manager(&provider);

        let handle = lifecycle.start(&cfg).await.unwrap();
        assert_eq!(lifecycle.state(), HandleState::Running);
        assert_eq!(provider.live_count(), 1);

        let id = handle.id().to_string();
        lifecycle.stop(handle, 10).await;
        assert_eq!(lifecycle.state(), HandleState::Absent);
        assert_eq!(provider.live_count(), 0);
        assert!(provider.was_called(&MockCall::Stop {
            id: id.clone(),
            timeout: 10
        }));
        assert!(provider.was_called(&MockCall::Remove { id, force: true }));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        let mut lifecycle = manager(&provider);

        let _handle = lifecycle.start(&cfg).await.unwrap();
        let err = lifecycle.start(&cfg).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));
        assert_eq!(provider.live_count(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_cause() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        provider.fail_create(ProviderError::NotFound("No such image: fortinet-hugo".into()));
        let mut lifecycle = manager(&provider);

        let err = lifecycle.start(&cfg).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("No such image"));
        assert_eq!(lifecycle.state(), HandleState::Absent);
        assert!(!provider
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Start { .. })));
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        provider.fail_start(ProviderError::DaemonError("port is already allocated".into()));
        let mut lifecycle = manager(&provider);

        let err = lifecycle.start(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("port is already allocated"));
        assert_eq!(provider.live_count(), 0);
        assert!(provider.was_called(&MockCall::Remove {
            id: "mock-container-1".into(),
            force: true
        }));
        assert_eq!(lifecycle.state(), HandleState::Absent);
    }

    #[tokio::test]
    async fn test_stop_errors_are_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        *provider.stop_result.lock().unwrap() =
            Err(ProviderError::DaemonError("container is not running".into()));
        let mut lifecycle = manager(&provider);

        let handle = lifecycle.start(&cfg).await.unwrap();
        lifecycle.stop(handle, 10).await;

        assert_eq!(lifecycle.state(), HandleState::Absent);
        assert_eq!(provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_replaces_container() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        let mut lifecycle = manager(&provider);

        let first = lifecycle.start(&cfg).await.unwrap();
        let first_id = first.id().clone();
        let second = lifecycle.restart(&cfg, first).await.unwrap();

        assert_ne!(second.id(), &first_id);
        assert_eq!(provider.live_count(), 1);
        assert_eq!(provider.max_live(), 1);
    }

    #[tokio::test]
    async fn test_attach_forwards_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        *provider.attach_output.lock().unwrap() = b"Web Server is available\n".to_vec();
        let io = Arc::new(crate::test_support::CaptureIo::new(b"q\n"));
        let mut lifecycle = LifecycleManager::new(provider.clone(), io.clone());

        let handle = lifecycle.start(&cfg).await.unwrap();
        let attachment = lifecycle.attach(&handle).await.unwrap();
        assert_eq!(attachment.container_id(), handle.id());

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !attachment.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(io.captured(), b"Web Server is available\n");

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while provider.stdin_received() != b"q\n" {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        attachment.abort();
        lifecycle.stop(handle, 10).await;
    }

    #[tokio::test]
    async fn test_attach_failure_is_synchronous() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = server_config(tmp.path());
        let provider = Arc::new(MockProvider::new());
        provider.fail_attach(ProviderError::ConnectionError("hijack failed".into()));
        let mut lifecycle = manager(&provider);

        let handle = lifecycle.start(&cfg).await.unwrap();
        let err = lifecycle.attach(&handle).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_attach_requires_running_handle() {
        let provider = Arc::new(MockProvider::new());
        let lifecycle = manager(&provider);
        let stray = ContainerHandle::new(ContainerId::new("someone-elses"));

        let err = lifecycle.attach(&stray).await.err().unwrap();
        assert!(matches!(err, CoreError::InvalidState(_)));
        assert!(provider.get_calls().is_empty());
    }
}
