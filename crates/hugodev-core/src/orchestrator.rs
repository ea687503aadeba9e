//! The development server loop
//!
//! Launch once (optionally refreshing the image first), then sit between the
//! file watcher and the shutdown token: every settled burst of changes
//! replaces the container, and shutdown tears it down. Each successful
//! replacement restarts the watch so directories created since the last
//! walk are registered.

use crate::watcher::{watch, WatcherMessage};
use crate::{
    Attachment, ContainerHandle, CoreError, DigestReconciler, LifecycleManager, OperatorIo,
    Result,
};
use hugodev_config::ServerConfig;
use hugodev_provider::{ContainerId, ContainerProvider, RegistryClient};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Reconciling,
    Starting,
    Running,
    Stopped,
}

/// Progress notifications for observers of a running [`Orchestrator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    Phase(Phase),
    ContainerStarted(ContainerId),
    ContainerStopped(ContainerId),
    RestartFailed(String),
    WatcherError(String),
}

pub struct Orchestrator {
    config: ServerConfig,
    provider: Arc<dyn ContainerProvider>,
    registry: Arc<dyn RegistryClient>,
    lifecycle: LifecycleManager,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    progress: Option<mpsc::UnboundedSender<String>>,
    /// Cancels the current filesystem watch; `None` when changes are injected
    watch_cancel: Option<CancellationToken>,
}

/// The container currently serving, if any, and its terminal bridge
#[derive(Default)]
struct Live {
    handle: Option<ContainerHandle>,
    attachment: Option<Attachment>,
}

impl Orchestrator {
    pub fn new(
        config: ServerConfig,
        provider: Arc<dyn ContainerProvider>,
        registry: Arc<dyn RegistryClient>,
        io: Arc<dyn OperatorIo>,
    ) -> Self {
        let lifecycle = LifecycleManager::new(provider.clone(), io);
        Self {
            config,
            provider,
            registry,
            lifecycle,
            events: None,
            progress: None,
            watch_cancel: None,
        }
    }

    /// Report phases and container changes on `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Forward image pull progress lines on `tx`
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Run until `shutdown` is cancelled, restarting on filesystem changes
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let live = self.launch().await?;

        let cancel = shutdown.child_token();
        let changes = match watch(self.config.watch_dir(), self.config.debounce(), cancel.clone())
        {
            Ok(changes) => changes,
            Err(e) => {
                self.teardown(live).await;
                return Err(e);
            }
        };
        self.watch_cancel = Some(cancel);

        self.supervise(shutdown, changes, live).await
    }

    /// Like [`run`](Self::run) with an externally supplied change stream
    pub async fn run_with_changes(
        mut self,
        shutdown: CancellationToken,
        changes: mpsc::Receiver<WatcherMessage>,
    ) -> Result<()> {
        let live = self.launch().await?;
        self.supervise(shutdown, changes, live).await
    }

    async fn launch(&mut self) -> Result<Live> {
        self.enter(Phase::Init);

        if self.config.pull_latest() {
            self.enter(Phase::Reconciling);
            let reconciler = DigestReconciler::new(self.provider.clone(), self.registry.clone());
            reconciler
                .reconcile(
                    &self.config.remote_reference(),
                    self.config.local_name(),
                    self.progress.as_ref(),
                )
                .await?;
        }

        self.enter(Phase::Starting);
        let handle = self.lifecycle.start(&self.config).await?;
        let attachment = match self.lifecycle.attach(&handle).await {
            Ok(attachment) => attachment,
            Err(e) => {
                self.lifecycle
                    .stop(handle, self.config.stop_timeout())
                    .await;
                return Err(e);
            }
        };
        self.emit(OrchestratorEvent::ContainerStarted(handle.id().clone()));

        Ok(Live {
            handle: Some(handle),
            attachment: Some(attachment),
        })
    }

    async fn supervise(
        mut self,
        shutdown: CancellationToken,
        mut changes: mpsc::Receiver<WatcherMessage>,
        mut live: Live,
    ) -> Result<()> {
        self.enter(Phase::Running);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.teardown(live).await;
                    return Ok(());
                }
                message = changes.recv() => match message {
                    Some(WatcherMessage::Changed(_)) => {
                        tracing::info!("Changes detected, restarting container");
                        live = self.replace(live).await;
                        if live.handle.is_some() {
                            self.rewatch(&shutdown, &mut changes);
                        }
                    }
                    Some(WatcherMessage::Error(e)) => {
                        tracing::warn!("File watcher reported an error: {}", e);
                        self.emit(OrchestratorEvent::WatcherError(e));
                    }
                    None => {
                        self.teardown(live).await;
                        return Err(CoreError::Watcher(
                            "file watcher stopped unexpectedly".into(),
                        ));
                    }
                },
            }
        }
    }

    /// Swap the live container for a fresh one; failures leave nothing live
    async fn replace(&mut self, live: Live) -> Live {
        if let Some(attachment) = live.attachment {
            attachment.abort();
        }

        let started = match live.handle {
            Some(old) => {
                let old_id = old.id().clone();
                let result = self.lifecycle.restart(&self.config, old).await;
                self.emit(OrchestratorEvent::ContainerStopped(old_id));
                result
            }
            None => self.lifecycle.start(&self.config).await,
        };

        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to restart container: {}", e);
                self.emit(OrchestratorEvent::RestartFailed(e.to_string()));
                return Live::default();
            }
        };
        self.emit(OrchestratorEvent::ContainerStarted(handle.id().clone()));

        let attachment = match self.lifecycle.attach(&handle).await {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                tracing::error!("Failed to attach to container {}: {}", handle.id().short(), e);
                self.emit(OrchestratorEvent::RestartFailed(e.to_string()));
                None
            }
        };

        Live {
            handle: Some(handle),
            attachment,
        }
    }

    /// Walk the tree again and swap in the new stream.
    ///
    /// The old watch keeps running if the new one cannot be set up.
    fn rewatch(
        &mut self,
        shutdown: &CancellationToken,
        changes: &mut mpsc::Receiver<WatcherMessage>,
    ) {
        let Some(old) = self.watch_cancel.take() else {
            return;
        };
        let cancel = shutdown.child_token();
        match watch(self.config.watch_dir(), self.config.debounce(), cancel.clone()) {
            Ok(fresh) => {
                old.cancel();
                *changes = fresh;
                self.watch_cancel = Some(cancel);
            }
            Err(e) => {
                tracing::warn!("Failed to restart file watcher: {}", e);
                self.emit(OrchestratorEvent::WatcherError(e.to_string()));
                self.watch_cancel = Some(old);
            }
        }
    }

    async fn teardown(&mut self, live: Live) {
        if let Some(attachment) = live.attachment {
            attachment.abort();
        }
        if let Some(handle) = live.handle {
            let id = handle.id().clone();
            self.lifecycle
                .stop(handle, self.config.stop_timeout())
                .await;
            self.emit(OrchestratorEvent::ContainerStopped(id));
        }
        self.enter(Phase::Stopped);
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!("Entering phase {:?}", phase);
        self.emit(OrchestratorEvent::Phase(phase));
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider, MockRegistry, NullIo};
    use crate::WatchEvent;
    use hugodev_config::GlobalConfig;
    use hugodev_provider::{ErrorKind, ImageDetails, ProviderError};
    use tokio::task::JoinHandle;

    struct Run {
        provider: Arc<MockProvider>,
        changes: mpsc::Sender<WatcherMessage>,
        events: mpsc::UnboundedReceiver<OrchestratorEvent>,
        shutdown: CancellationToken,
        task: JoinHandle<Result<()>>,
        _dir: tempfile::TempDir,
    }

    fn spawn_with(provider: Arc<MockProvider>, registry: MockRegistry, pull_latest: bool) -> Run {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::builder(&GlobalConfig::default())
            .watch_dir(dir.path())
            .pull_latest(pull_latest)
            .build()
            .unwrap();
        let (changes, changes_rx) = mpsc::channel(8);
        let (events_tx, events) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let orchestrator = Orchestrator::new(
            config,
            provider.clone(),
            Arc::new(registry),
            Arc::new(NullIo),
        )
        .with_events(events_tx);
        let task = tokio::spawn(orchestrator.run_with_changes(shutdown.clone(), changes_rx));

        Run {
            provider,
            changes,
            events,
            shutdown,
            task,
            _dir: dir,
        }
    }

    fn spawn(provider: Arc<MockProvider>) -> Run {
        spawn_with(provider, MockRegistry::new("sha256:unused"), false)
    }

    /// Wait for the first event matching `pred`
    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<OrchestratorEvent>,
        pred: impl Fn(&OrchestratorEvent) -> bool,
    ) -> OrchestratorEvent {
        loop {
            let event = events.recv().await.expect("orchestrator events closed");
            if pred(&event) {
                return event;
            }
        }
    }

    async fn wait_running(events: &mut mpsc::UnboundedReceiver<OrchestratorEvent>) {
        wait_for(events, |e| *e == OrchestratorEvent::Phase(Phase::Running)).await;
    }

    async fn trigger(run: &mut Run) -> OrchestratorEvent {
        run.changes
            .send(WatcherMessage::Changed(WatchEvent))
            .await
            .unwrap();
        wait_for(&mut run.events, |e| {
            matches!(
                e,
                OrchestratorEvent::ContainerStarted(_) | OrchestratorEvent::RestartFailed(_)
            )
        })
        .await
    }

    #[tokio::test]
    async fn test_single_handle_across_restarts_and_shutdown() {
        let mut run = spawn(Arc::new(MockProvider::new()));
        wait_running(&mut run.events).await;
        assert_eq!(run.provider.live_count(), 1);

        for expected in ["mock-container-2", "mock-container-3"] {
            let event = trigger(&mut run).await;
            assert_eq!(
                event,
                OrchestratorEvent::ContainerStarted(ContainerId::new(expected))
            );
            assert_eq!(run.provider.live_count(), 1);
        }

        run.shutdown.cancel();
        run.task.await.unwrap().unwrap();

        assert_eq!(run.provider.live_count(), 0);
        assert_eq!(run.provider.max_live(), 1);
        // Every container was stopped before its successor was created
        let calls = run.provider.get_calls();
        let stop_1 = calls
            .iter()
            .position(|c| matches!(c, MockCall::Stop { id, .. } if id == "mock-container-1"))
            .unwrap();
        let create_2 = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, MockCall::Create { .. }))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(stop_1 < create_2);
    }

    #[tokio::test]
    async fn test_restart_failure_keeps_loop_running() {
        let mut run = spawn(Arc::new(MockProvider::new()));
        wait_running(&mut run.events).await;

        run.provider
            .fail_create(ProviderError::DaemonError("no space left on device".into()));
        let event = trigger(&mut run).await;
        assert!(matches!(event, OrchestratorEvent::RestartFailed(msg) if msg.contains("no space")));
        assert_eq!(run.provider.live_count(), 0);

        run.provider.recover();
        let event = trigger(&mut run).await;
        assert!(matches!(event, OrchestratorEvent::ContainerStarted(_)));
        assert_eq!(run.provider.live_count(), 1);

        run.shutdown.cancel();
        run.task.await.unwrap().unwrap();
        assert_eq!(run.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_failure_on_restart_keeps_container() {
        let mut run = spawn(Arc::new(MockProvider::new()));
        wait_running(&mut run.events).await;

        run.provider
            .fail_attach(ProviderError::ConnectionError("hijack failed".into()));
        trigger(&mut run).await;
        wait_for(&mut run.events, |e| {
            matches!(e, OrchestratorEvent::RestartFailed(_))
        })
        .await;
        assert_eq!(run.provider.live_count(), 1);

        run.shutdown.cancel();
        run.task.await.unwrap().unwrap();
        assert_eq!(run.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_at_startup_is_fatal() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_create(ProviderError::NotFound("No such image: fortinet-hugo:latest".into()));
        let run = spawn(provider);

        let err = run.task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("No such image"));
        assert!(!run
            .provider
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Attach { .. })));
    }

    #[tokio::test]
    async fn test_attach_failure_at_startup_tears_down() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_attach(ProviderError::ConnectionError("hijack failed".into()));
        let run = spawn(provider);

        let err = run.task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(run.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_watcher_errors_are_not_fatal() {
        let mut run = spawn(Arc::new(MockProvider::new()));
        wait_running(&mut run.events).await;

        run.changes
            .send(WatcherMessage::Error("queue overflow".into()))
            .await
            .unwrap();
        let event = wait_for(&mut run.events, |e| {
            matches!(e, OrchestratorEvent::WatcherError(_))
        })
        .await;
        assert_eq!(event, OrchestratorEvent::WatcherError("queue overflow".into()));
        assert_eq!(run.provider.live_count(), 1);

        run.shutdown.cancel();
        run.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_stream_end_tears_down_with_error() {
        let mut run = spawn(Arc::new(MockProvider::new()));
        wait_running(&mut run.events).await;

        drop(run.changes);
        let err = run.task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Watcher(_)));
        assert_eq!(run.provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_launch_completes_still_tears_down() {
        let run = spawn(Arc::new(MockProvider::new()));
        run.shutdown.cancel();

        run.task.await.unwrap().unwrap();
        assert_eq!(run.provider.live_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_directory_created_before_restart_is_watched_after() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::builder(&GlobalConfig::default())
            .watch_dir(dir.path())
            .debounce(std::time::Duration::from_millis(100))
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            Orchestrator::new(
                config,
                provider.clone(),
                Arc::new(MockRegistry::new("sha256:unused")),
                Arc::new(NullIo),
            )
            .with_events(events_tx)
            .run(shutdown.clone()),
        );
        let started = |n: &'static str| {
            move |e: &OrchestratorEvent| {
                *e == OrchestratorEvent::ContainerStarted(ContainerId::new(n))
            }
        };
        let timeout = std::time::Duration::from_secs(10);

        tokio::time::timeout(timeout, wait_running(&mut events))
            .await
            .unwrap();

        // Not under watch yet: only its creation in the root is seen
        let posts = dir.path().join("posts");
        std::fs::create_dir(&posts).unwrap();
        tokio::time::timeout(timeout, wait_for(&mut events, started("mock-container-2")))
            .await
            .expect("creating a directory did not restart the container");

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        std::fs::write(posts.join("first.md"), "# first\n").unwrap();
        tokio::time::timeout(timeout, wait_for(&mut events, started("mock-container-3")))
            .await
            .expect("change inside the new directory went unnoticed");

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_phases_in_order() {
        let provider = Arc::new(MockProvider::new());
        *provider.inspect_image_result.lock().unwrap() = Ok(ImageDetails {
            repo_digests: vec![format!(
                "public.ecr.aws/k4n6m5h8/fortinet-hugo@sha256:{}",
                "a".repeat(64)
            )],
            ..Default::default()
        });
        let mut run = spawn_with(provider, MockRegistry::new(&"a".repeat(64)), true);

        let mut phases = Vec::new();
        while phases.last() != Some(&Phase::Running) {
            if let Some(OrchestratorEvent::Phase(phase)) = run.events.recv().await {
                phases.push(phase);
            }
        }
        run.shutdown.cancel();
        run.task.await.unwrap().unwrap();
        while let Ok(event) = run.events.try_recv() {
            if let OrchestratorEvent::Phase(phase) = event {
                phases.push(phase);
            }
        }

        assert_eq!(
            phases,
            vec![
                Phase::Init,
                Phase::Reconciling,
                Phase::Starting,
                Phase::Running,
                Phase::Stopped
            ]
        );
        // Up to date: nothing pulled
        assert!(!run
            .provider
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Pull { .. })));
    }

    #[tokio::test]
    async fn test_reconcile_failure_prevents_launch() {
        let provider = Arc::new(MockProvider::new());
        let registry = MockRegistry::failing(ProviderError::ConnectionError("dns".into()));
        let mut run = spawn_with(provider, registry, true);

        let err = run.task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(run.provider.get_calls().is_empty());

        let mut phases = Vec::new();
        while let Ok(OrchestratorEvent::Phase(phase)) = run.events.try_recv() {
            phases.push(phase);
        }
        assert_eq!(phases, vec![Phase::Init, Phase::Reconciling]);
    }
}
