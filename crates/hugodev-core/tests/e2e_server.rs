//! End-to-end tests against a real Docker daemon.
//!
//! A small alpine container stands in for the Hugo image so the lifecycle
//! and the watch-restart loop can be exercised without the site images.
//!
//! Requires Docker. Tests are `#[ignore]` and run explicitly.

use hugodev_config::{GlobalConfig, ServerConfig};
use hugodev_core::test_support::NullIo;
use hugodev_core::{HandleState, LifecycleManager, Orchestrator, OrchestratorEvent};
use hugodev_provider::{
    create_provider, ContainerProvider, ErrorKind, ImageReference, RegistryClient, Result,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TEST_IMAGE: &str = "alpine:3.19";

/// Registry that is never consulted; `pull_latest` stays off in these tests
struct UnusedRegistry;

#[async_trait::async_trait]
impl RegistryClient for UnusedRegistry {
    async fn manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        panic!("unexpected registry lookup for {}", reference);
    }
}

async fn get_test_provider() -> Option<Arc<dyn ContainerProvider>> {
    match create_provider(&GlobalConfig::default()).await {
        Ok(provider) => {
            let provider: Arc<dyn ContainerProvider> = Arc::from(provider);
            if let Err(e) = provider.pull(TEST_IMAGE, None).await {
                eprintln!("Skipping test: cannot pull {}: {}", TEST_IMAGE, e);
                return None;
            }
            Some(provider)
        }
        Err(e) => {
            eprintln!("Skipping test: Docker unavailable: {}", e);
            None
        }
    }
}

fn server_config(site: &Path, host_port: u16) -> ServerConfig {
    let mut global = GlobalConfig::default();
    global.server.image = TEST_IMAGE.to_string();
    global.server.command = vec!["sleep".to_string(), "300".to_string()];
    ServerConfig::builder(&global)
        .watch_dir(site)
        .host_port(host_port)
        .debounce(Duration::from_millis(300))
        .stop_timeout(1)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore]
async fn test_start_attach_stop() {
    let Some(provider) = get_test_provider().await else {
        return;
    };
    let site = tempfile::tempdir().unwrap();
    let cfg = server_config(site.path(), 18313);

    let mut lifecycle = LifecycleManager::new(provider.clone(), Arc::new(NullIo));
    let handle = lifecycle.start(&cfg).await.unwrap();
    assert_eq!(lifecycle.state(), HandleState::Running);
    let id = handle.id().clone();

    let attachment = lifecycle.attach(&handle).await.unwrap();
    assert_eq!(attachment.container_id(), &id);
    attachment.abort();

    lifecycle.stop(handle, cfg.stop_timeout()).await;
    assert_eq!(lifecycle.state(), HandleState::Absent);

    // Already removed by stop
    let err = provider.remove(&id, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore]
async fn test_file_change_restarts_container() {
    let Some(provider) = get_test_provider().await else {
        return;
    };
    let site = tempfile::tempdir().unwrap();
    std::fs::create_dir(site.path().join("content")).unwrap();
    let cfg = server_config(site.path(), 18314);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(
        Orchestrator::new(cfg, provider.clone(), Arc::new(UnusedRegistry), Arc::new(NullIo))
            .with_events(events_tx)
            .run(shutdown.clone()),
    );

    let mut started = Vec::new();
    let mut touched = false;
    tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(event) = events.recv().await {
            if let OrchestratorEvent::ContainerStarted(id) = event {
                started.push(id);
                if started.len() == 2 {
                    break;
                }
                if !touched {
                    touched = true;
                    std::fs::write(site.path().join("content/_index.md"), "# hello\n").unwrap();
                }
            }
        }
    })
    .await
    .expect("container was not restarted after a file change");

    assert_ne!(started[0], started[1]);

    shutdown.cancel();
    task.await.unwrap().unwrap();

    for id in &started {
        let err = provider.remove(id, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
