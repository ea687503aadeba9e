//! `launch-server`: run the Hugo development container and restart it on edits

use anyhow::{Context, Result};
use hugodev_config::{GlobalConfig, ServerConfig};
use hugodev_core::{OperatorIo, Orchestrator};
use hugodev_provider::{ContainerProvider, RegistryClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::progress_printer;

/// Flags accepted by `launch-server`; unset values fall back to the global config
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub docker_image: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: Option<u16>,
    pub watch_dir: PathBuf,
    pub mount_toml: bool,
    pub pull_latest: bool,
    pub registry: Option<String>,
}

/// Merge `opts` over `global` into a validated session config
pub fn server_config(global: &GlobalConfig, opts: &LaunchOptions) -> Result<ServerConfig> {
    let mut builder = ServerConfig::builder(global)
        .watch_dir(&opts.watch_dir)
        .mount_config(opts.mount_toml)
        .pull_latest(opts.pull_latest);

    if let Some(image) = &opts.docker_image {
        builder = builder.image(image);
    }
    if let Some(port) = opts.host_port {
        builder = builder.host_port(port);
    }
    if let Some(port) = opts.container_port {
        builder = builder.container_port(port);
    }
    if let Some(registry) = &opts.registry {
        builder = builder.registry(registry);
    }

    Ok(builder.build()?)
}

/// Serve `config` until `shutdown` fires
pub async fn launch_server(
    config: ServerConfig,
    provider: Arc<dyn ContainerProvider>,
    registry: Arc<dyn RegistryClient>,
    io: Arc<dyn OperatorIo>,
    shutdown: CancellationToken,
) -> Result<()> {
    println!(
        "Serving {} from {} on http://localhost:{}",
        config.image(),
        config.watch_dir().display(),
        config.host_port()
    );
    println!("Press Ctrl+C to stop.");

    let (tx, printer) = progress_printer();
    let result = Orchestrator::new(config, provider, registry, io)
        .with_progress(tx)
        .run(shutdown)
        .await;
    let _ = printer.await;

    result.context("Development server stopped unexpectedly")?;
    println!("Development server stopped.");
    Ok(())
}
