//! CLI command implementations

mod images;
mod manage;
mod server;

use anyhow::{anyhow, Result};
use hugodev_provider::ContainerProvider;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use images::*;
pub use manage::*;
pub use server::*;

const TROUBLESHOOT_URL: &str = "https://docs.docker.com/engine/daemon/troubleshoot/";

/// Make sure the daemon answers before doing any real work
pub async fn preflight(provider: &dyn ContainerProvider) -> Result<()> {
    provider.ping().await.map_err(|e| {
        anyhow!(
            "Docker daemon is not responding: {}\n\nFor troubleshooting help, head here: {}",
            e,
            TROUBLESHOOT_URL
        )
    })
}

/// Print progress lines to stdout until every sender is dropped
pub fn progress_printer() -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{}", line);
        }
    });
    (tx, printer)
}
