//! Filesystem change watching with debounce
//!
//! Every directory under the root is registered with a non-recursive watch
//! when watching starts. Directories created afterwards are only picked up
//! by a new call to [`watch`], which the orchestrator makes after every
//! container restart.
//! Raw notify events are coalesced by a [`Debouncer`]: each qualifying event
//! pushes the deadline out, and one [`WatchEvent`] is emitted once the tree
//! has been quiet for the whole interval.

use crate::{CoreError, Result};
use notify::event::ModifyKind;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Raw event as delivered by the OS watcher
pub type ChangeEvent = notify::Result<notify::Event>;

/// A coalesced burst of changes. Paths are logged, not carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherMessage {
    Changed(WatchEvent),
    /// The OS watcher reported a problem; watching continues
    Error(String),
}

/// Single-owner monostable timer
pub struct Debouncer {
    delay: Duration,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            sleep: Box::pin(tokio::time::sleep(delay)),
            armed: false,
        }
    }

    /// Start the quiet period, or restart it if already running
    pub fn arm(&mut self) {
        self.armed = true;
        self.reset();
    }

    /// Push the deadline a full interval past now
    pub fn reset(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.delay);
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Resolve when an armed timer runs out; never resolves while disarmed.
    ///
    /// Cancel safe: dropping the future leaves the deadline untouched.
    pub async fn fire(&mut self) -> WatchEvent {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
        WatchEvent
    }
}

/// Create, data modification and removal count; access, metadata and renames don't
pub fn is_qualifying(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

/// Watch `root` until `cancel` fires.
///
/// The returned channel closes once watching has stopped.
pub fn watch(
    root: &Path,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<WatcherMessage>> {
    let (raw_tx, raw_rx) = mpsc::channel::<ChangeEvent>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.blocking_send(res);
        },
        Config::default(),
    )?;

    let mut registered = 0usize;
    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => {
                match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
                    Ok(()) => registered += 1,
                    Err(e) => {
                        tracing::warn!("Failed to watch {}: {}", entry.path().display(), e)
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping unreadable path: {}", e),
        }
    }

    if registered == 0 {
        return Err(CoreError::Watcher(format!(
            "no directories could be watched under {}",
            root.display()
        )));
    }
    tracing::info!(
        "Watching {} directories under {}",
        registered,
        root.display()
    );

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        debounce_events(raw_rx, tx, debounce, cancel).await;
        drop(watcher);
        tracing::debug!("File watcher stopped");
    });

    Ok(rx)
}

/// Coalesce raw events into [`WatcherMessage`]s until cancelled or either
/// channel closes.
pub async fn debounce_events(
    mut raw: mpsc::Receiver<ChangeEvent>,
    tx: mpsc::Sender<WatcherMessage>,
    delay: Duration,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = debouncer.fire() => {
                tracing::debug!("Changes settled, triggering restart");
                if tx.send(WatcherMessage::Changed(event)).await.is_err() {
                    break;
                }
            }
            raw_event = raw.recv() => match raw_event {
                Some(Ok(event)) => {
                    if is_qualifying(&event.kind) {
                        for path in &event.paths {
                            tracing::info!("File change detected: {}", path.display());
                        }
                        debouncer.arm();
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("File watcher error: {}", e);
                    if tx.send(WatcherMessage::Error(e.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
