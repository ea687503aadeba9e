//! Core logic for hugodev
//!
//! This crate provides:
//! - Digest reconciliation of the local image against its registry tag
//! - Container lifecycle management (start, attach, stop, restart)
//! - Debounced filesystem watching
//! - The orchestration loop tying them together
//! - Environment image pulls and builds

mod environment;
mod error;
mod images;
mod io;
mod lifecycle;
mod orchestrator;
pub mod path;
mod reconcile;
mod signal;
pub mod watcher;

pub use environment::*;
pub use error::*;
pub use images::*;
pub use io::*;
pub use lifecycle::*;
pub use orchestrator::*;
pub use reconcile::*;
pub use signal::*;
pub use watcher::{WatchEvent, WatcherMessage};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
