//! Configuration for hugodev
//!
//! This crate handles:
//! - Global configuration (`~/.config/hugodev/config.toml`)
//! - The per-session [`ServerConfig`] the orchestrator runs against

mod error;
mod global;
mod server;

pub use error::*;
pub use global::*;
pub use server::*;
