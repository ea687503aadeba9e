//! Common types for the daemon capability

use std::collections::HashMap;
use std::path::PathBuf;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        if self.0.len() > 12 {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build configuration for creating images
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Path to the build context
    pub context: PathBuf,
    /// Dockerfile path (relative to context)
    pub dockerfile: String,
    /// Image tag
    pub tag: String,
    /// Target stage for multi-stage builds
    pub target: Option<String>,
    /// Build arguments
    pub build_args: HashMap<String, String>,
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateContainerConfig {
    /// Image to use
    pub image: String,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Bind mounts
    pub mounts: Vec<MountConfig>,
    /// Port mappings
    pub ports: Vec<PortConfig>,
    /// Allocate TTY
    pub tty: bool,
    /// Keep STDIN open
    pub stdin_open: bool,
    /// Labels
    pub labels: HashMap<String, String>,
}

/// Bind mount of a host path into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Host path, already translated for the daemon
    pub source: String,
    /// Target path in container
    pub target: String,
    /// Read-only
    pub read_only: bool,
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Host port (None for auto-assign)
    pub host_port: Option<u16>,
    /// Container port
    pub container_port: u16,
    /// Protocol (tcp/udp)
    pub protocol: String,
    /// Host IP to bind to
    pub host_ip: Option<String>,
}

impl PortConfig {
    /// Key used for exposed ports and port bindings, e.g. `1313/tcp`
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Local image metadata relevant to digest checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
    pub repo_tags: Vec<String>,
    /// Entries of the form `name@sha256:...`
    pub repo_digests: Vec<String>,
}
