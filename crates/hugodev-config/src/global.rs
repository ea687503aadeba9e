//! Global configuration for hugodev
//!
//! Located at `~/.config/hugodev/config.toml`. Every section is optional;
//! command-line flags override whatever is set here.

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global hugodev configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub docker: DockerConfig,
    pub server: ServerDefaults,
    pub watch: WatchConfig,
    pub lifecycle: LifecycleConfig,
    pub registry: RegistryConfig,
}

/// Docker daemon connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Daemon endpoint: a unix socket path, `unix://`, `tcp://`, `http://` or `https://` URL
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: std::env::var("DOCKER_HOST").unwrap_or_else(|_| default_docker_socket()),
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Defaults for `launch-server`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    /// Image the development container runs
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    /// Host address the published port binds to
    pub host_ip: String,
    /// Command passed to the image entrypoint
    pub command: Vec<String>,
    /// In-container path the watched directory is mounted at
    pub repo_target: String,
    /// Config file, relative to the watched directory
    pub config_file: String,
    /// In-container path the config file is mounted at
    pub config_target: String,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            image: "fortinet-hugo:latest".to_string(),
            host_port: 1313,
            container_port: 1313,
            host_ip: "0.0.0.0".to_string(),
            command: vec![
                "server".to_string(),
                "--bind".to_string(),
                "0.0.0.0".to_string(),
            ],
            repo_target: "/home/UserRepo".to_string(),
            config_file: "hugo.toml".to_string(),
            config_target: "/home/CentralRepo/hugo.toml".to_string(),
        }
    }
}

/// File watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period before a burst of changes triggers a restart
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 2000 }
    }
}

/// Container teardown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period given to the container on stop before it is killed
    pub stop_timeout_secs: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
        }
    }
}

/// Remote registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Repository prefix prebuilt images are published under
    pub prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "public.ecr.aws/k4n6m5h8/".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!("Loaded config from {:?}", path);

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "hugodev").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
