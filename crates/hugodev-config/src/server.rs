//! Per-session server configuration
//!
//! A [`ServerConfig`] is built once from the global defaults plus operator
//! flags and is never mutated afterwards.

use crate::{ConfigError, GlobalConfig, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the orchestrator needs to run one development container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    image: String,
    host_port: u16,
    container_port: u16,
    host_ip: String,
    command: Vec<String>,
    watch_dir: PathBuf,
    repo_target: String,
    mount_config: bool,
    config_file: String,
    config_target: String,
    pull_latest: bool,
    registry: Option<String>,
    debounce: Duration,
    stop_timeout: u32,
}

impl ServerConfig {
    /// Start building a config seeded from the global defaults
    pub fn builder(global: &GlobalConfig) -> ServerConfigBuilder {
        ServerConfigBuilder::new(global)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    pub fn container_port(&self) -> u16 {
        self.container_port
    }

    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Absolute path of the watched directory
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn repo_target(&self) -> &str {
        &self.repo_target
    }

    /// Whether the config file is bind-mounted alongside the watched directory
    pub fn mount_config(&self) -> bool {
        self.mount_config
    }

    /// Host path of the config file (inside the watched directory)
    pub fn config_path(&self) -> PathBuf {
        self.watch_dir.join(&self.config_file)
    }

    pub fn config_target(&self) -> &str {
        &self.config_target
    }

    /// Whether the image is checked against the registry before launch
    pub fn pull_latest(&self) -> bool {
        self.pull_latest
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Stop grace period in seconds
    pub fn stop_timeout(&self) -> u32 {
        self.stop_timeout
    }

    /// Remote reference the image is checked against.
    ///
    /// With a registry prefix `public.ecr.aws/ns/` and image `fortinet-hugo:latest`
    /// this is `public.ecr.aws/ns/fortinet-hugo:latest`. An image that already
    /// names its registry host, or a session without a prefix, uses the image
    /// reference itself.
    pub fn remote_reference(&self) -> String {
        match &self.registry {
            Some(prefix) if !names_registry(&self.image) => {
                with_registry_prefix(prefix, &self.image)
            }
            _ => self.image.clone(),
        }
    }

    /// Local repository name a refreshed image is tagged as.
    ///
    /// The image without its tag; for a registry-qualified image only the last
    /// path component (`public.ecr.aws/ns/fortinet-hugo` gives `fortinet-hugo`).
    pub fn local_name(&self) -> &str {
        let name = split_tag(&self.image).0;
        if names_registry(name) {
            name.rsplit('/').next().unwrap_or(name)
        } else {
            name
        }
    }
}

/// Whether the first path component of an image reference is a registry host
/// rather than a Docker Hub namespace
pub fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn names_registry(image: &str) -> bool {
    image
        .split_once('/')
        .is_some_and(|(first, _)| is_registry_host(first))
}

/// Qualify `image` with a registry/repository prefix such as `public.ecr.aws/ns/`
pub fn with_registry_prefix(prefix: &str, image: &str) -> String {
    if prefix.is_empty() {
        image.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, image)
    } else {
        format!("{}/{}", prefix, image)
    }
}

/// Split `repo:tag` into `(repo, Some(tag))`, ignoring a registry port
pub fn split_tag(reference: &str) -> (&str, Option<&str>) {
    let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_slash..].rfind(':') {
        Some(i) => {
            let colon = last_slash + i;
            (&reference[..colon], Some(&reference[colon + 1..]))
        }
        None => (reference, None),
    }
}

/// Builder for [`ServerConfig`]; `build` resolves and validates
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    image: String,
    host_port: u16,
    container_port: u16,
    host_ip: String,
    command: Vec<String>,
    watch_dir: PathBuf,
    repo_target: String,
    mount_config: bool,
    config_file: String,
    config_target: String,
    pull_latest: bool,
    registry: Option<String>,
    debounce: Duration,
    stop_timeout: u32,
}

impl ServerConfigBuilder {
    fn new(global: &GlobalConfig) -> Self {
        let server = &global.server;
        Self {
            image: server.image.clone(),
            host_port: server.host_port,
            container_port: server.container_port,
            host_ip: server.host_ip.clone(),
            command: server.command.clone(),
            watch_dir: PathBuf::from("."),
            repo_target: server.repo_target.clone(),
            mount_config: false,
            config_file: server.config_file.clone(),
            config_target: server.config_target.clone(),
            pull_latest: false,
            registry: Some(global.registry.prefix.clone()),
            debounce: Duration::from_millis(global.watch.debounce_ms),
            stop_timeout: global.lifecycle.stop_timeout_secs,
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = port;
        self
    }

    pub fn container_port(mut self, port: u16) -> Self {
        self.container_port = port;
        self
    }

    pub fn watch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watch_dir = dir.into();
        self
    }

    pub fn mount_config(mut self, mount: bool) -> Self {
        self.mount_config = mount;
        self
    }

    pub fn pull_latest(mut self, pull: bool) -> Self {
        self.pull_latest = pull;
        self
    }

    /// Override the registry prefix; an empty string disables the prefix
    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        let registry = registry.into();
        self.registry = if registry.is_empty() {
            None
        } else {
            Some(registry)
        };
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn stop_timeout(mut self, secs: u32) -> Self {
        self.stop_timeout = secs;
        self
    }

    /// Resolve the watched directory to an absolute path and validate
    pub fn build(self) -> Result<ServerConfig> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::Invalid("docker image must not be empty".into()));
        }
        if self.host_port == 0 {
            return Err(ConfigError::Invalid("host port must be between 1 and 65535".into()));
        }
        if self.container_port == 0 {
            return Err(ConfigError::Invalid(
                "container port must be between 1 and 65535".into(),
            ));
        }
        if self.debounce.is_zero() {
            return Err(ConfigError::Invalid("debounce interval must be positive".into()));
        }

        let watch_dir = resolve_dir(&self.watch_dir)?;

        Ok(ServerConfig {
            image: self.image,
            host_port: self.host_port,
            container_port: self.container_port,
            host_ip: self.host_ip,
            command: self.command,
            watch_dir,
            repo_target: self.repo_target,
            mount_config: self.mount_config,
            config_file: self.config_file,
            config_target: self.config_target,
            pull_latest: self.pull_latest,
            registry: self.registry,
            debounce: self.debounce,
            stop_timeout: self.stop_timeout,
        })
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    let raw = dir.to_string_lossy();
    let expanded = shellexpand::tilde(&raw);
    let absolute = std::path::absolute(Path::new(expanded.as_ref())).map_err(|e| {
        ConfigError::Invalid(format!("cannot resolve watch directory {}: {}", raw, e))
    })?;

    if !absolute.is_dir() {
        return Err(ConfigError::Invalid(format!(
            "watch directory {} does not exist or is not a directory",
            absolute.display()
        )));
    }

    Ok(absolute)
}
