//! Docker provider implementation using bollard

use crate::{
    AttachStream, BuildConfig, ContainerId, ContainerProvider, CreateContainerConfig,
    ImageDetails, ImageId, ProviderError, Result,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Docker provider using bollard crate
pub struct DockerProvider {
    client: Docker,
}

impl DockerProvider {
    /// Connect to the daemon at `socket` and verify it answers a ping
    pub async fn new(socket: &str) -> Result<Self> {
        let client = connect(socket)?;

        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

fn connect(socket: &str) -> Result<Docker> {
    let version = bollard::API_DEFAULT_VERSION;
    let result = if socket.starts_with("tcp://")
        || socket.starts_with("http://")
        || socket.starts_with("https://")
    {
        Docker::connect_with_http(socket, CONNECT_TIMEOUT_SECS, version)
    } else {
        connect_local(socket, version)
    };
    result.map_err(|e| ProviderError::ConnectionError(e.to_string()))
}

#[cfg(unix)]
fn connect_local(
    socket: &str,
    version: &'static bollard::ClientVersion,
) -> std::result::Result<Docker, bollard::errors::Error> {
    let path = socket.trim_start_matches("unix://");
    Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, version)
}

#[cfg(windows)]
fn connect_local(
    socket: &str,
    version: &'static bollard::ClientVersion,
) -> std::result::Result<Docker, bollard::errors::Error> {
    let path = socket.trim_start_matches("npipe://");
    Docker::connect_with_named_pipe(path, CONNECT_TIMEOUT_SECS, version)
}

fn send_progress(progress: Option<&mpsc::UnboundedSender<String>>, line: String) {
    if let Some(tx) = progress {
        let _ = tx.send(line);
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                return Err(ProviderError::DaemonError(format!(
                    "pulling {}: {}",
                    image, error
                )));
            }
            if let Some(status) = info.status {
                let line = match info.id {
                    Some(id) => format!("{}: {}", id, status),
                    None => status,
                };
                tracing::debug!("{}", line);
                send_progress(progress, line);
            }
        }

        Ok(())
    }

    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId> {
        // The build endpoint takes no stage target, so a copy of the Dockerfile
        // that ends with the target stage is shipped in the context instead.
        let staged = match &config.target {
            Some(target) => Some(staged_dockerfile(&config.context, &config.dockerfile, target)?),
            None => None,
        };
        let dockerfile = match &staged {
            Some(staged) => staged.name.clone(),
            None => config.dockerfile.clone(),
        };
        let tar_data = create_build_context(&config.context, &config.dockerfile, staged.as_ref())?;

        let options = BuildImageOptions {
            dockerfile,
            t: config.tag.clone(),
            buildargs: config.build_args.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(tar_data.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            let output = result?;
            if let Some(error) = output.error {
                return Err(ProviderError::DaemonError(format!("build failed: {}", error)));
            }
            if let Some(id) = output.aux.and_then(|aux| aux.id) {
                image_id = Some(id);
            }
            if let Some(line) = output.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!("{}", line);
                    send_progress(progress, line.to_string());
                }
            }
        }

        // The classic builder only reports the id through aux on some daemons
        match image_id {
            Some(id) => Ok(ImageId::new(id)),
            None => {
                let inspect = self.client.inspect_image(&config.tag).await?;
                Ok(ImageId::new(inspect.id.unwrap_or_else(|| config.tag.clone())))
            }
        }
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            let key = port.container_key();
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: port.host_port.map(|p| p.to_string()),
                }]),
            );
        }

        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            tty: Some(config.tty),
            open_stdin: Some(config.stdin_open),
            attach_stdin: Some(config.stdin_open),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container::<String, String>(None, container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("{}", warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn attach(&self, id: &ContainerId) -> Result<AttachStream> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } =
            self.client.attach_container(&id.0, Some(options)).await?;

        Ok(AttachStream {
            input,
            output: Box::pin(LogOutputReader::new(output)),
        })
    }

    async fn stop(&self, id: &ContainerId, timeout: u32) -> Result<()> {
        let options = StopContainerOptions { t: timeout as i64 };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails> {
        let inspect = self.client.inspect_image(image).await?;
        Ok(ImageDetails {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            repo_digests: inspect.repo_digests.unwrap_or_default(),
        })
    }

    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()> {
        let options = TagImageOptions { repo, tag };
        self.client.tag_image(source, Some(options)).await?;
        Ok(())
    }
}

/// Generated Dockerfile whose last stage is the build target
struct StagedDockerfile {
    name: String,
    content: String,
}

fn staged_dockerfile(context: &Path, dockerfile: &str, target: &str) -> Result<StagedDockerfile> {
    let path = require_dockerfile(context, dockerfile)?;
    let content = std::fs::read_to_string(&path)?;
    Ok(StagedDockerfile {
        name: format!(".hugodev-{}.Dockerfile", target),
        content: truncate_to_stage(&content, target)?,
    })
}

/// Keep everything up to the end of stage `target`.
///
/// Stages may only copy from earlier stages, so nothing `target` depends on
/// is cut.
fn truncate_to_stage(dockerfile: &str, target: &str) -> Result<String> {
    let mut out = String::new();
    let mut found = false;

    for line in dockerfile.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words
            .first()
            .is_some_and(|w| w.eq_ignore_ascii_case("from"))
        {
            if found {
                break;
            }
            found = names_stage(&words, target);
        }
        out.push_str(line);
        out.push('\n');
    }

    if found {
        Ok(out)
    } else {
        Err(ProviderError::ValidationError(format!(
            "no build stage named '{}' in Dockerfile",
            target
        )))
    }
}

/// `FROM [--flags] image AS name`
fn names_stage(words: &[&str], target: &str) -> bool {
    match words {
        [.., as_kw, name] if words.len() >= 4 => {
            as_kw.eq_ignore_ascii_case("as") && name.eq_ignore_ascii_case(target)
        }
        _ => false,
    }
}

fn require_dockerfile(context: &Path, dockerfile: &str) -> Result<std::path::PathBuf> {
    let path = context.join(dockerfile);
    if !path.is_file() {
        return Err(ProviderError::NotFound(format!(
            "Dockerfile not found at {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Create a tar archive from the build context
fn create_build_context(
    context: &Path,
    dockerfile: &str,
    staged: Option<&StagedDockerfile>,
) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::Builder;

    require_dockerfile(context, dockerfile)?;

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);
        add_dir_to_tar(&mut builder, context, Path::new(""))?;
        if let Some(staged) = staged {
            let mut header = tar::Header::new_gnu();
            header.set_size(staged.content.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, &staged.name, staged.content.as_bytes())?;
        }
        builder.finish()?;
    }

    Ok(tar_data)
}

/// Recursively add directory contents to tar
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    prefix: &Path,
) -> Result<()> {
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());

        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name == ".git" || file_name == "node_modules" || file_name == "public" {
            continue;
        }

        if path.is_dir() {
            add_dir_to_tar(builder, &path, &name)?;
        } else if path.is_file() {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    Ok(())
}

/// Reader that converts the attach output stream to AsyncRead
struct LogOutputReader<S> {
    stream: S,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S> LogOutputReader<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pos: 0,
        }
    }
}

impl<S> AsyncRead for LogOutputReader<S>
where
    S: futures::Stream<
            Item = std::result::Result<bollard::container::LogOutput, bollard::errors::Error>,
        > + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use bollard::container::LogOutput;
        use std::task::Poll;

        loop {
            if self.pos < self.buffer.len() {
                let remaining = &self.buffer[self.pos..];
                let to_copy = std::cmp::min(remaining.len(), buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                self.pos += to_copy;
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(output))) => {
                    let data = match output {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::StdIn { message }
                        | LogOutput::Console { message } => message,
                    };
                    // An empty read means EOF to callers; skip empty frames
                    self.buffer = data.to_vec();
                    self.pos = 0;
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(std::io::Error::other(e.to_string())))
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
