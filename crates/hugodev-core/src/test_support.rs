//! Test support utilities for hugodev-core
//!
//! Provides MockProvider, MockRegistry and terminal stand-ins so the
//! reconciler, lifecycle manager and orchestrator can be exercised without a
//! Docker daemon or network access.

use crate::OperatorIo;
use async_trait::async_trait;
use hugodev_provider::*;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Ping,
    Pull { image: String },
    Build { tag: String, target: Option<String> },
    Create { image: String },
    Start { id: String },
    Attach { id: String },
    Stop { id: String, timeout: u32 },
    Remove { id: String, force: bool },
    InspectImage { image: String },
    TagImage { source: String, repo: String, tag: String },
}

/// Configurable mock container provider for testing.
///
/// Created containers get sequential ids (`mock-container-1`, ...) and are
/// tracked as live until removed.
pub struct MockProvider {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    pub ping_result: Arc<Mutex<Result<()>>>,
    pub pull_result: Arc<Mutex<Result<()>>>,
    pub build_result: Arc<Mutex<Result<ImageId>>>,
    /// Error for create calls (if Some, create returns this error)
    pub create_error: Arc<Mutex<Option<ProviderError>>>,
    pub start_error: Arc<Mutex<Option<ProviderError>>>,
    pub attach_error: Arc<Mutex<Option<ProviderError>>>,
    pub stop_result: Arc<Mutex<Result<()>>>,
    pub remove_result: Arc<Mutex<Result<()>>>,
    pub inspect_image_result: Arc<Mutex<Result<ImageDetails>>>,
    pub tag_result: Arc<Mutex<Result<()>>>,
    /// Bytes every attachment streams as container output
    pub attach_output: Arc<Mutex<Vec<u8>>>,
    stdin: Arc<Mutex<Vec<u8>>>,
    next_id: Arc<Mutex<u64>>,
    live: Arc<Mutex<HashSet<String>>>,
    max_live: Arc<Mutex<usize>>,
}

impl MockProvider {
    /// Create a new mock provider with default success results
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            ping_result: Arc::new(Mutex::new(Ok(()))),
            pull_result: Arc::new(Mutex::new(Ok(()))),
            build_result: Arc::new(Mutex::new(Ok(ImageId::new("sha256:mock_image_id")))),
            create_error: Arc::new(Mutex::new(None)),
            start_error: Arc::new(Mutex::new(None)),
            attach_error: Arc::new(Mutex::new(None)),
            stop_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            inspect_image_result: Arc::new(Mutex::new(Ok(ImageDetails::default()))),
            tag_result: Arc::new(Mutex::new(Ok(()))),
            attach_output: Arc::new(Mutex::new(Vec::new())),
            stdin: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(0)),
            live: Arc::new(Mutex::new(HashSet::new())),
            max_live: Arc::new(Mutex::new(0)),
        }
    }

    pub fn fail_create(&self, error: ProviderError) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    pub fn fail_start(&self, error: ProviderError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn fail_attach(&self, error: ProviderError) {
        *self.attach_error.lock().unwrap() = Some(error);
    }

    /// Clear injected create/start/attach failures
    pub fn recover(&self) {
        *self.create_error.lock().unwrap() = None;
        *self.start_error.lock().unwrap() = None;
        *self.attach_error.lock().unwrap() = None;
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Number of created containers not yet removed
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Highest number of containers that were ever live at once
    pub fn max_live(&self) -> usize {
        *self.max_live.lock().unwrap()
    }

    /// Everything written to attached containers' stdin
    pub fn stdin_received(&self) -> Vec<u8> {
        self.stdin.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to clone a Result<T> from an Arc<Mutex<Result<T>>>
fn clone_result<T: Clone>(r: &Arc<Mutex<Result<T>>>) -> Result<T> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

fn injected_error(slot: &Arc<Mutex<Option<ProviderError>>>) -> Option<ProviderError> {
    slot.lock().unwrap().as_ref().map(clone_provider_error)
}

/// Clone a ProviderError (thiserror types don't implement Clone)
pub fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::AuthError(s) => ProviderError::AuthError(s.clone()),
        ProviderError::NotFound(s) => ProviderError::NotFound(s.clone()),
        ProviderError::ValidationError(s) => ProviderError::ValidationError(s.clone()),
        ProviderError::DaemonError(s) => ProviderError::DaemonError(s.clone()),
        ProviderError::RegistryError(s) => ProviderError::RegistryError(s.clone()),
        ProviderError::IoError(e) => {
            ProviderError::IoError(std::io::Error::new(e.kind(), e.to_string()))
        }
    }
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        clone_result(&self.ping_result)
    }

    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<()> {
        self.record(MockCall::Pull {
            image: image.to_string(),
        });
        if let Some(tx) = progress {
            let _ = tx.send(format!("latest: Pulling from {}", image));
        }
        clone_result(&self.pull_result)
    }

    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId> {
        self.record(MockCall::Build {
            tag: config.tag.clone(),
            target: config.target.clone(),
        });
        if let Some(tx) = progress {
            let _ = tx.send("Step 1/1 : FROM base".to_string());
        }
        clone_result(&self.build_result)
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
        });
        if let Some(e) = injected_error(&self.create_error) {
            return Err(e);
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("mock-container-{}", *next)
        };
        let mut live = self.live.lock().unwrap();
        live.insert(id.clone());
        let mut max_live = self.max_live.lock().unwrap();
        *max_live = (*max_live).max(live.len());
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        match injected_error(&self.start_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn attach(&self, id: &ContainerId) -> Result<AttachStream> {
        self.record(MockCall::Attach { id: id.0.clone() });
        if let Some(e) = injected_error(&self.attach_error) {
            return Err(e);
        }

        let output = self.attach_output.lock().unwrap().clone();
        Ok(AttachStream {
            input: Box::pin(RecordingWriter {
                buf: self.stdin.clone(),
            }),
            output: Box::pin(std::io::Cursor::new(output)),
        })
    }

    async fn stop(&self, id: &ContainerId, timeout: u32) -> Result<()> {
        self.record(MockCall::Stop {
            id: id.0.clone(),
            timeout,
        });
        clone_result(&self.stop_result)
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
        });
        let result = clone_result(&self.remove_result);
        if result.is_ok() {
            self.live.lock().unwrap().remove(&id.0);
        }
        result
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails> {
        self.record(MockCall::InspectImage {
            image: image.to_string(),
        });
        clone_result(&self.inspect_image_result)
    }

    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()> {
        self.record(MockCall::TagImage {
            source: source.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
        });
        clone_result(&self.tag_result)
    }
}

/// Registry stand-in that answers every manifest lookup the same way
pub struct MockRegistry {
    pub digest: Arc<Mutex<Result<String>>>,
    pub lookups: Arc<Mutex<Vec<String>>>,
}

impl MockRegistry {
    pub fn new(digest: &str) -> Self {
        Self {
            digest: Arc::new(Mutex::new(Ok(digest.to_string()))),
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            digest: Arc::new(Mutex::new(Err(error))),
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        self.lookups.lock().unwrap().push(reference.manifest_url());
        clone_result(&self.digest)
    }
}

/// Operator terminal that discards output and never produces input
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIo;

impl OperatorIo for NullIo {
    fn output(&self) -> Box<dyn AsyncWrite + Send + Unpin> {
        Box::new(tokio::io::sink())
    }

    fn input(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(tokio::io::empty())
    }
}

/// Operator terminal that records output and replays fixed input
pub struct CaptureIo {
    output: Arc<Mutex<Vec<u8>>>,
    input: Vec<u8>,
}

impl CaptureIo {
    pub fn new(input: &[u8]) -> Self {
        Self {
            output: Arc::new(Mutex::new(Vec::new())),
            input: input.to_vec(),
        }
    }

    pub fn captured(&self) -> Vec<u8> {
        self.output.lock().unwrap().clone()
    }
}

impl OperatorIo for CaptureIo {
    fn output(&self) -> Box<dyn AsyncWrite + Send + Unpin> {
        Box::new(RecordingWriter {
            buf: self.output.clone(),
        })
    }

    fn input(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(std::io::Cursor::new(self.input.clone()))
    }
}

/// Async writer appending into a shared buffer
struct RecordingWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
