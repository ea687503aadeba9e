//! Operator terminal streams

use std::io::Read;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Where container output goes and where container input comes from.
///
/// Each attachment asks for a fresh pair, so the streams must be cheap to
/// open more than once over a session.
pub trait OperatorIo: Send + Sync {
    fn output(&self) -> Box<dyn AsyncWrite + Send + Unpin>;
    fn input(&self) -> Box<dyn AsyncRead + Send + Unpin>;
}

/// The process's own stdout and stdin.
///
/// Stdin is read by one dedicated thread for the whole session. Each
/// attachment drains the same channel, so aborting an attachment never
/// leaves a read stuck on the terminal and input typed between restarts
/// goes to the next container.
#[derive(Debug, Clone)]
pub struct Stdio {
    input: Arc<Mutex<SessionInput>>,
}

#[derive(Debug)]
struct SessionInput {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Stdio {
    pub fn new() -> Self {
        Self::from_reader(std::io::stdin())
    }

    /// Session input fed from any blocking reader
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let spawned = std::thread::Builder::new()
            .name("hugodev-stdin".to_string())
            .spawn(move || forward_input(reader, tx));
        if let Err(e) = spawned {
            // rx sees a closed channel and every attachment reads EOF
            debug!("Could not start stdin reader: {}", e);
        }
        Self {
            input: Arc::new(Mutex::new(SessionInput {
                rx,
                pending: Vec::new(),
            })),
        }
    }
}

impl Default for Stdio {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_input<R: Read>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stdin read failed: {}", e);
                break;
            }
        }
    }
}

impl OperatorIo for Stdio {
    fn output(&self) -> Box<dyn AsyncWrite + Send + Unpin> {
        Box::new(tokio::io::stdout())
    }

    fn input(&self) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(SessionReader {
            input: self.input.clone(),
        })
    }
}

/// One attachment's view of the session input
struct SessionReader {
    input: Arc<Mutex<SessionInput>>,
}

impl AsyncRead for SessionReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut input = self
            .input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if input.pending.is_empty() {
            match input.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => input.pending = chunk,
                // Reader thread finished: EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        // Leftover bytes stay shared so a replaced attachment does not drop them
        let n = input.pending.len().min(buf.remaining());
        buf.put_slice(&input.pending[..n]);
        input.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}
