use super::TailError;
use axum::body::Bytes;
use futures::Stream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Output of one tail process.
///
/// Yields stdout chunks until the process closes stdout. Anything the
/// process writes to stderr ends the stream with an error. Dropping the
/// stream cancels the task, which terminates the process.
pub struct TailStream {
    task_id: Uuid,
    stdout: ReaderStream<ChildStdout>,
    stderr: Option<oneshot::Receiver<String>>,
    bytes_read: Arc<AtomicU64>,
    stdout_closed: bool,
    done: bool,
    _guard: DropGuard,
}

impl TailStream {
    pub(super) fn new(
        task_id: Uuid,
        stdout: ChildStdout,
        stderr: oneshot::Receiver<String>,
        bytes_read: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            stdout: ReaderStream::new(stdout),
            stderr: Some(stderr),
            bytes_read,
            stdout_closed: false,
            done: false,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Bytes delivered so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

impl TailStream {
    /// `Ready(Some)` once the process wrote to stderr, `Ready(None)` if it
    /// closed stderr without writing anything.
    fn poll_stderr(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let Some(stderr) = self.stderr.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(stderr).poll(cx) {
            Poll::Ready(Ok(message)) => Poll::Ready(Some(message)),
            Poll::Ready(Err(_)) => {
                self.stderr = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for TailStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Output already on the pipe goes out before any error.
        if !this.stdout_closed {
            match Pin::new(&mut this.stdout).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.bytes_read.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.stdout_closed = true,
                Poll::Pending => {}
            }
        }

        match this.poll_stderr(cx) {
            Poll::Ready(Some(message)) => {
                this.done = true;
                Poll::Ready(Some(Err(io::Error::other(TailError::ProcessOutput(message)))))
            }
            Poll::Ready(None) if this.stdout_closed => {
                this.done = true;
                Poll::Ready(None)
            }
            // stdout is still open and registered for wakeup
            Poll::Ready(None) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}
