use super::args::TailArgs;
use super::process::{spawn_tail, terminate};
use super::stream::TailStream;
use super::TailError;
use crate::config::TailConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Who asked for a tail process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub route: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<u64>,
}

/// How a tail process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TailExit {
    Exited { code: i32 },
    Killed { signal: i32 },
}

impl TailExit {
    fn from_status(status: &ExitStatus) -> Option<Self> {
        if let Some(code) = status.code() {
            return Some(TailExit::Exited { code });
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Some(TailExit::Killed { signal });
            }
        }
        None
    }
}

/// Point-in-time view of one tail task, as reported in status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailTask {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub bytes_read: u64,
    pub request: RequestContext,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<TailExit>,
}

struct ActiveTail {
    task: TailTask,
    bytes_read: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl ActiveTail {
    fn has_exited(&self) -> bool {
        self.task.end.is_some() || self.task.exit.is_some()
    }

    fn snapshot(&self) -> TailTask {
        TailTask {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            ..self.task.clone()
        }
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<Uuid, ActiveTail>,
    terminated: Vec<TailTask>,
}

impl Registry {
    /// Records the terminal state. Later calls never overwrite it.
    fn finish(&mut self, id: Uuid, exit: Option<TailExit>, at: DateTime<Utc>) {
        if let Some(active) = self.active.get_mut(&id) {
            if active.has_exited() {
                return;
            }
            active.task.exit = exit;
            active.task.end = Some(at);
        }
    }
}

/// Owns every external follow process the daemon starts.
#[derive(Clone)]
pub struct TailManager {
    registry: Arc<Mutex<Registry>>,
    config: TailConfig,
}

impl TailManager {
    pub fn new(config: TailConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a tail process and registers it as active.
    ///
    /// The returned stream owns the process: dropping it terminates the
    /// process, whether the consumer finished, failed or disconnected.
    pub fn start(&self, args: TailArgs, request: RequestContext) -> Result<TailStream, TailError> {
        let mut child = spawn_tail(&self.config.program, &args).map_err(|source| TailError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(TailError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(TailError::MissingPipe("stderr"))?;

        let id = Uuid::new_v4();
        let pid = child.id();
        let bytes_read = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        tracing::info!(
            task_id = %id,
            pid = ?pid,
            path = %args.path.display(),
            service = %request.service,
            "Tail process started"
        );

        self.lock().active.insert(
            id,
            ActiveTail {
                task: TailTask {
                    id,
                    pid,
                    start: Utc::now(),
                    end: None,
                    bytes_read: 0,
                    request,
                    command: args.display_args(),
                    exit: None,
                },
                bytes_read: bytes_read.clone(),
                cancel: cancel.clone(),
            },
        );

        let (error_tx, error_rx) = oneshot::channel();
        tokio::spawn(watch_stderr(id, stderr, error_tx));
        tokio::spawn(supervise(
            id,
            child,
            cancel.clone(),
            self.registry.clone(),
            self.config.termination_grace,
        ));

        Ok(TailStream::new(id, stdout, error_rx, bytes_read, cancel))
    }

    /// Requests termination. Returns false if the task is not active.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.lock().active.get(&id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every active task.
    pub fn shutdown(&self) {
        let registry = self.lock();
        for active in registry.active.values() {
            active.cancel.cancel();
        }
        tracing::info!(count = registry.active.len(), "Cancelled all tail processes");
    }

    pub fn prune(&self) {
        self.prune_at(Utc::now());
    }

    /// Moves exited tasks to the terminated list, then ages and clips it.
    pub fn prune_at(&self, now: DateTime<Utc>) {
        let mut registry = self.lock();

        let exited: Vec<Uuid> = registry
            .active
            .iter()
            .filter(|(_, active)| active.has_exited())
            .map(|(id, _)| *id)
            .collect();
        for id in exited {
            if let Some(active) = registry.active.remove(&id) {
                let mut task = active.snapshot();
                task.end.get_or_insert(now);
                registry.terminated.push(task);
            }
        }

        let cutoff = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            registry
                .terminated
                .retain(|task| task.end.map_or(true, |end| end > cutoff));
        }

        registry.terminated.sort_by_key(|task| task.end);
        let excess = registry
            .terminated
            .len()
            .saturating_sub(self.config.max_terminated);
        registry.terminated.drain(..excess);
    }

    /// Active tasks, oldest first.
    pub fn active(&self) -> Vec<TailTask> {
        let mut tasks: Vec<TailTask> = self.lock().active.values().map(ActiveTail::snapshot).collect();
        tasks.sort_by_key(|task| task.start);
        tasks
    }

    /// Terminated tasks, ordered by end time.
    pub fn terminated(&self) -> Vec<TailTask> {
        self.lock().terminated.clone()
    }
}

/// Waits for the process to exit or for cancellation, then records the end.
async fn supervise(
    id: Uuid,
    mut child: Child,
    cancel: CancellationToken,
    registry: Arc<Mutex<Registry>>,
    grace: std::time::Duration,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    let result: io::Result<ExitStatus> = match exited {
        Some(status) => status,
        None => terminate(&mut child, grace).await,
    };

    let exit = match &result {
        Ok(status) => TailExit::from_status(status),
        Err(e) => {
            tracing::warn!(task_id = %id, error = %e, "Failed to reap tail process");
            None
        }
    };
    tracing::info!(task_id = %id, exit = ?exit, "Tail process ended");

    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .finish(id, exit, Utc::now());
}

/// Forwards the first chunk of error output to the stream; logs the rest.
async fn watch_stderr(id: Uuid, mut stderr: ChildStderr, error_tx: oneshot::Sender<String>) {
    let mut error_tx = Some(error_tx);
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(task_id = %id, error = %e, "Tail stderr read failed");
                break;
            }
        };
        let message = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        tracing::warn!(task_id = %id, message = %message, "Tail process wrote to stderr");
        if let Some(tx) = error_tx.take() {
            let _ = tx.send(message);
        }
    }
}
