//! Streaming response bodies for batch reads.

use crate::batch::{BatchDescriptor, BatchId, CURRENT_FILE};
use crate::state::SharedState;
use crate::tail::{FollowMode, RequestContext, TailArgs, TailStart};
use axum::body::{Body, Bytes};
use futures::StreamExt;
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

type Chunk = io::Result<Bytes>;

/// A follow request on the batch that was `current` when the request arrived.
#[derive(Debug, Clone)]
pub struct FollowRequest {
    pub service: String,
    pub batch_id: BatchId,
    /// 1-based byte position from the query string; `None`/`0` mean the start.
    pub start: Option<u64>,
}

impl FollowRequest {
    /// 1-based position of the next byte to deliver after `sent` bytes.
    fn position(&self, sent: u64) -> u64 {
        self.start.unwrap_or(1).max(1) + sent
    }
}

enum Outcome {
    Finished,
    Rotated(Vec<BatchDescriptor>),
}

/// Opens `path` positioned at 1-based byte `start` (skipping `start - 1` bytes).
pub async fn read_file_from(path: &Path, start: Option<u64>) -> io::Result<ReaderStream<tokio::fs::File>> {
    let mut file = tokio::fs::File::open(path).await?;
    let skip = start.unwrap_or(0).saturating_sub(1);
    if skip > 0 {
        file.seek(SeekFrom::Start(skip)).await?;
    }
    Ok(ReaderStream::new(file))
}

/// Body that follows `current` and survives rotations.
///
/// A producer task feeds the body through a channel. When the body is
/// dropped the channel closes, the producer returns, and the tail stream
/// it owns is dropped, which terminates the subprocess.
pub fn follow_batch(state: SharedState, request: FollowRequest, batches: Vec<BatchDescriptor>) -> Body {
    let (tx, rx) = mpsc::channel::<Chunk>(16);
    tokio::spawn(run_follow(state, request, batches, tx));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Body::from_stream(stream)
}

async fn run_follow(
    state: SharedState,
    request: FollowRequest,
    mut batches: Vec<BatchDescriptor>,
    tx: mpsc::Sender<Chunk>,
) {
    let mut sent: u64 = 0;
    let mut reresolved: u32 = 0;

    loop {
        let Some(batch) = batches.iter().find(|b| b.batch_id == request.batch_id).cloned() else {
            warn!(
                service = %request.service,
                batch_id = request.batch_id,
                "Followed batch disappeared after rotation"
            );
            let _ = tx
                .send(Err(io::Error::other(format!(
                    "batch {} no longer exists",
                    request.batch_id
                ))))
                .await;
            return;
        };

        let outcome = if batch.is_current() {
            follow_current(&state, &request, &batches, &tx, &mut sent).await
        } else {
            let path = state.service_dir(&request.service).join(&batch.file_name);
            copy_file(&path, request.position(sent), &tx, &mut sent).await;
            Outcome::Finished
        };

        match outcome {
            Outcome::Finished => return,
            Outcome::Rotated(fresh) => {
                reresolved += 1;
                if reresolved > state.config.tail.max_reresolve {
                    warn!(
                        service = %request.service,
                        batch_id = request.batch_id,
                        reresolved,
                        "Too many rotations during one follow request"
                    );
                    let _ = tx
                        .send(Err(io::Error::other("too many rotations while following")))
                        .await;
                    return;
                }
                batches = fresh;
            }
        }
    }
}

/// Streams `current` through a tail process until the client goes away, the
/// process ends, or a rotation check sees the listing change.
async fn follow_current(
    state: &SharedState,
    request: &FollowRequest,
    batches: &[BatchDescriptor],
    tx: &mpsc::Sender<Chunk>,
    sent: &mut u64,
) -> Outcome {
    let start = TailStart::from_query(Some(request.position(*sent)));
    let path = state.service_dir(&request.service).join(CURRENT_FILE);
    let mut tail = match state.tails.start(
        TailArgs::new(path, start, FollowMode::Descriptor),
        RequestContext {
            route: "batch".to_string(),
            service: request.service.clone(),
            batch_id: Some(request.batch_id),
        },
    ) {
        Ok(tail) => tail,
        Err(e) => {
            let _ = tx.send(Err(io::Error::other(e))).await;
            return Outcome::Finished;
        }
    };

    let snapshot = identities(batches);
    let mut rotation_check = tokio::time::interval(state.config.tail.rotation_check_interval);
    rotation_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(
                    task_id = %tail.task_id(),
                    bytes = tail.bytes_read(),
                    "Follow client disconnected"
                );
                return Outcome::Finished;
            }
            chunk = tail.next() => match chunk {
                Some(Ok(bytes)) => {
                    let len = bytes.len() as u64;
                    if tx.send(Ok(bytes)).await.is_err() {
                        return Outcome::Finished;
                    }
                    *sent += len;
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return Outcome::Finished;
                }
                None => return Outcome::Finished,
            },
            _ = rotation_check.tick() => match state.list_batches(&request.service).await {
                Ok(fresh) if identities(&fresh) != snapshot => {
                    info!(
                        service = %request.service,
                        batch_id = request.batch_id,
                        task_id = %tail.task_id(),
                        sent = *sent,
                        "Rotation detected, re-resolving follow stream"
                    );
                    return Outcome::Rotated(fresh);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(service = %request.service, error = %e, "Rotation check failed");
                }
            },
        }
    }
}

/// Sends the rest of a closed batch starting at 1-based `position`.
async fn copy_file(path: &Path, position: u64, tx: &mpsc::Sender<Chunk>, sent: &mut u64) {
    let mut stream = match read_file_from(path, Some(position)).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    while let Some(chunk) = stream.next().await {
        let failed = chunk.is_err();
        if let Ok(bytes) = &chunk {
            *sent += bytes.len() as u64;
        }
        if tx.send(chunk).await.is_err() || failed {
            return;
        }
    }
}

fn identities(batches: &[BatchDescriptor]) -> Vec<(&str, BatchId)> {
    batches
        .iter()
        .map(|b| (b.file_name.as_str(), b.batch_id))
        .collect()
}
