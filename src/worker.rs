//! Scoring worker
//!
//! Submissions are scored off the request path: the trigger endpoint drops a
//! job on a bounded in-process queue and returns immediately. Enqueueing is
//! idempotent per submission id (a job already waiting is not duplicated),
//! and the upsert downstream makes re-delivery harmless.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::engine;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct ScoreJob {
    pub submission_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job for this submission is already waiting.
    Duplicate,
    Full,
}

/// Producer half of the scoring queue. Cheap to clone; one lives in the
/// application state.
#[derive(Clone)]
pub struct ScoreQueue {
    tx: mpsc::Sender<ScoreJob>,
    pending: Arc<Mutex<HashSet<Uuid>>>,
}

impl ScoreQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScoreJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                pending: Arc::new(Mutex::new(HashSet::new())),
            },
            rx,
        )
    }

    pub async fn enqueue(&self, submission_id: Uuid) -> EnqueueOutcome {
        let mut pending = self.pending.lock().await;
        if !pending.insert(submission_id) {
            tracing::debug!(%submission_id, "scoring job already pending, dropping");
            return EnqueueOutcome::Duplicate;
        }
        match self.tx.try_send(ScoreJob { submission_id }) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(_) => {
                pending.remove(&submission_id);
                tracing::warn!(%submission_id, "scoring queue full, rejecting job");
                EnqueueOutcome::Full
            }
        }
    }

    async fn finish(&self, submission_id: Uuid) {
        self.pending.lock().await.remove(&submission_id);
    }
}

/// Spawn the consumer tasks. The receiver is shared so the configured number
/// of workers drain one queue.
pub fn spawn_workers(
    pool: PgPool,
    queue: ScoreQueue,
    rx: mpsc::Receiver<ScoreJob>,
    concurrency: usize,
) {
    let rx = Arc::new(Mutex::new(rx));
    for worker_id in 0..concurrency.max(1) {
        let pool = pool.clone();
        let queue = queue.clone();
        let rx = Arc::clone(&rx);
        tokio::spawn(async move {
            run_worker(worker_id, pool, queue, rx).await;
        });
    }
}

async fn run_worker(
    worker_id: usize,
    pool: PgPool,
    queue: ScoreQueue,
    rx: Arc<Mutex<mpsc::Receiver<ScoreJob>>>,
) {
    tracing::debug!(worker_id, "scoring worker started");
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker_id, "scoring queue closed, worker exiting");
            break;
        };
        process(worker_id, &pool, job).await;
        queue.finish(job.submission_id).await;
    }
}

async fn process(worker_id: usize, pool: &PgPool, job: ScoreJob) {
    for attempt in 1..=MAX_ATTEMPTS {
        match engine::score_submission(pool, job.submission_id).await {
            Ok(_) => return,
            Err(err) if attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(
                    worker_id,
                    submission_id = %job.submission_id,
                    attempt,
                    backoff_s = backoff.as_secs(),
                    error = %err,
                    "scoring attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                tracing::error!(
                    worker_id,
                    submission_id = %job.submission_id,
                    attempts = MAX_ATTEMPTS,
                    error = %err,
                    "scoring failed permanently"
                );
            }
        }
    }
}
