//! Bounded pool of restore workers.
//!
//! Job ids are queued on a bounded channel and picked up by a fixed number of
//! worker tasks. Each worker runs one workflow at a time on the blocking
//! thread pool, so request handlers never wait on container or filesystem I/O.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::orchestrator::RestoreOrchestrator;

const QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Restore workers are shut down")]
    ShutDown,
}

pub struct RestoreWorkers {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    size: usize,
}

impl RestoreWorkers {
    /// Spawn `size` workers on the current tokio runtime.
    pub fn spawn(orchestrator: Arc<RestoreOrchestrator>, size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        for worker in 0..size {
            tracker.spawn(worker_loop(
                worker,
                rx.clone(),
                orchestrator.clone(),
                cancel.clone(),
            ));
        }
        tracker.close();

        info!(workers = size, "Restore workers started");

        Self {
            tx,
            cancel,
            tracker,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job for execution. This is the only entry point for workflows.
    pub async fn submit(&self, job_id: impl Into<String>) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::ShutDown);
        }
        self.tx
            .send(job_id.into())
            .await
            .map_err(|_| WorkerError::ShutDown)
    }

    /// Stop taking new jobs and wait for in-flight workflows to finish.
    /// Jobs still queued stay pending.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        info!("Restore workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    orchestrator: Arc<RestoreOrchestrator>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            job_id = async { rx.lock().await.recv().await } => job_id,
        };
        let Some(job_id) = next else {
            break;
        };

        debug!(worker, job_id = %job_id, "Worker picked up restore job");

        let orchestrator = orchestrator.clone();
        let id = job_id.clone();
        match tokio::task::spawn_blocking(move || orchestrator.execute(&id)).await {
            Ok(Ok(snapshot)) => {
                debug!(worker, job_id = %job_id, step = %snapshot.step, "Restore job finished");
            }
            Ok(Err(e)) => {
                warn!(worker, job_id = %job_id, error = %e, "Restore job could not be run");
            }
            Err(e) => {
                error!(worker, job_id = %job_id, error = %e, "Restore worker task failed");
            }
        }
    }

    debug!(worker, "Worker exiting");
}
