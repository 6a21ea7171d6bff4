//! In-memory registry of restore jobs.
//!
//! The registry owns the canonical job records, the per-server active-job
//! markers and the optional progress sink for each job. A single mutex guards
//! all three maps; it is only ever held for a map operation, never across I/O.
//!
//! Job history is kept for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{JobSnapshot, RestoreJob, RestoreStep};

/// Buffered snapshots per sink before new ones are dropped.
pub const SINK_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A restore is already in progress for server {server} (job {job_id})")]
    AlreadyActive { server: String, job_id: String },
    #[error("Restore job not found: {0}")]
    NotFound(String),
    #[error("Restore job {0} has already finished")]
    Terminal(String),
    #[error("Restore job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: RestoreStep,
        to: RestoreStep,
    },
}

/// Handle returned from [`RestoreRegistry::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    /// State of the job at the moment of subscribing.
    pub current: JobSnapshot,
    /// Snapshots published after `current`. Closed once the job is terminal.
    pub updates: mpsc::Receiver<JobSnapshot>,
    /// Token identifying this sink for [`RestoreRegistry::unsubscribe`].
    pub token: u64,
}

struct Sink {
    token: u64,
    tx: mpsc::Sender<JobSnapshot>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, RestoreJob>,
    active: HashMap<String, String>,
    sinks: HashMap<String, Sink>,
    next_token: u64,
}

/// Thread-safe, cheaply cloneable job registry.
#[derive(Clone, Default)]
pub struct RestoreRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl RestoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Each critical section is a single map operation, so a panic while
        // holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a job for `server_name`, unless one is already in flight.
    pub fn create_job(
        &self,
        server_name: &str,
        backup_file: &str,
    ) -> Result<RestoreJob, RegistryError> {
        let mut inner = self.lock();

        let in_flight = inner
            .active
            .get(server_name)
            .and_then(|id| inner.jobs.get(id))
            .filter(|job| !job.is_terminal())
            .map(|job| job.id.clone());

        if let Some(job_id) = in_flight {
            return Err(RegistryError::AlreadyActive {
                server: server_name.to_string(),
                job_id,
            });
        }

        let id = Uuid::now_v7().simple().to_string();
        let job = RestoreJob::new(id.clone(), server_name.to_string(), backup_file.to_string());

        inner.jobs.insert(id.clone(), job.clone());
        inner.active.insert(server_name.to_string(), id.clone());

        debug!(job_id = %id, server = %server_name, backup = %backup_file, "Restore job created");
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<RestoreJob, RegistryError> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn snapshot(&self, id: &str) -> Result<JobSnapshot, RegistryError> {
        self.get_job(id).map(|job| job.snapshot())
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.lock().jobs.values().map(|j| j.snapshot()).collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    /// Id of the job currently holding `server_name`'s exclusion slot.
    pub fn active_job(&self, server_name: &str) -> Option<String> {
        self.lock().active.get(server_name).cloned()
    }

    pub fn active_count(&self) -> usize {
        let inner = self.lock();
        inner
            .active
            .values()
            .filter(|id| inner.jobs.get(*id).is_some_and(|j| !j.is_terminal()))
            .count()
    }

    /// Clear the active marker for `server_name` if it still points at `id`.
    pub fn release_active(&self, server_name: &str, id: &str) {
        let mut inner = self.lock();
        if inner.active.get(server_name).map(String::as_str) == Some(id) {
            inner.active.remove(server_name);
            debug!(job_id = %id, server = %server_name, "Released active restore slot");
        }
    }

    /// Apply `f` to the job record, then publish the resulting snapshot to the
    /// job's sink. Terminal jobs are immutable.
    pub fn update<F>(&self, id: &str, f: F) -> Result<JobSnapshot, RegistryError>
    where
        F: FnOnce(&mut RestoreJob) -> Result<(), RegistryError>,
    {
        let (snapshot, sink) = {
            let mut inner = self.lock();
            let job = inner
                .jobs
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            if job.is_terminal() {
                return Err(RegistryError::Terminal(id.to_string()));
            }

            f(job)?;
            if job.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }

            let snapshot = job.snapshot();
            // A terminal job never publishes again. Taking the sender out here
            // closes the subscriber's stream right after the terminal snapshot.
            let sink = if snapshot.is_terminal() {
                inner.sinks.remove(id).map(|s| s.tx)
            } else {
                inner.sinks.get(id).map(|s| s.tx.clone())
            };
            (snapshot, sink)
        };

        if let Some(tx) = sink {
            deliver(&tx, &snapshot);
        }

        Ok(snapshot)
    }

    /// Register a progress sink for `id`, replacing any existing one.
    pub fn subscribe(&self, id: &str) -> Result<Subscription, RegistryError> {
        let mut inner = self.lock();
        let current = inner
            .jobs
            .get(id)
            .map(|j| j.snapshot())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        inner.next_token += 1;
        let token = inner.next_token;

        // A finished job never publishes again; hand back a closed stream.
        if !current.is_terminal() {
            inner.sinks.insert(id.to_string(), Sink { token, tx });
        }

        Ok(Subscription {
            current,
            updates: rx,
            token,
        })
    }

    /// Remove the sink for `id` if it is still the one identified by `token`.
    pub fn unsubscribe(&self, id: &str, token: u64) {
        let mut inner = self.lock();
        if inner.sinks.get(id).is_some_and(|s| s.token == token) {
            inner.sinks.remove(id);
        }
    }

    pub fn has_sink(&self, id: &str) -> bool {
        self.lock().sinks.contains_key(id)
    }
}

/// Best-effort, non-blocking delivery. Full or closed sinks drop the snapshot.
fn deliver(tx: &mpsc::Sender<JobSnapshot>, snapshot: &JobSnapshot) {
    match tx.try_send(snapshot.clone()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(job_id = %snapshot.job_id, "Progress sink full, dropping update");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(job_id = %snapshot.job_id, "Progress sink disconnected");
        }
    }
}
