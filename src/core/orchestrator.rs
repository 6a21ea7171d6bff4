//! Restore workflow state machine.
//!
//! One call to [`RestoreOrchestrator::execute`] drives one job from `Pending`
//! to a terminal step as a plain synchronous sequence:
//!
//! 1. Stopping: probe both containers, stop the server if it was running
//! 2. Clearing: wipe and recreate the data directory
//! 3. Extracting: unpack the backup into the empty data directory
//! 4. Starting: bring back whatever was running before
//! 5. WaitingReady: watch the server's logs for its readiness marker
//!
//! Failures in steps 1-4 end the job in `Failed`. Nothing is rolled back:
//! the backup archive itself is the recovery path. Step 5 never fails a job.

use std::io::ErrorKind;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::archive::{ArchiveError, ArchiveExtractor};
use super::catalog::ServerCatalog;
use super::container::{ContainerControl, ContainerError, ContainerStatus};
use super::models::{JobSnapshot, RestoreJob, RestoreStep};
use super::progress::JobProgress;
use super::readiness::{Readiness, ReadinessProbe};
use super::registry::{RegistryError, RestoreRegistry};
use crate::logging::restore_span;

/// Fatal workflow errors. Each message names the step that failed.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Failed to check container status: {0}")]
    Status(#[source] ContainerError),
    #[error("Failed to stop container: {0}")]
    Stop(#[source] ContainerError),
    #[error("Failed to clear data directory {path}: {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Data directory {0} is not empty after clearing")]
    NotEmpty(PathBuf),
    #[error("Failed to extract backup: {0}")]
    Extract(#[from] ArchiveError),
    #[error("Failed to start container: {0}")]
    Start(#[source] ContainerError),
    #[error("Failed to record restore progress: {0}")]
    Progress(#[from] RegistryError),
    #[error("Restore worker panicked during {0}")]
    Panicked(RestoreStep),
}

/// Tunables for the workflow, derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub stop_timeout: Duration,
    pub restart_timeout: Duration,
    pub backup_container_suffix: String,
    /// How far before the container start the readiness log window begins.
    pub log_lookback: Duration,
    pub readiness: ReadinessProbe,
}

/// Clears the server's exclusion slot when dropped, whatever happened.
struct ActiveSlot<'a> {
    registry: &'a RestoreRegistry,
    server: String,
    job_id: String,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.registry.release_active(&self.server, &self.job_id);
    }
}

pub struct RestoreOrchestrator {
    registry: RestoreRegistry,
    catalog: ServerCatalog,
    containers: Arc<dyn ContainerControl>,
    extractor: Arc<dyn ArchiveExtractor>,
    settings: RestoreSettings,
}

impl RestoreOrchestrator {
    pub fn new(
        registry: RestoreRegistry,
        catalog: ServerCatalog,
        containers: Arc<dyn ContainerControl>,
        extractor: Arc<dyn ArchiveExtractor>,
        settings: RestoreSettings,
    ) -> Self {
        Self {
            registry,
            catalog,
            containers,
            extractor,
            settings,
        }
    }

    pub fn backup_container_name(&self, server: &str) -> String {
        format!("{}{}", server, self.settings.backup_container_suffix)
    }

    /// Run the job to a terminal step and return its final snapshot.
    ///
    /// Blocks for the whole workflow; call from a blocking worker. Errors are
    /// returned only when the job cannot be claimed (unknown, already running
    /// or finished); workflow failures end up in the snapshot instead.
    pub fn execute(&self, job_id: &str) -> Result<JobSnapshot, RegistryError> {
        let job = self.registry.get_job(job_id)?;
        let span = restore_span(&job.id, &job.server_name);
        let _enter = span.enter();

        let mut progress = JobProgress::new(self.registry.clone(), job_id);
        progress.begin(RestoreStep::Stopping, 5, "Checking container status...")?;

        let _slot = ActiveSlot {
            registry: &self.registry,
            server: job.server_name.clone(),
            job_id: job.id.clone(),
        };

        info!(backup = %job.backup_file, "Restore started");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(&job, &mut progress)))
            .unwrap_or_else(|_| Err(RestoreError::Panicked(progress.step())));

        match outcome {
            Ok(message) => {
                let snapshot = progress.complete(message)?;
                info!(message = %snapshot.message, "Restore completed");
                Ok(snapshot)
            }
            Err(e) => {
                error!(step = %progress.step(), error = %e, "Restore failed");
                progress.fail(e.to_string())
            }
        }
    }

    /// Steps 1-5. Returns the completion message.
    fn run(&self, job: &RestoreJob, progress: &mut JobProgress) -> Result<String, RestoreError> {
        let server = job.server_name.as_str();
        let backup_container = self.backup_container_name(server);
        let paths = self.catalog.paths(server);
        let mut warnings: Vec<String> = Vec::new();

        // Step 1: capture the pre-restore run-states, then stop the server.
        let server_was_running = match self.containers.status(server) {
            Ok(status) => status == ContainerStatus::Running,
            Err(ContainerError::NotFound(_)) => false,
            Err(e) => return Err(RestoreError::Status(e)),
        };
        let backup_was_running = self.containers.is_running(&backup_container);
        progress.record_initial_state(server_was_running, backup_was_running)?;

        if server_was_running {
            progress.update(RestoreStep::Stopping, 10, "Stopping container...")?;
            self.containers
                .stop(server, self.settings.stop_timeout)
                .map_err(RestoreError::Stop)?;
            progress.update(RestoreStep::Stopping, 20, "Container stopped")?;
        } else {
            progress.update(RestoreStep::Stopping, 20, "Container not running")?;
        }

        // Step 2
        progress.update(RestoreStep::Clearing, 30, "Removing old data...")?;
        reset_data_dir(&paths.data_dir)?;
        progress.update(RestoreStep::Clearing, 40, "Data directory cleared")?;

        // Step 3
        progress.update(RestoreStep::Extracting, 45, "Extracting backup...")?;
        let summary = self
            .extractor
            .extract(&paths.backup(&job.backup_file), &paths.data_dir)?;
        progress.update(
            RestoreStep::Extracting,
            85,
            format!("Backup extracted ({} entries)", summary.entries),
        )?;

        // Step 4: the server ends up exactly as it was before the restore.
        let log_since = Utc::now().timestamp() - self.settings.log_lookback.as_secs() as i64;

        if server_was_running {
            progress.update(RestoreStep::Starting, 87, "Starting container...")?;
            self.containers.start(server).map_err(RestoreError::Start)?;
            progress.update(RestoreStep::Starting, 90, "Container started")?;
        } else {
            progress.update(
                RestoreStep::Starting,
                90,
                "Container left stopped (was not running before)",
            )?;
        }

        if backup_was_running {
            progress.update(RestoreStep::Starting, 92, "Restarting backup container...")?;
            match self
                .containers
                .restart(&backup_container, self.settings.restart_timeout)
            {
                Ok(()) => {
                    progress.update(RestoreStep::Starting, 94, "Backup container restarted")?;
                }
                Err(e) => {
                    let warning =
                        format!("Warning: failed to restart {}: {}", backup_container, e);
                    warn!(container = %backup_container, error = %e, "Backup container restart failed");
                    progress.update(RestoreStep::Starting, 94, warning.clone())?;
                    warnings.push(warning);
                }
            }
        }

        // Step 5
        if server_was_running {
            progress.update(
                RestoreStep::WaitingReady,
                95,
                "Waiting for server to become ready...",
            )?;

            let message = match self
                .settings
                .readiness
                .wait(self.containers.as_ref(), server, log_since)
            {
                Readiness::Ready => "Server is ready".to_string(),
                Readiness::TimedOut(after) => {
                    let warning =
                        format!("Readiness check timed out after {}s", after.as_secs());
                    warnings.push(warning.clone());
                    warning
                }
                Readiness::Unavailable(reason) => {
                    let warning = format!("Readiness check unavailable: {}", reason);
                    warnings.push(warning.clone());
                    warning
                }
            };
            progress.update(RestoreStep::WaitingReady, 99, message)?;
        }

        if warnings.is_empty() {
            Ok("Restore completed successfully!".to_string())
        } else {
            Ok(format!("Restore completed with warnings: {}", warnings.join("; ")))
        }
    }
}

/// Delete the data directory (if any) and recreate it empty.
fn reset_data_dir(data_dir: &Path) -> Result<(), RestoreError> {
    let clear_err = |source| RestoreError::Clear {
        path: data_dir.to_path_buf(),
        source,
    };

    match std::fs::remove_dir_all(data_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(clear_err(e)),
    }

    std::fs::create_dir_all(data_dir).map_err(clear_err)?;

    let mut entries = std::fs::read_dir(data_dir).map_err(clear_err)?;
    if entries.next().is_some() {
        return Err(RestoreError::NotEmpty(data_dir.to_path_buf()));
    }

    Ok(())
}
