//! Progress reporting for a running restore job.
//!
//! `JobProgress` is the single writer for one job: the worker executing the
//! workflow owns it, and every step transition goes through it. Each update
//! lands in the registry (for polling readers) and is pushed best-effort to
//! the job's sink, if one is registered.

use tracing::{debug, warn};

use super::models::{JobSnapshot, RestoreStep};
use super::registry::{RegistryError, RestoreRegistry};

pub struct JobProgress {
    registry: RestoreRegistry,
    job_id: String,
    step: RestoreStep,
    progress: u8,
}

impl JobProgress {
    pub fn new(registry: RestoreRegistry, job_id: impl Into<String>) -> Self {
        Self {
            registry,
            job_id: job_id.into(),
            step: RestoreStep::Pending,
            progress: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn step(&self) -> RestoreStep {
        self.step
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Claim a pending job and move it to its first step. Fails if another
    /// execution already picked the job up or it has finished.
    pub fn begin(
        &mut self,
        step: RestoreStep,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<JobSnapshot, RegistryError> {
        self.apply(step, progress, message.into(), true)
    }

    /// Move the job to `step` at `progress` with a new status message.
    ///
    /// Progress never goes backwards while the job is active: a lower value is
    /// clamped to the last reported one.
    pub fn update(
        &mut self,
        step: RestoreStep,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<JobSnapshot, RegistryError> {
        self.apply(step, progress, message.into(), false)
    }

    fn apply(
        &mut self,
        step: RestoreStep,
        progress: u8,
        message: String,
        require_pending: bool,
    ) -> Result<JobSnapshot, RegistryError> {
        let progress = progress.clamp(self.progress, 100);
        let from = self.step;
        let job_id = self.job_id.clone();

        let snapshot = self.registry.update(&self.job_id, move |job| {
            let pending_ok = !require_pending || job.step == RestoreStep::Pending;
            if !pending_ok || !from.can_advance_to(step) || !job.step.can_advance_to(step) {
                return Err(RegistryError::InvalidTransition {
                    job_id,
                    from: job.step,
                    to: step,
                });
            }
            job.step = step;
            job.progress = progress.max(job.progress);
            job.message = message;
            Ok(())
        })?;

        self.step = snapshot.step;
        self.progress = snapshot.progress;

        debug!(
            job_id = %self.job_id,
            step = %snapshot.step,
            progress = snapshot.progress,
            message = %snapshot.message,
            "Restore progress"
        );

        Ok(snapshot)
    }

    /// Record the container run-states probed before anything was touched.
    pub fn record_initial_state(
        &self,
        server_was_running: bool,
        backup_was_running: bool,
    ) -> Result<(), RegistryError> {
        self.registry.update(&self.job_id, |job| {
            job.server_container_was_running = server_was_running;
            job.backup_container_was_running = backup_was_running;
            Ok(())
        })?;
        Ok(())
    }

    pub fn complete(&mut self, message: impl Into<String>) -> Result<JobSnapshot, RegistryError> {
        self.update(RestoreStep::Completed, 100, message)
    }

    /// Terminal failure. Progress stays at its last reported value.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<JobSnapshot, RegistryError> {
        let error = error.into();
        let message = format!("Error: {}", error);
        let snapshot = self.registry.update(&self.job_id, move |job| {
            job.step = RestoreStep::Failed;
            job.error = Some(error);
            job.message = message;
            Ok(())
        })?;

        self.step = snapshot.step;
        warn!(
            job_id = %self.job_id,
            progress = snapshot.progress,
            error = snapshot.error.as_deref().unwrap_or_default(),
            "Restore failed"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (RestoreRegistry, JobProgress) {
        let registry = RestoreRegistry::new();
        let job = registry.create_job("alpha", "a.tgz").unwrap();
        let progress = JobProgress::new(registry.clone(), job.id);
        (registry, progress)
    }

    #[test]
    fn test_update_writes_through_to_registry() {
        let (registry, mut progress) = setup();

        progress
            .update(RestoreStep::Stopping, 5, "Checking container status...")
            .unwrap();

        let job = registry.get_job(progress.job_id()).unwrap();
        assert_eq!(job.step, RestoreStep::Stopping);
        assert_eq!(job.progress, 5);
        assert_eq!(job.message, "Checking container status...");
    }

    #[test]
    fn test_progress_is_clamped_non_decreasing() {
        let (_registry, mut progress) = setup();

        progress.update(RestoreStep::Clearing, 40, "cleared").unwrap();
        let snapshot = progress.update(RestoreStep::Clearing, 30, "again").unwrap();

        assert_eq!(snapshot.progress, 40);
    }

    #[test]
    fn test_update_rejects_going_back() {
        let (_registry, mut progress) = setup();

        progress.update(RestoreStep::Extracting, 45, "x").unwrap();
        let err = progress.update(RestoreStep::Stopping, 50, "y").unwrap_err();

        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(progress.step(), RestoreStep::Extracting);
    }

    #[test]
    fn test_begin_claims_pending_job_once() {
        let (registry, mut progress) = setup();
        progress.begin(RestoreStep::Stopping, 5, "Checking container status...").unwrap();

        let mut second = JobProgress::new(registry, progress.job_id());
        let err = second
            .begin(RestoreStep::Stopping, 5, "Checking container status...")
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_fail_keeps_last_progress() {
        let (registry, mut progress) = setup();

        progress.update(RestoreStep::Stopping, 10, "Stopping container...").unwrap();
        let snapshot = progress.fail("Failed to stop container: boom").unwrap();

        assert_eq!(snapshot.step, RestoreStep::Failed);
        assert_eq!(snapshot.progress, 10);
        assert_eq!(snapshot.error.as_deref(), Some("Failed to stop container: boom"));
        assert!(snapshot.completed_at.is_some());
        assert!(registry.get_job(progress.job_id()).unwrap().is_terminal());
    }

    #[test]
    fn test_complete_sets_full_progress() {
        let (_registry, mut progress) = setup();

        let snapshot = progress.complete("done").unwrap();
        assert_eq!(snapshot.progress, 100);
        assert!(snapshot.error.is_none());
        assert!(snapshot.completed_at.is_some());

        // Finished jobs accept no further updates.
        assert!(matches!(
            progress.update(RestoreStep::Completed, 100, "again"),
            Err(RegistryError::Terminal(_))
        ));
    }
}
