use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a restore job in its workflow.
///
/// Variants are declared in the order a successful run visits them, so the
/// derived `Ord` matches workflow order. `Failed` sorts last and is reachable
/// from any non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStep {
    Pending,
    Stopping,
    Clearing,
    Extracting,
    Starting,
    WaitingReady,
    Completed,
    Failed,
}

impl RestoreStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Stopping => "stopping",
            Self::Clearing => "clearing",
            Self::Extracting => "extracting",
            Self::Starting => "starting",
            Self::WaitingReady => "waiting_ready",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` respects the workflow order.
    /// Staying on the same step is allowed so a step can report several updates.
    pub fn can_advance_to(&self, next: RestoreStep) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RestoreStep::Failed || next >= *self
    }
}

impl std::fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record of a restore job, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: String,
    pub server_name: String,
    pub backup_file: String,
    pub step: RestoreStep,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub server_container_was_running: bool,
    pub backup_container_was_running: bool,
}

impl RestoreJob {
    pub fn new(id: String, server_name: String, backup_file: String) -> Self {
        Self {
            id,
            server_name,
            backup_file,
            step: RestoreStep::Pending,
            progress: 0,
            message: String::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            server_container_was_running: false,
            backup_container_was_running: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            server_name: self.server_name.clone(),
            backup_file: self.backup_file.clone(),
            step: self.step,
            progress: self.progress,
            message: self.message.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            server_container_was_running: self.server_container_was_running,
            backup_container_was_running: self.backup_container_was_running,
        }
    }
}

/// Point-in-time copy of a job handed to pollers and progress sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub server_name: String,
    pub backup_file: String,
    pub step: RestoreStep,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Run-states captured before the restore touched anything.
    pub server_container_was_running: bool,
    pub backup_container_was_running: bool,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}
