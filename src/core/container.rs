use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run-state of a container as reported by the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Exited,
    Paused,
    Restarting,
    Created,
    NotFound,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "exited" => Self::Exited,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "created" => Self::Created,
            "not_found" => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Created => "created",
            Self::NotFound => "not_found",
            Self::Other(s) => s,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container engine error: {0}")]
    Engine(String),
    #[error("Failed to invoke container engine: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over a container engine.
///
/// All methods block until the engine answers. Callers running on an async
/// runtime must invoke them from a blocking context (e.g. `spawn_blocking`).
pub trait ContainerControl: Send + Sync {
    fn status(&self, name: &str) -> Result<ContainerStatus, ContainerError>;

    /// Stop a container, waiting up to `grace` before the engine kills it.
    fn stop(&self, name: &str, grace: Duration) -> Result<(), ContainerError>;

    fn start(&self, name: &str) -> Result<(), ContainerError>;

    fn restart(&self, name: &str, grace: Duration) -> Result<(), ContainerError>;

    /// Return up to `max_lines` of log output emitted since `since_epoch_secs`.
    fn tail_logs_since(
        &self,
        name: &str,
        since_epoch_secs: i64,
        max_lines: usize,
    ) -> Result<String, ContainerError>;

    /// Engine errors count as "not running".
    fn is_running(&self, name: &str) -> bool {
        matches!(self.status(name), Ok(ContainerStatus::Running))
    }
}
