//! Container control through the docker (or compatible) CLI.

use std::process::{Command, Output};
use std::time::Duration;

use tracing::debug;

use crate::core::container::{ContainerControl, ContainerError, ContainerStatus};

pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, ContainerError> {
        debug!(binary = %self.binary, args = ?args, "Invoking container engine");
        Ok(Command::new(&self.binary).args(args).output()?)
    }

    /// Run a command whose only interesting result is success or failure.
    fn run_checked(&self, name: &str, args: &[&str]) -> Result<Output, ContainerError> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(name, &output))
        }
    }
}

fn classify_failure(name: &str, output: &Output) -> ContainerError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if is_missing_container(&stderr) {
        ContainerError::NotFound(name.to_string())
    } else if stderr.is_empty() {
        ContainerError::Engine(format!("exited with {}", output.status))
    } else {
        ContainerError::Engine(stderr)
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

impl ContainerControl for DockerCli {
    fn status(&self, name: &str) -> Result<ContainerStatus, ContainerError> {
        let output = self.run(&["inspect", "-f", "{{.State.Status}}", name])?;

        if output.status.success() {
            return Ok(ContainerStatus::parse(&String::from_utf8_lossy(&output.stdout)));
        }

        match classify_failure(name, &output) {
            ContainerError::NotFound(_) => Ok(ContainerStatus::NotFound),
            other => Err(other),
        }
    }

    fn stop(&self, name: &str, grace: Duration) -> Result<(), ContainerError> {
        let secs = grace.as_secs().to_string();
        self.run_checked(name, &["stop", "-t", &secs, name])?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.run_checked(name, &["start", name])?;
        Ok(())
    }

    fn restart(&self, name: &str, grace: Duration) -> Result<(), ContainerError> {
        let secs = grace.as_secs().to_string();
        self.run_checked(name, &["restart", "-t", &secs, name])?;
        Ok(())
    }

    fn tail_logs_since(
        &self,
        name: &str,
        since_epoch_secs: i64,
        max_lines: usize,
    ) -> Result<String, ContainerError> {
        let since = since_epoch_secs.to_string();
        let tail = max_lines.to_string();
        let output = self.run_checked(name, &["logs", "--since", &since, "--tail", &tail, name])?;

        // Containers commonly log to stderr as well as stdout.
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}
