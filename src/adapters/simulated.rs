use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;

use crate::core::container::{ContainerControl, ContainerError, ContainerStatus};

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatedOp {
    Status,
    Stop,
    Start,
    Restart,
    Logs,
}

#[derive(Debug, Default)]
struct Container {
    status: Option<ContainerStatus>,
    logs: Vec<(i64, String)>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, Container>,
    failures: HashSet<(String, SimulatedOp)>,
    /// Line appended to a container's log whenever it starts.
    ready_line: Option<String>,
    calls: Vec<String>,
}

/// In-memory container engine for simulation mode and tests.
///
/// Clones share state, so a test can keep one handle to inspect and inject
/// failures while the orchestrator drives another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedContainers {
    state: Arc<Mutex<State>>,
}

impl SimulatedContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with every started container logging `line`.
    pub fn with_ready_line(line: impl Into<String>) -> Self {
        let sim = Self::new();
        sim.lock().ready_line = Some(line.into());
        sim
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_container(&self, name: &str, running: bool) {
        let status = if running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Exited
        };
        self.lock()
            .containers
            .entry(name.to_string())
            .or_default()
            .status = Some(status);
    }

    pub fn set_ready_line(&self, line: Option<String>) {
        self.lock().ready_line = line;
    }

    pub fn fail(&self, name: &str, op: SimulatedOp) {
        self.lock().failures.insert((name.to_string(), op));
    }

    pub fn push_log(&self, name: &str, line: &str) {
        self.push_log_at(name, Utc::now().timestamp(), line);
    }

    pub fn push_log_at(&self, name: &str, epoch_secs: i64, line: &str) {
        self.lock()
            .containers
            .entry(name.to_string())
            .or_default()
            .logs
            .push((epoch_secs, line.to_string()));
    }

    pub fn current_status(&self, name: &str) -> ContainerStatus {
        self.lock()
            .containers
            .get(name)
            .and_then(|c| c.status.clone())
            .unwrap_or(ContainerStatus::NotFound)
    }

    /// Mutating calls in the order they were made, e.g. `"stop alpha"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn mutate<F>(&self, name: &str, op: SimulatedOp, verb: &str, f: F) -> Result<(), ContainerError>
    where
        F: FnOnce(&mut Container, Option<&str>),
    {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", verb, name));

        if state.failures.contains(&(name.to_string(), op)) {
            return Err(ContainerError::Engine(format!("simulated {} failure", verb)));
        }

        let ready_line = state.ready_line.clone();
        match state.containers.get_mut(name) {
            Some(container) if container.status.is_some() => {
                f(container, ready_line.as_deref());
                Ok(())
            }
            _ => Err(ContainerError::NotFound(name.to_string())),
        }
    }
}

fn boot(container: &mut Container, ready_line: Option<&str>) {
    container.status = Some(ContainerStatus::Running);
    if let Some(line) = ready_line {
        container
            .logs
            .push((Utc::now().timestamp(), line.to_string()));
    }
}

impl ContainerControl for SimulatedContainers {
    fn status(&self, name: &str) -> Result<ContainerStatus, ContainerError> {
        let state = self.lock();
        if state.failures.contains(&(name.to_string(), SimulatedOp::Status)) {
            return Err(ContainerError::Engine("simulated status failure".to_string()));
        }
        Ok(state
            .containers
            .get(name)
            .and_then(|c| c.status.clone())
            .unwrap_or(ContainerStatus::NotFound))
    }

    fn stop(&self, name: &str, _grace: Duration) -> Result<(), ContainerError> {
        self.mutate(name, SimulatedOp::Stop, "stop", |c, _| {
            c.status = Some(ContainerStatus::Exited);
        })
    }

    fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.mutate(name, SimulatedOp::Start, "start", boot)
    }

    fn restart(&self, name: &str, _grace: Duration) -> Result<(), ContainerError> {
        self.mutate(name, SimulatedOp::Restart, "restart", boot)
    }

    fn tail_logs_since(
        &self,
        name: &str,
        since_epoch_secs: i64,
        max_lines: usize,
    ) -> Result<String, ContainerError> {
        let state = self.lock();
        if state.failures.contains(&(name.to_string(), SimulatedOp::Logs)) {
            return Err(ContainerError::Engine("simulated logs failure".to_string()));
        }

        let container = state
            .containers
            .get(name)
            .filter(|c| c.status.is_some())
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;

        let lines: Vec<&str> = container
            .logs
            .iter()
            .filter(|(ts, _)| *ts >= since_epoch_secs)
            .map(|(_, line)| line.as_str())
            .collect();
        let skip = lines.len().saturating_sub(max_lines);

        Ok(lines[skip..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_and_start() {
        let sim = SimulatedContainers::with_ready_line("Done (1.0s)!");
        sim.add_container("alpha", true);

        sim.stop("alpha", Duration::from_secs(1)).unwrap();
        assert_eq!(sim.current_status("alpha"), ContainerStatus::Exited);
        assert!(!sim.is_running("alpha"));

        sim.start("alpha").unwrap();
        assert!(sim.is_running("alpha"));
        assert!(sim.tail_logs_since("alpha", 0, 10).unwrap().contains("Done"));
        assert_eq!(sim.calls(), vec!["stop alpha", "start alpha"]);
    }

    #[test]
    fn test_unknown_container() {
        let sim = SimulatedContainers::new();
        assert_eq!(sim.status("ghost").unwrap(), ContainerStatus::NotFound);
        assert!(matches!(sim.start("ghost"), Err(ContainerError::NotFound(_))));
    }

    #[test]
    fn test_injected_failure() {
        let sim = SimulatedContainers::new();
        sim.add_container("alpha", true);
        sim.fail("alpha", SimulatedOp::Stop);

        assert!(matches!(
            sim.stop("alpha", Duration::from_secs(1)),
            Err(ContainerError::Engine(_))
        ));
        assert!(sim.is_running("alpha"));
    }

    #[test]
    fn test_tail_respects_window_and_limit() {
        let sim = SimulatedContainers::new();
        sim.add_container("alpha", true);
        sim.push_log_at("alpha", 10, "old");
        sim.push_log_at("alpha", 20, "one");
        sim.push_log_at("alpha", 21, "two");
        sim.push_log_at("alpha", 22, "three");

        assert_eq!(sim.tail_logs_since("alpha", 20, 2).unwrap(), "two\nthree");
        assert_eq!(sim.tail_logs_since("alpha", 15, 10).unwrap(), "one\ntwo\nthree");
    }
}
