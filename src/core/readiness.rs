//! Log-based readiness detection.

use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use super::container::{ContainerControl, ContainerError};
use crate::logging::LogThrottle;

/// Outcome of waiting for a container's readiness marker. None of these fail
/// a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut(Duration),
    Unavailable(String),
}

/// Polls a container's recent logs until a marker pattern appears.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub pattern: Regex,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub tail_lines: usize,
}

impl ReadinessProbe {
    /// Block until the marker shows up in logs emitted since `since_epoch_secs`,
    /// or the timeout passes. Sleeps between polls.
    pub fn wait(
        &self,
        containers: &dyn ContainerControl,
        name: &str,
        since_epoch_secs: i64,
    ) -> Readiness {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let heartbeat = LogThrottle::new(Duration::from_secs(30));

        loop {
            match containers.tail_logs_since(name, since_epoch_secs, self.tail_lines) {
                Ok(logs) if self.pattern.is_match(&logs) => {
                    debug!(
                        container = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Readiness marker found"
                    );
                    return Readiness::Ready;
                }
                Ok(_) => {
                    if heartbeat.should_log() {
                        debug!(
                            container = %name,
                            polls = heartbeat.take_suppressed() + 1,
                            elapsed_secs = started.elapsed().as_secs(),
                            "Waiting for readiness marker"
                        );
                    }
                }
                Err(ContainerError::NotFound(_)) => {
                    return Readiness::Unavailable(format!("Container not found: {}", name));
                }
                Err(e) => {
                    if heartbeat.should_log() {
                        warn!(
                            container = %name,
                            error = %e,
                            polls = heartbeat.take_suppressed() + 1,
                            "Failed to read container logs"
                        );
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut(self.timeout);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedContainers;

    fn probe(timeout_ms: u64) -> ReadinessProbe {
        ReadinessProbe {
            pattern: Regex::new(r"Done \([0-9.]+s\)!").unwrap(),
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(10),
            tail_lines: 100,
        }
    }

    #[test]
    fn test_ready_when_marker_present() {
        let containers = SimulatedContainers::new();
        containers.add_container("alpha", true);
        containers.push_log("alpha", "[Server thread/INFO]: Done (3.2s)! For help, type \"help\"");

        let result = probe(1000).wait(&containers, "alpha", 0);
        assert_eq!(result, Readiness::Ready);
    }

    #[test]
    fn test_times_out_without_marker() {
        let containers = SimulatedContainers::new();
        containers.add_container("alpha", true);
        containers.push_log("alpha", "Preparing spawn area: 42%");

        let result = probe(50).wait(&containers, "alpha", 0);
        assert_eq!(result, Readiness::TimedOut(Duration::from_millis(50)));
    }

    #[test]
    fn test_ignores_lines_before_window() {
        let containers = SimulatedContainers::new();
        containers.add_container("alpha", true);
        containers.push_log_at("alpha", 100, "Done (1.0s)! For help");

        let result = probe(50).wait(&containers, "alpha", 200);
        assert!(matches!(result, Readiness::TimedOut(_)));
    }

    #[test]
    fn test_missing_container_is_unavailable() {
        let containers = SimulatedContainers::new();
        let result = probe(1000).wait(&containers, "ghost", 0);
        assert!(matches!(result, Readiness::Unavailable(_)));
    }
}
