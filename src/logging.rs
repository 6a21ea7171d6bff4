//! Logging and tracing initialization for srvkeep.
//!
//! Console output is meant for an operator watching a restore; JSON output
//! carries the enclosing `restore` span (`job_id`, `server`) on every event so
//! a log pipeline can group lines per job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{Level, Span, info_span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Name of the span wrapping one restore workflow.
pub const RESTORE_SPAN: &str = "restore";

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON
    pub json: bool,
    /// Sets the default level to DEBUG
    pub verbose: bool,
}

/// Filter used when `RUST_LOG` is not set. The HTTP stack is kept at `warn`
/// so websocket churn does not drown restore progress.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!(
        "srvkeep={},axum=warn,hyper=warn",
        level.as_str().to_lowercase()
    )
}

/// Install the global tracing subscriber. A second call is reported on
/// stderr and otherwise ignored.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.verbose)));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Span for one restore; every event logged by the workflow nests under it.
pub fn restore_span(job_id: &str, server: &str) -> Span {
    info_span!("restore", job_id = %job_id, server = %server)
}

/// Rate limiter for repetitive messages such as readiness poll heartbeats.
/// Calls that are throttled are counted so the next emitted line can say how
/// many polls it stands for.
pub struct LogThrottle {
    interval_ms: u64,
    /// Last emit time in ms since `start`, or `NEVER`.
    last_emit_ms: AtomicU64,
    suppressed: AtomicU64,
    start: Instant,
}

const NEVER: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_emit_ms: AtomicU64::new(NEVER),
            suppressed: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last emitted line.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_emit_ms.load(Ordering::Relaxed);
        let due = last == NEVER || now_ms.saturating_sub(last) >= self.interval_ms;

        // Losing the race means another thread just emitted.
        if due
            && self
                .last_emit_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return true;
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Number of throttled calls since the last time this was read.
    pub fn take_suppressed(&self) -> u64 {
        self.suppressed.swap(0, Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.last_emit_ms.store(NEVER, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
    }
}
