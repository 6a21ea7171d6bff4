use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use srvkeep::adapters::{SimulatedContainers, SimulatedOp};
use srvkeep::core::{
    ContainerStatus, JobSnapshot, ReadinessProbe, RegistryError, RestoreOrchestrator,
    RestoreRegistry, RestoreSettings, RestoreStep, ServerCatalog, TarGzExtractor,
};
use tempfile::{TempDir, tempdir};

const BACKUP: &str = "world-20240101-120000.tgz";
const READY_LINE: &str = "Done (3.2s)! For help, type \"help\"";

struct Fixture {
    _temp: TempDir,
    base: std::path::PathBuf,
    sim: SimulatedContainers,
    registry: RestoreRegistry,
    orchestrator: RestoreOrchestrator,
}

fn write_backup(path: &Path, files: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn settings(ready_timeout: Duration) -> RestoreSettings {
    RestoreSettings {
        stop_timeout: Duration::from_secs(1),
        restart_timeout: Duration::from_secs(1),
        backup_container_suffix: "-backup".to_string(),
        log_lookback: Duration::from_secs(5),
        readiness: ReadinessProbe {
            pattern: Regex::new(r"Done \([0-9.]+s\)! For help").unwrap(),
            timeout: ready_timeout,
            poll_interval: Duration::from_millis(20),
            tail_lines: 100,
        },
    }
}

fn fixture(server_running: bool, backup_running: bool) -> Fixture {
    fixture_with(server_running, backup_running, Duration::from_secs(2))
}

fn fixture_with(server_running: bool, backup_running: bool, ready_timeout: Duration) -> Fixture {
    let temp = tempdir().unwrap();
    let base = temp.path().to_path_buf();
    let server = base.join("alpha");
    fs::create_dir_all(server.join("data/world")).unwrap();
    fs::create_dir_all(server.join("backups")).unwrap();
    fs::write(server.join("data/world/stale.dat"), b"stale").unwrap();
    write_backup(
        &server.join("backups").join(BACKUP),
        &[
            ("world/level.dat", b"restored"),
            ("server.properties", b"motd=hello"),
        ],
    );

    let sim = SimulatedContainers::with_ready_line(READY_LINE);
    sim.add_container("alpha", server_running);
    sim.add_container("alpha-backup", backup_running);

    let registry = RestoreRegistry::new();
    let orchestrator = RestoreOrchestrator::new(
        registry.clone(),
        ServerCatalog::new(&base),
        Arc::new(sim.clone()),
        Arc::new(TarGzExtractor::new()),
        settings(ready_timeout),
    );

    Fixture {
        _temp: temp,
        base,
        sim,
        registry,
        orchestrator,
    }
}

impl Fixture {
    fn run(&self) -> JobSnapshot {
        let job = self.registry.create_job("alpha", BACKUP).unwrap();
        self.orchestrator.execute(&job.id).unwrap()
    }

    fn data(&self) -> std::path::PathBuf {
        self.base.join("alpha/data")
    }
}

#[test]
fn restores_running_server_and_restarts_it() {
    let fx = fixture(true, true);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.message, "Restore completed successfully!");
    assert!(snapshot.error.is_none());
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.server_container_was_running);
    assert!(snapshot.backup_container_was_running);

    assert_eq!(
        fs::read(fx.data().join("world/level.dat")).unwrap(),
        b"restored"
    );
    assert!(!fx.data().join("world/stale.dat").exists());

    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Running);
    assert_eq!(
        fx.sim.calls(),
        vec!["stop alpha", "start alpha", "restart alpha-backup"]
    );
    assert_eq!(fx.registry.active_job("alpha"), None);
}

#[test]
fn stopped_server_stays_stopped() {
    let fx = fixture(false, false);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Completed);
    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Exited);
    assert!(fx.sim.calls().is_empty());
    assert!(fx.data().join("server.properties").exists());

    assert!(!snapshot.server_container_was_running);
    assert!(!snapshot.backup_container_was_running);
}

#[test]
fn stop_failure_fails_job_and_keeps_data() {
    let fx = fixture(true, false);
    fx.sim.fail("alpha", SimulatedOp::Stop);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Failed);
    assert!(snapshot.progress <= 10);
    assert!(snapshot.error.as_deref().unwrap().contains("simulated stop failure"));
    assert!(snapshot.message.starts_with("Error: "));
    assert!(fx.data().join("world/stale.dat").exists());
    assert_eq!(fx.registry.active_job("alpha"), None);
}

#[test]
fn start_failure_fails_job_after_data_replaced() {
    let fx = fixture(true, true);
    fx.sim.fail("alpha", SimulatedOp::Start);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Failed);
    assert!(
        snapshot
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to start container")
    );
    assert!(snapshot.progress >= 87 && snapshot.progress < 95);
    assert_eq!(
        fs::read(fx.data().join("world/level.dat")).unwrap(),
        b"restored"
    );
    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Exited);
    // The backup container is not touched once the primary fails to start.
    assert!(!fx.sim.calls().contains(&"restart alpha-backup".to_string()));
    assert_eq!(fx.registry.active_job("alpha"), None);
}

#[test]
fn status_probe_failure_fails_job_before_touching_anything() {
    let fx = fixture(true, false);
    fx.sim.fail("alpha", SimulatedOp::Status);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Failed);
    assert!(
        snapshot
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to check container status")
    );
    assert_eq!(snapshot.progress, 5);
    assert!(fx.sim.calls().is_empty());
    assert!(fx.data().join("world/stale.dat").exists());
    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Running);
    assert_eq!(fx.registry.active_job("alpha"), None);
}

#[test]
fn corrupt_backup_fails_during_extraction() {
    let fx = fixture(true, false);
    fs::write(fx.base.join("alpha/backups").join(BACKUP), b"not a gzip stream").unwrap();

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Failed);
    assert!(snapshot.progress >= 45 && snapshot.progress < 85);
    // The server is not brought back automatically after a mid-restore failure.
    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Exited);
    assert_eq!(fx.registry.active_job("alpha"), None);
}

#[test]
fn readiness_timeout_still_completes() {
    let fx = fixture_with(true, false, Duration::from_millis(100));
    fx.sim.set_ready_line(None);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Completed);
    assert_eq!(snapshot.progress, 100);
    assert!(snapshot.message.contains("with warnings"));
    assert!(snapshot.message.contains("timed out"));
}

#[test]
fn backup_container_restart_failure_is_a_warning() {
    let fx = fixture(true, true);
    fx.sim.fail("alpha-backup", SimulatedOp::Restart);

    let snapshot = fx.run();

    assert_eq!(snapshot.step, RestoreStep::Completed);
    assert!(snapshot.message.contains("alpha-backup"));
    assert!(snapshot.error.is_none());
    assert_eq!(fx.sim.current_status("alpha"), ContainerStatus::Running);
}

#[test]
fn subscriber_sees_non_decreasing_progress() {
    let fx = fixture(true, true);
    let job = fx.registry.create_job("alpha", BACKUP).unwrap();
    let mut sub = fx.registry.subscribe(&job.id).unwrap();
    assert_eq!(sub.current.step, RestoreStep::Pending);

    fx.orchestrator.execute(&job.id).unwrap();

    let mut seen = Vec::new();
    while let Ok(snapshot) = sub.updates.try_recv() {
        seen.push(snapshot);
    }

    assert!(seen.len() > 5);
    assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert!(seen.windows(2).all(|w| w[0].step <= w[1].step));
    assert_eq!(seen.last().unwrap().step, RestoreStep::Completed);
    assert!(seen.iter().any(|s| s.step == RestoreStep::WaitingReady));
    assert!(!fx.registry.has_sink(&job.id));
}

#[test]
fn second_restore_conflicts_until_first_finishes() {
    let fx = fixture(false, false);
    let first = fx.registry.create_job("alpha", BACKUP).unwrap();

    let conflict = fx.registry.create_job("alpha", BACKUP);
    assert!(matches!(
        conflict,
        Err(RegistryError::AlreadyActive { ref job_id, .. }) if *job_id == first.id
    ));

    fx.orchestrator.execute(&first.id).unwrap();

    let second = fx.registry.create_job("alpha", BACKUP).unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(fx.registry.list_jobs().len(), 2);
}

#[test]
fn finished_job_cannot_be_executed_again() {
    let fx = fixture(false, false);
    let snapshot = fx.run();

    let again = fx.orchestrator.execute(&snapshot.job_id);
    assert!(again.is_err());
    assert_eq!(
        fx.registry.snapshot(&snapshot.job_id).unwrap().step,
        RestoreStep::Completed
    );
}
