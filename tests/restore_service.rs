use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use srvkeep::adapters::SimulatedContainers;
use srvkeep::config::AppConfig;
use srvkeep::context::AppContext;
use srvkeep::core::{CatalogError, JobSnapshot, RestoreStep, TarGzExtractor};
use srvkeep::rpc::MethodHandler;
use srvkeep::service::ServiceError;
use srvkeep::web::{self, WebState};
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const BACKUP: &str = "world-20240301-083000.tar.gz";

fn write_backup(path: &Path) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(3);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "world/level.dat", &b"new"[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

fn context() -> (TempDir, SimulatedContainers, AppContext) {
    let temp = tempdir().unwrap();
    let server = temp.path().join("alpha");
    fs::create_dir_all(server.join("data")).unwrap();
    fs::create_dir_all(server.join("backups")).unwrap();
    write_backup(&server.join("backups").join(BACKUP));

    let sim = SimulatedContainers::with_ready_line("Done (0.5s)! For help, type \"help\"");
    sim.add_container("alpha", true);

    let config = AppConfig {
        servers_base_path: temp.path().to_path_buf(),
        workers: 1,
        stop_timeout_secs: 1,
        ready_timeout_secs: 5,
        ready_poll_interval_secs: 1,
        ..AppConfig::default()
    };
    let ctx = AppContext::with_components(
        config,
        Arc::new(sim.clone()),
        Arc::new(TarGzExtractor::new()),
    )
    .unwrap();

    (temp, sim, ctx)
}

async fn wait_for_terminal(ctx: &AppContext, job_id: &str) -> JobSnapshot {
    for _ in 0..200 {
        let job = ctx.restore.job_status(job_id).unwrap();
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("restore {job_id} did not finish");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_restore_runs_to_completion() {
    let (temp, _sim, ctx) = context();

    let job = ctx.restore.create_restore("alpha", BACKUP).await.unwrap();
    assert_eq!(job.server_name, "alpha");

    let done = wait_for_terminal(&ctx, &job.job_id).await;
    assert_eq!(done.step, RestoreStep::Completed);
    assert_eq!(
        fs::read(temp.path().join("alpha/data/world/level.dat")).unwrap(),
        b"new"
    );
    assert_eq!(ctx.restore.active_restores(), 0);

    ctx.restore.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_backup_is_rejected_before_queueing() {
    let (_temp, _sim, ctx) = context();

    let err = ctx
        .restore
        .create_restore("alpha", "world-19990101-000000.tgz")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Catalog(CatalogError::BackupNotFound(_))
    ));
    assert!(ctx.restore.list_jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn path_like_backup_names_are_rejected() {
    let (_temp, _sim, ctx) = context();

    let err = ctx
        .restore
        .create_restore("alpha", "../alpha/backups/world-20240301-083000.tar.gz")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Catalog(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_servers_with_live_status() {
    let (_temp, sim, ctx) = context();
    sim.add_container("alpha", false);

    let servers = ctx.restore.list_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "alpha");
    assert_eq!(servers[0].status.to_string(), "exited");
    assert!(servers[0].has_backups);

    let backups = ctx.restore.list_backups("alpha").unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].filename, BACKUP);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_endpoint_reports_ok() {
    let (_temp, _sim, ctx) = context();
    let state = WebState {
        restore: ctx.restore.clone(),
        handler: Arc::new(MethodHandler::new(ctx.clone())),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, web::router(state)).await.unwrap();
    });

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
    assert!(response.contains(r#""active_restores":0"#));
}
