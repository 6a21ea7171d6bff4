use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use srvkeep::config::AppConfig;
use srvkeep::context::AppContext;
use srvkeep::core::{JobSnapshot, RestoreStep, ServerInfo};
use srvkeep::logging::{self, LogConfig};
use srvkeep::rpc::{DaemonStatus, RestoreStarted, RpcClient, RpcServer};
use srvkeep::web::WebServer;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "srvkeep")]
#[command(about = "Game server backup restore daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the restore daemon
    Daemon(ServerArgs),
    /// Show daemon status
    Status,
    /// List managed servers
    Servers,
    /// Restore a server from one of its backups
    Restore(RestoreArgs),
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    servers_base_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[derive(Args)]
struct RestoreArgs {
    server: String,
    backup: String,

    /// Poll until the restore finishes
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::new(Some(args))?,
        _ => AppConfig::new(None::<&ServerArgs>)?,
    };

    match cli.command {
        Commands::Daemon(_) => run_daemon(config).await.context("Failed to run daemon")?,
        Commands::Status => run_status(&config).await?,
        Commands::Servers => run_servers(&config).await?,
        Commands::Restore(args) => run_restore(&config, args).await?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    info!(
        base_path = %config.servers_base_path.display(),
        workers = config.workers,
        simulation = config.simulation,
        "Starting srvkeep daemon"
    );

    let rpc_bind = config.rpc_bind;
    let http_bind = config.http_bind;
    let ctx = AppContext::new(config)?;
    let rpc = RpcServer::new(ctx.clone(), rpc_bind);
    let web = WebServer::new(ctx.clone(), http_bind);

    let servers = async { tokio::try_join!(rpc.start(), web.start()) };
    tokio::pin!(servers);

    tokio::select! {
        result = &mut servers => {
            if let Err(e) = &result {
                error!(error = %e, "Server stopped unexpectedly");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            rpc.shutdown();
            web.shutdown();
            servers.await?;
        }
    }

    ctx.restore.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}

async fn run_status(config: &AppConfig) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    let status: DaemonStatus = client.call("daemon.status", None).await?;

    println!("srvkeep {}", status.version);
    println!("  uptime:          {}s", status.uptime_secs);
    println!("  servers path:    {}", status.servers_base_path);
    println!("  workers:         {}", status.workers);
    println!("  active restores: {}", status.active_restores);
    if status.simulation {
        println!("  (simulation mode)");
    }
    Ok(())
}

async fn run_servers(config: &AppConfig) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    let servers: Vec<ServerInfo> = client.call("servers.list", None).await?;

    if servers.is_empty() {
        println!("No servers found");
        return Ok(());
    }

    for server in servers {
        let backups = if server.has_backups { "yes" } else { "no" };
        println!(
            "{:<20} {:<12} backups: {}",
            server.name,
            server.status.to_string(),
            backups
        );
    }
    Ok(())
}

async fn run_restore(config: &AppConfig, args: RestoreArgs) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    let started: RestoreStarted = client
        .call(
            "restore.create",
            Some(serde_json::json!({ "server": args.server, "backup": args.backup })),
        )
        .await?;

    println!("Restore started: {}", started.job_id);
    if !args.wait {
        return Ok(());
    }

    let mut last_progress = None;
    loop {
        let job: JobSnapshot = client
            .call(
                "restore.status",
                Some(serde_json::json!({ "id": started.job_id })),
            )
            .await?;

        if last_progress != Some(job.progress) {
            println!("[{:>3}%] {:<14} {}", job.progress, job.step, job.message);
            last_progress = Some(job.progress);
        }

        match job.step {
            RestoreStep::Completed => return Ok(()),
            RestoreStep::Failed => bail!(
                "Restore failed: {}",
                job.error.unwrap_or_else(|| job.message.clone())
            ),
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }
}
