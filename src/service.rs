//! Caller-facing restore and server lifecycle operations.
//!
//! `RestoreService` is what the RPC and web layers talk to. It validates
//! requests against the server catalog, creates jobs in the registry and
//! hands them to the worker pool. Container calls are pushed onto the
//! blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::core::{
    ArchiveExtractor, BackupInfo, CatalogError, ContainerControl, ContainerError, ContainerStatus,
    JobProgress, JobSnapshot, RegistryError, RestoreOrchestrator, RestoreRegistry, RestoreWorkers,
    ServerCatalog, ServerInfo, Subscription, WorkerError,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Workers(#[from] WorkerError),
    #[error("A restore is in progress for server {0}")]
    RestoreInProgress(String),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct RestoreService {
    catalog: ServerCatalog,
    registry: RestoreRegistry,
    containers: Arc<dyn ContainerControl>,
    workers: RestoreWorkers,
    stop_timeout: Duration,
}

impl RestoreService {
    /// Build the service and start its workers. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: &AppConfig,
        containers: Arc<dyn ContainerControl>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        let catalog = ServerCatalog::new(&config.servers_base_path);
        let registry = RestoreRegistry::new();
        let orchestrator = RestoreOrchestrator::new(
            registry.clone(),
            catalog.clone(),
            containers.clone(),
            extractor,
            config.restore_settings()?,
        );
        let workers = RestoreWorkers::spawn(Arc::new(orchestrator), config.workers);

        Ok(Self {
            catalog,
            registry,
            containers,
            workers,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        })
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &RestoreRegistry {
        &self.registry
    }

    pub fn worker_count(&self) -> usize {
        self.workers.size()
    }

    /// Validate and queue a restore of `backup_file` onto `server_name`.
    pub async fn create_restore(
        &self,
        server_name: &str,
        backup_file: &str,
    ) -> Result<JobSnapshot, ServiceError> {
        if !self.catalog.is_valid_server(server_name) {
            return Err(CatalogError::ServerNotFound(server_name.to_string()).into());
        }
        if !self.catalog.backup_exists(server_name, backup_file) {
            return Err(CatalogError::BackupNotFound(backup_file.to_string()).into());
        }

        let job = self.registry.create_job(server_name, backup_file)?;

        if let Err(e) = self.workers.submit(job.id.clone()).await {
            // Nobody will ever run this job; finish it so the server is not
            // left marked as restoring.
            let mut progress = JobProgress::new(self.registry.clone(), job.id.clone());
            if let Err(fail_err) = progress.fail(e.to_string()) {
                error!(job_id = %job.id, error = %fail_err, "Failed to mark unqueued job as failed");
            }
            self.registry.release_active(server_name, &job.id);
            return Err(e.into());
        }

        info!(job_id = %job.id, server = %server_name, backup = %backup_file, "Restore queued");
        Ok(job.snapshot())
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobSnapshot, ServiceError> {
        Ok(self.registry.snapshot(job_id)?)
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.registry.list_jobs()
    }

    pub fn active_restores(&self) -> usize {
        self.registry.active_count()
    }

    pub fn subscribe(&self, job_id: &str) -> Result<Subscription, ServiceError> {
        Ok(self.registry.subscribe(job_id)?)
    }

    pub fn unsubscribe(&self, job_id: &str, token: u64) {
        self.registry.unsubscribe(job_id, token);
    }

    pub fn list_backups(&self, server_name: &str) -> Result<Vec<BackupInfo>, ServiceError> {
        self.catalog.require_server(server_name)?;
        Ok(self.catalog.list_backups(server_name)?)
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerInfo>, ServiceError> {
        let names = self.catalog.discover_servers()?;
        let mut servers = Vec::with_capacity(names.len());
        for name in names {
            servers.push(self.server_info(&name).await?);
        }
        Ok(servers)
    }

    pub async fn server_info(&self, server_name: &str) -> Result<ServerInfo, ServiceError> {
        let status = self.server_status(server_name).await?;
        Ok(self.catalog.server_info(server_name, status)?)
    }

    pub async fn server_status(&self, server_name: &str) -> Result<ContainerStatus, ServiceError> {
        self.catalog.require_server(server_name)?;
        let containers = self.containers.clone();
        let name = server_name.to_string();
        Ok(tokio::task::spawn_blocking(move || containers.status(&name)).await??)
    }

    pub async fn start_server(&self, server_name: &str) -> Result<(), ServiceError> {
        self.ensure_idle(server_name)?;
        let containers = self.containers.clone();
        let name = server_name.to_string();
        tokio::task::spawn_blocking(move || containers.start(&name)).await??;
        info!(server = %server_name, "Server started");
        Ok(())
    }

    pub async fn stop_server(&self, server_name: &str) -> Result<(), ServiceError> {
        self.ensure_idle(server_name)?;
        let containers = self.containers.clone();
        let name = server_name.to_string();
        let grace = self.stop_timeout;
        tokio::task::spawn_blocking(move || containers.stop(&name, grace)).await??;
        info!(server = %server_name, "Server stopped");
        Ok(())
    }

    /// Manual start/stop during a restore would break the promise that the
    /// server ends up in its pre-restore state.
    fn ensure_idle(&self, server_name: &str) -> Result<(), ServiceError> {
        self.catalog.require_server(server_name)?;
        match self.registry.active_job(server_name) {
            Some(job_id)
                if self
                    .registry
                    .get_job(&job_id)
                    .is_ok_and(|job| !job.is_terminal()) =>
            {
                Err(ServiceError::RestoreInProgress(server_name.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }
}
