//! RPC method handlers.
//!
//! Dispatches JSON-RPC method calls to the restore service.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::context::AppContext;
use crate::core::{CatalogError, JobSnapshot, RegistryError};
use crate::service::ServiceError;

use super::protocol::{CONTAINER_ERROR, Request, Response};

/// Handles RPC method dispatch and execution.
pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

#[derive(Deserialize)]
struct ServerParams {
    server: String,
}

#[derive(Deserialize)]
struct JobParams {
    id: String,
}

#[derive(Deserialize)]
struct RestoreParams {
    server: String,
    backup: String,
}

/// Result of `restore.create`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreStarted {
    pub job_id: String,
    pub status: String,
}

/// Result of `daemon.status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub active_restores: usize,
    pub workers: usize,
    pub servers_base_path: String,
    pub simulation: bool,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    /// Handle an RPC request and return a response.
    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id),
            "servers.list" => self.servers_list(id).await,
            "servers.get" => self.servers_get(id, params).await,
            "servers.status" => self.servers_status(id, params).await,
            "servers.start" => self.servers_start(id, params).await,
            "servers.stop" => self.servers_stop(id, params).await,
            "backups.list" => self.backups_list(id, params),
            "restore.create" => self.restore_create(id, params).await,
            "restore.status" => self.restore_status(id, params),
            "restore.list" => self.restore_list(id),
            _ => Response::method_not_found(id, &request.method),
        }
    }

    fn daemon_status(&self, id: Value) -> Response {
        let restore = &self.ctx.restore;
        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                active_restores: restore.active_restores(),
                workers: restore.worker_count(),
                servers_base_path: self.ctx.config.servers_base_path.display().to_string(),
                simulation: self.ctx.config.simulation,
            },
        )
    }

    async fn servers_list(&self, id: Value) -> Response {
        match self.ctx.restore.list_servers().await {
            Ok(servers) => Response::success(id, servers),
            Err(e) => error_response(id, e),
        }
    }

    async fn servers_get(&self, id: Value, params: Value) -> Response {
        let params: ServerParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.server_info(&params.server).await {
            Ok(info) => Response::success(id, info),
            Err(e) => error_response(id, e),
        }
    }

    async fn servers_status(&self, id: Value, params: Value) -> Response {
        #[derive(Serialize)]
        struct ServerStatus {
            name: String,
            status: String,
            exists: bool,
        }

        let params: ServerParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.server_status(&params.server).await {
            Ok(status) => Response::success(
                id,
                ServerStatus {
                    name: params.server,
                    status: status.to_string(),
                    exists: status.exists(),
                },
            ),
            Err(e) => error_response(id, e),
        }
    }

    async fn servers_start(&self, id: Value, params: Value) -> Response {
        let params: ServerParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.start_server(&params.server).await {
            Ok(()) => Response::success(id, ok_message("Container started")),
            Err(e) => error_response(id, e),
        }
    }

    async fn servers_stop(&self, id: Value, params: Value) -> Response {
        let params: ServerParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.stop_server(&params.server).await {
            Ok(()) => Response::success(id, ok_message("Container stopped")),
            Err(e) => error_response(id, e),
        }
    }

    fn backups_list(&self, id: Value, params: Value) -> Response {
        let params: ServerParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.list_backups(&params.server) {
            Ok(backups) => Response::success(id, backups),
            Err(e) => error_response(id, e),
        }
    }

    async fn restore_create(&self, id: Value, params: Value) -> Response {
        let params: RestoreParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self
            .ctx
            .restore
            .create_restore(&params.server, &params.backup)
            .await
        {
            Ok(job) => Response::success(
                id,
                RestoreStarted {
                    job_id: job.job_id,
                    status: "started".to_string(),
                },
            ),
            Err(e) => error_response(id, e),
        }
    }

    fn restore_status(&self, id: Value, params: Value) -> Response {
        let params: JobParams = match parse_params(params) {
            Ok(p) => p,
            Err(msg) => return Response::invalid_params(id, msg),
        };

        match self.ctx.restore.job_status(&params.id) {
            Ok(job) => Response::success(id, job),
            Err(e) => error_response(id, e),
        }
    }

    fn restore_list(&self, id: Value) -> Response {
        let jobs: Vec<JobSnapshot> = self.ctx.restore.list_jobs();
        Response::success(id, jobs)
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| e.to_string())
}

fn ok_message(message: &str) -> Value {
    serde_json::json!({ "status": "ok", "message": message })
}

/// Map service errors onto JSON-RPC error codes.
fn error_response(id: Value, err: ServiceError) -> Response {
    let message = err.to_string();
    match err {
        ServiceError::Catalog(CatalogError::ServerNotFound(_))
        | ServiceError::Catalog(CatalogError::BackupNotFound(_))
        | ServiceError::Registry(RegistryError::NotFound(_)) => Response::not_found(id, message),
        ServiceError::Registry(RegistryError::AlreadyActive { .. })
        | ServiceError::RestoreInProgress(_) => Response::conflict(id, message),
        ServiceError::Container(_) => Response::error(id, CONTAINER_ERROR, message),
        _ => Response::internal_error(id, message),
    }
}
