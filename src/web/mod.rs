//! HTTP and websocket surface of the daemon.
//!
//! - `GET /health` reports liveness as plain JSON
//! - `GET /ws` speaks JSON-RPC 2.0, one request per text frame
//! - `GET /ws/restore/{job_id}` streams progress snapshots for one job

mod websocket;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::rpc::MethodHandler;
use crate::service::RestoreService;

#[derive(Clone)]
pub struct WebState {
    pub handler: Arc<MethodHandler>,
    pub restore: Arc<RestoreService>,
}

pub struct WebServer {
    bind_addr: SocketAddr,
    state: WebState,
    shutdown: CancellationToken,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    active_restores: usize,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let state = WebState {
            restore: ctx.restore.clone(),
            handler: Arc::new(MethodHandler::new(ctx)),
        };

        Self {
            bind_addr,
            state,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Web server listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::rpc_handler))
        .route("/ws/restore/{job_id}", get(websocket::progress_handler))
        .with_state(state)
}

async fn health(State(state): State<WebState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_restores: state.restore.active_restores(),
    })
}
