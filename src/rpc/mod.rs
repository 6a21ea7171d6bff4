//! JSON-RPC 2.0 interface to the restore daemon.
//!
//! The same method set is served over two transports: newline-delimited
//! JSON on a local TCP socket (used by the CLI) and text frames on the
//! `/ws` websocket of the web server.
//!
//! - `protocol`: request/response types and error codes
//! - `transport`: TCP listener and line framing
//! - `methods`: method dispatch onto the restore service
//! - `client`: one-shot client used by the CLI subcommands

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
pub(crate) use transport::dispatch;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::{DaemonStatus, MethodHandler, RestoreStarted};
pub use protocol::{
    CONFLICT, CONTAINER_ERROR, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, NOT_FOUND,
    Request, Response, RpcError,
};

pub struct RpcServer {
    transport: Transport,
    shutdown: CancellationToken,
}

impl RpcServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let handler = Arc::new(MethodHandler::new(ctx));
        Self {
            transport: Transport::new(bind_addr, handler),
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve until `shutdown()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.transport.listen(self.shutdown.clone()).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
