//! TCP transport for the RPC server.
//!
//! One JSON request per line, one JSON response per line. Each connection
//! runs in its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::methods::MethodHandler;
use super::protocol::{Request, Response};

pub struct Transport {
    bind_addr: SocketAddr,
    handler: Arc<MethodHandler>,
}

impl Transport {
    pub fn new(bind_addr: SocketAddr, handler: Arc<MethodHandler>) -> Self {
        Self { bind_addr, handler }
    }

    pub async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "RPC server listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "RPC client connected");
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                                    debug!(peer = %peer_addr, error = %e, "RPC connection error");
                                }
                                debug!(peer = %peer_addr, "RPC client disconnected");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept RPC connection");
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Decode one request frame and run it. Returns `None` for notifications.
pub(crate) async fn dispatch(handler: &MethodHandler, frame: &str) -> Option<Response> {
    match serde_json::from_str::<Request>(frame) {
        Ok(request) => {
            if let Err(msg) = request.validate() {
                warn!(error = msg, "Invalid RPC request");
                let id = request.id.clone().unwrap_or(serde_json::Value::Null);
                Some(Response::invalid_request(id))
            } else if request.is_notification() {
                debug!(method = %request.method, "RPC notification received");
                handler.handle(request).await;
                None
            } else {
                Some(handler.handle(request).await)
            }
        }
        Err(e) => {
            warn!(error = %e, "RPC parse error");
            Some(Response::parse_error())
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<MethodHandler>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Some(response) = dispatch(&handler, trimmed).await else {
            continue;
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    debug!(peer = %peer_addr, "RPC stream closed");
    Ok(())
}
