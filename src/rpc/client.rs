//! One-shot JSON-RPC client used by the CLI.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError};

pub struct RpcClient {
    addr: SocketAddr,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Daemon closed the connection without a response")]
    Closed,
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Call a method and decode its result. Opens a fresh connection per call.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        let mut request_json = serde_json::to_string(&Request::new(method, params))?;
        request_json.push('\n');
        stream.write_all(request_json.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(ClientError::Closed);
        }

        let response: Response = serde_json::from_str(&response_line)?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}
