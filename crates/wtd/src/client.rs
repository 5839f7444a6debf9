//! Socket client used by the CLI front end and the integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::rpc::{RpcRequest, RpcResponse};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("socket i/o failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("daemon sent an unparseable response: {source}")]
    Protocol {
        #[from]
        source: serde_json::Error,
    },
    #[error("daemon closed the connection without responding")]
    ClosedWithoutResponse,
    #[error("daemon error ({kind}): {message}")]
    Rpc { kind: String, message: String },
}

pub struct DaemonClient {
    socket_path: PathBuf,
    next_id: AtomicU64,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One request, one response, one connection.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            method: method.to_string(),
            params,
            id: Some(id),
        };

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await?;
        write_half.shutdown().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::ClosedWithoutResponse);
        }
        let response: RpcResponse = serde_json::from_str(line.trim())?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                kind: error.kind,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// True when a daemon answers `ping` on the socket.
    pub async fn is_alive(&self) -> bool {
        matches!(self.call("ping", Value::Null).await, Ok(_))
    }
}
