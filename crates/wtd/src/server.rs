//! Socket accept loop.
//!
//! One request per accepted connection: read a line, dispatch, write the
//! response line, close. Connection tasks are tracked so shutdown can drain
//! in-flight handlers instead of dropping them.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::rpc::{dispatch, RpcError, RpcRequest, RpcResponse};
use crate::state::DaemonState;

/// Accept connections until `shutdown` flips, then drain in-flight handlers.
pub async fn serve(
    listener: UnixListener,
    state: Arc<DaemonState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        connections.spawn(handle_connection(stream, state));
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                    }
                }
            }
            // Reap finished connection tasks as we go so the set stays small.
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(join_err) = finished {
                    warn!(%join_err, "connection task failed");
                }
            }
        }
    }

    debug!(in_flight = connections.len(), "draining connections");
    while let Some(finished) = connections.join_next().await {
        if let Err(join_err) = finished {
            warn!(%join_err, "connection task failed during drain");
        }
    }
}

async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let response = match reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => match serde_json::from_str::<RpcRequest>(line.trim()) {
            Ok(request) => dispatch(state, request).await,
            Err(err) => RpcResponse::fail(
                None,
                RpcError::bad_request(format!("malformed request: {err}")),
            ),
        },
        Err(err) => {
            debug!(%err, "failed to read request");
            return;
        }
    };

    let mut payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "failed to serialize response");
            return;
        }
    };
    payload.push('\n');
    if let Err(err) = write_half.write_all(payload.as_bytes()).await {
        debug!(%err, "failed to write response");
    }
    let _ = write_half.shutdown().await;
}
