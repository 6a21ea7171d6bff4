//! Websocket handlers.

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::debug;

use super::WebState;
use crate::core::JobSnapshot;
use crate::rpc::{self, Response};

/// Close code sent when the requested job does not exist.
pub const CLOSE_UNKNOWN_JOB: u16 = 4004;

pub async fn rpc_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_rpc_socket(socket, state))
}

pub async fn progress_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<WebState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress_socket(socket, state, job_id))
}

async fn handle_rpc_socket(mut socket: WebSocket, state: WebState) {
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket receive error");
                break;
            }
        };

        let Some(response) = rpc::dispatch(&state.handler, text.as_str()).await else {
            continue;
        };

        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                let fallback = Response::internal_error(serde_json::Value::Null, e.to_string());
                match serde_json::to_string(&fallback) {
                    Ok(payload) => payload,
                    Err(_) => break,
                }
            }
        };

        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }

    debug!("RPC websocket closed");
}

async fn handle_progress_socket(mut socket: WebSocket, state: WebState, job_id: String) {
    let mut subscription = match state.restore.subscribe(&job_id) {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!(job_id = %job_id, error = %e, "Progress stream for unknown job");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNKNOWN_JOB,
                    reason: "Job not found".into(),
                })))
                .await;
            return;
        }
    };

    let mut finished = subscription.current.step.is_terminal();
    if send_snapshot(&mut socket, &subscription.current).await.is_err() {
        state.restore.unsubscribe(&job_id, subscription.token);
        return;
    }

    while !finished {
        tokio::select! {
            update = subscription.updates.recv() => {
                let Some(snapshot) = update else {
                    // Sink dropped by the registry: the job finished or this
                    // subscriber was replaced.
                    break;
                };
                finished = snapshot.step.is_terminal();
                if send_snapshot(&mut socket, &snapshot).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.restore.unsubscribe(&job_id, subscription.token);
    let _ = socket.send(Message::Close(None)).await;
    debug!(job_id = %job_id, "Progress websocket closed");
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &JobSnapshot) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(snapshot).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
