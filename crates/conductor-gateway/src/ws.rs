use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use conductor_orchestrator::ProgressEvent;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub task_id: Option<Uuid>,
}

/// `GET /ws?task_id=`: progress events as JSON text frames.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    // Subscribe before the upgrade so nothing published in between is missed.
    let events = state.orchestrator.publisher().subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.task_id, events))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    task_filter: Option<Uuid>,
    events: tokio::sync::broadcast::Receiver<ProgressEvent>,
) {
    let conn = state.connections.add(task_filter).await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let welcome = serde_json::json!({
        "type": "connected",
        "connection_id": conn.id,
        "task_id": task_filter,
    });
    if ws_sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        state.connections.remove(conn.id).await;
        return;
    }

    // A late subscriber still learns where the task stands.
    let mut finished = false;
    if let Some(task_id) = task_filter {
        let snapshot = match state.orchestrator.get(task_id).await {
            Ok(task) => {
                finished = task.is_terminal();
                serde_json::json!({ "type": "snapshot", "task": task })
            }
            Err(e) => {
                finished = true;
                serde_json::json!({ "type": "error", "error": e.to_string() })
            }
        };
        let _ = ws_sender
            .send(Message::Text(snapshot.to_string().into()))
            .await;
    }

    if !finished {
        let mut stream = BroadcastStream::new(events);
        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(item) = next else { break };
                    let (frame, terminal) = match item {
                        Ok(event) => {
                            if task_filter.is_some() && event.task_id() != task_filter {
                                continue;
                            }
                            let terminal = task_filter.is_some()
                                && matches!(&event, ProgressEvent::Task { status, .. } if status.is_terminal());
                            match serde_json::to_string(&event) {
                                Ok(json) => (json, terminal),
                                Err(_) => continue,
                            }
                        }
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            debug!(connection_id = %conn.id, skipped, "Progress stream lagged");
                            (serde_json::json!({ "type": "lagged", "skipped": skipped }).to_string(), false)
                        }
                    };
                    if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    let _ = ws_sender.send(Message::Close(None)).await;
    state.connections.remove(conn.id).await;
    info!(connection_id = %conn.id, "WebSocket disconnected");
}
