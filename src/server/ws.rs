use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::commands::{compose, terminal};
use crate::models::error::RelayError;
use crate::models::event::{notify, ClientMessage, EventSender, ServerEvent};
use crate::state::AppState;

/// Events waiting to be written to one websocket
const EVENT_QUEUE_DEPTH: usize = 256;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One websocket is one client session. Outgoing events are funnelled through
/// a queue so the relay task and request handlers never touch the socket.
/// Slow handlers run as tasks so later frames (disconnect, close) are still read.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    tracing::info!("Client connected: {}", session_id);

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(EVENT_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut tasks = JoinSet::new();
    while let Some(msg) = receiver.next().await {
        while tasks.try_join_next().is_some() {}
        match msg {
            Ok(Message::Text(text)) => dispatch(&state, &session_id, &text, &events_tx, &mut tasks).await,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("Websocket error for {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    // a connect still in flight must not register after teardown
    tasks.shutdown().await;
    terminal::teardown(&state.registry, &session_id).await;
    writer.abort();
    tracing::info!("Client disconnected: {}", session_id);
}

/// Route one client frame to its handler. `ssh_connect` and `deploy_compose`
/// are spawned onto `tasks`; the rest complete before returning.
pub async fn dispatch(
    state: &AppState,
    session_id: &str,
    text: &str,
    events: &EventSender,
    tasks: &mut JoinSet<()>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let err = RelayError::ValidationError(format!("invalid message format: {}", e));
            notify(events, ServerEvent::error(err.to_string())).await;
            return;
        }
    };

    match message.event.as_str() {
        "ssh_connect" => match message.payload() {
            Ok(request) => {
                let (state, session_id, events) = (state.clone(), session_id.to_string(), events.clone());
                tasks.spawn(async move {
                    terminal::ssh_connect(&state, &session_id, request, &events).await;
                });
            }
            Err(e) => notify(events, ServerEvent::error(e.to_string())).await,
        },
        "ssh_input" => match message.payload() {
            Ok(request) => terminal::ssh_input(&state.registry, session_id, request, events).await,
            Err(e) => notify(events, ServerEvent::error(e.to_string())).await,
        },
        "ssh_disconnect" => terminal::ssh_disconnect(&state.registry, session_id, events).await,
        "deploy_compose" => match message.payload() {
            Ok(request) => {
                let (state, session_id, events) = (state.clone(), session_id.to_string(), events.clone());
                tasks.spawn(async move {
                    compose::deploy_compose(
                        &state.registry,
                        &session_id,
                        request,
                        state.default_base(),
                        &events,
                    )
                    .await;
                });
            }
            Err(e) => {
                notify(
                    events,
                    ServerEvent::ComposeResult {
                        success: false,
                        message: e.to_string(),
                    },
                )
                .await
            }
        },
        other => tracing::debug!("Ignoring unknown event {:?} from {}", other, session_id),
    }
}
