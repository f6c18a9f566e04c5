//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, MatchInput, PlayerInput};
use crate::http::AppError;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, MatchSnapshot, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Join a specific match instead of any open one
    #[serde(default)]
    pub match_id: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let handle = match query.match_id {
        Some(id) => state
            .match_registry
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("match {id}")))?,
        None => state
            .match_registry
            .find_or_spawn(state.config.match_settings()),
    };

    let user_id = Uuid::new_v4();
    info!(user_id = %user_id, match_id = %handle.id, "WebSocket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, handle)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, handle: MatchHandle) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before anything can be sent to the match
    let events_rx = handle.events_tx.subscribe();

    let welcome = ServerMsg::Welcome {
        user_id,
        match_id: handle.id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    run_session(user_id, &handle, ws_sink, ws_stream, events_rx).await;

    info!(user_id = %user_id, match_id = %handle.id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    user_id: Uuid,
    handle: &MatchHandle,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    events_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(32);

    let writer_handle = tokio::spawn(write_loop(
        user_id,
        ws_sink,
        events_rx,
        direct_rx,
        handle.snapshot_rx.clone(),
    ));

    // Reader loop: WebSocket -> match task
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        let _ = direct_tx
                            .send(ServerMsg::Error {
                                code: "bad_message".to_string(),
                                message: e.to_string(),
                            })
                            .await;
                        continue;
                    }
                };

                let allowed = match client_msg {
                    ClientMsg::Axes { .. } => rate_limiter.check_axes(),
                    _ => rate_limiter.check_action(),
                };
                if !allowed {
                    debug!(user_id = %user_id, "Rate limited client message");
                    continue;
                }

                match client_msg {
                    ClientMsg::Ping { t } => {
                        let _ = direct_tx.send(ServerMsg::Pong { t }).await;
                    }
                    ClientMsg::JoinMatch { .. } if handle.player_count() >= handle.max_players => {
                        let _ = direct_tx
                            .send(ServerMsg::Error {
                                code: "match_full".to_string(),
                                message: "Match is full".to_string(),
                            })
                            .await;
                    }
                    msg => {
                        if forward(handle, user_id, msg).await.is_err() {
                            debug!(user_id = %user_id, "Match input channel closed");
                            break;
                        }
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the match task
    let _ = forward(handle, user_id, ClientMsg::LeaveMatch).await;

    writer_handle.abort();
}

/// Fan match events and direct replies out to the socket
async fn write_loop(
    user_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut events_rx: broadcast::Receiver<ServerMsg>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
    snapshot_rx: watch::Receiver<MatchSnapshot>,
) {
    loop {
        let msg = tokio::select! {
            event = events_rx.recv() => match event {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(user_id = %user_id, lagged_count = n, "Client lagged, sending resync");
                    let snapshot = snapshot_rx.borrow().clone();
                    ServerMsg::Resync { snapshot }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %user_id, "Match event channel closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => msg,
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

async fn forward(
    handle: &MatchHandle,
    user_id: Uuid,
    msg: ClientMsg,
) -> Result<(), mpsc::error::SendError<MatchInput>> {
    handle
        .input_tx
        .send(MatchInput::Player(PlayerInput {
            user_id,
            msg,
            received_at: unix_millis(),
        }))
        .await
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
