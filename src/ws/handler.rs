//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use glam::Vec3;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{
    bootstrap, share_location, Participant, ParticipantEvent, ParticipantInput, RemoteBody,
};
use crate::store::{AccountId, RecordId, Replica};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ErrorCode, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Existing session to join; a new one is created when absent
    pub game: Option<String>,
    /// Identity to reuse, so a reconnect binds the same player
    pub account: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let session = match query.game.as_deref().map(str::parse::<RecordId>).transpose() {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Rejected WebSocket upgrade with malformed session id");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let account = query.account.map(AccountId::from_uuid).unwrap_or_default();

    info!(account_id = %account, game_id = ?session, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, account, session, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    account: AccountId,
    session: Option<RecordId>,
    state: AppState,
) {
    let (mut ws_sink, ws_stream) = socket.split();

    let replica = Replica::connect(&state.hub, account);
    let game = match bootstrap(&replica, session) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(account_id = %account, error = %e, "Failed to bootstrap session");
            let msg = ServerMsg::Error {
                code: ErrorCode::SessionFailed,
                message: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &msg).await;
            return;
        }
    };
    let created = game.created();
    let game = game.into_handle();
    let game_id = game.id();

    let welcome = ServerMsg::Welcome {
        account_id: account,
        game_id,
        share: share_location(game_id),
        created,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(account_id = %account, error = %e, "Failed to send welcome");
        return;
    }

    let (participant, handle) =
        Participant::new(game, Box::new(RemoteBody::default()), state.participant_settings());
    let events_rx = handle.subscribe();
    let input_tx = handle.input_tx.clone();
    state.participants.insert(handle);
    let task = tokio::spawn(participant.run());

    run_session(account, ws_sink, ws_stream, input_tx, events_rx).await;

    // Dropping the registry entry closes the last input sender.
    state.participants.remove(&replica.id());
    if let Err(e) = task.await {
        error!(account_id = %account, error = %e, "Participant task failed");
    }

    info!(account_id = %account, game_id = %game_id, "WebSocket connection closed");
}

/// What the reader loop does with one text frame
#[derive(Debug)]
enum Inbound {
    Forward(ParticipantInput),
    Leave,
    Reject(ServerMsg),
}

fn decode_text(account: AccountId, text: &str, rate_limiter: &ConnectionRateLimiter) -> Inbound {
    let rejected = |code, message: &str| {
        Inbound::Reject(ServerMsg::Error {
            code,
            message: message.to_string(),
        })
    };

    match serde_json::from_str::<ClientMsg>(text) {
        Ok(ClientMsg::Pose { x, y, z }) => {
            if !rate_limiter.check_pose() {
                debug!(account_id = %account, "Rate limited pose");
                return rejected(ErrorCode::RateLimited, "too many pose messages");
            }
            Inbound::Forward(ParticipantInput::Pose(Vec3::new(x, y, z)))
        }
        Ok(ClientMsg::Ping { t }) => {
            if !rate_limiter.check_control() {
                warn!(account_id = %account, "Rate limited ping");
                return rejected(ErrorCode::RateLimited, "too many control messages");
            }
            Inbound::Forward(ParticipantInput::Ping { t })
        }
        Ok(ClientMsg::Leave) => Inbound::Leave,
        Err(e) => {
            warn!(account_id = %account, error = %e, "Failed to parse client message");
            rejected(ErrorCode::InvalidMessage, &e.to_string())
        }
    }
}

/// Run the WebSocket session with read/write split
async fn run_session(
    account: AccountId,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<ParticipantInput>,
    mut events_rx: broadcast::Receiver<ParticipantEvent>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(16);

    // Spawn writer task: participant events and replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                event = events_rx.recv() => match event {
                    Ok(event) => ServerMsg::from(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(account_id = %account, lagged_count = n, "Client lagged, skipping frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(account_id = %account, "Event channel closed");
                        break;
                    }
                },
                Some(reply) = reply_rx.recv() => reply,
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(account_id = %account, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> participant loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let input = match decode_text(account, &text, &rate_limiter) {
                    Inbound::Forward(input) => input,
                    Inbound::Leave => {
                        info!(account_id = %account, "Client left");
                        break;
                    }
                    Inbound::Reject(reply) => {
                        // Dropped when the client is not draining replies.
                        let _ = reply_tx.try_send(reply);
                        continue;
                    }
                };

                if input_tx.send(input).await.is_err() {
                    debug!(account_id = %account, "Input channel closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(account_id = %account, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(account_id = %account, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(account_id = %account, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the participant loop
    let _ = input_tx.send(ParticipantInput::Leave).await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
