use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{PlayerInboundMessage, PlayerOutboundMessage},
    services::sse_events,
    state::SharedState,
    sync::reconciler::PlayerView,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while serving an identified player connection.
#[derive(Debug, Error)]
enum SessionError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Handle the full lifecycle for an individual player WebSocket connection.
///
/// The first frame must identify the player for this room; the connection then
/// owns one player context until it closes.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Ok(PlayerInboundMessage::Identification {
        player_name,
        game_id,
    }) = PlayerInboundMessage::from_json_str(&initial_message)
    else {
        warn!("first message was not a valid identification");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let player_name = player_name.trim().to_string();
    if let Some(reason) = refusal(&state, &player_name, &game_id) {
        warn!(player = %player_name, game_id = %game_id, reason, "identification refused");
        reject(&outbound_tx, reason);
        finalize(writer_task, outbound_tx).await;
        return;
    }

    let handle = match state.attach_player(&player_name) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(player = %player_name, error = %err, "player attach refused");
            reject(&outbound_tx, &err.to_string());
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    info!(player = %player_name, "player connected");
    sse_events::broadcast_attachment(state.admin_sse(), &player_name, true);

    let forward_task = spawn_view_forwarder(state.clone(), handle.subscribe(), outbound_tx.clone());

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match PlayerInboundMessage::from_json_str(&text) {
                Ok(PlayerInboundMessage::Answer { option }) => {
                    if let Err(err) = handle.select_answer(option).await {
                        debug!(player = %player_name, error = %err, "answer refused");
                        let message = PlayerOutboundMessage::Error {
                            message: err.to_string(),
                        };
                        if send_message_to_websocket(&outbound_tx, &message).is_err() {
                            break;
                        }
                    }
                }
                Ok(PlayerInboundMessage::RequestState { force }) => {
                    if let Err(err) = handle.request_state(force).await {
                        warn!(player = %player_name, error = %err, "state request failed");
                    }
                }
                Ok(PlayerInboundMessage::Identification { .. }) => {
                    warn!(player = %player_name, "ignoring duplicate identification message");
                }
                Ok(PlayerInboundMessage::Unknown) => {
                    debug!(player = %player_name, "ignoring unknown message type");
                }
                Err(err) => {
                    warn!(player = %player_name, error = %err, "failed to parse player message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(player = %player_name, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(player = %player_name, error = %err, "websocket error");
                break;
            }
        }
    }

    forward_task.abort();
    let view = state.detach_player(handle).await;
    sse_events::broadcast_attachment(state.admin_sse(), &player_name, false);
    info!(player = %player_name, score = view.score, "player disconnected");

    finalize(writer_task, outbound_tx).await;
}

fn refusal(state: &SharedState, player_name: &str, game_id: &str) -> Option<&'static str> {
    if player_name.is_empty() {
        Some("player name must not be empty")
    } else if !game_id.trim().eq_ignore_ascii_case(state.game_id()) {
        Some("unknown room code")
    } else {
        None
    }
}

fn reject(tx: &mpsc::UnboundedSender<Message>, message: &str) {
    let _ = send_message_to_websocket(
        tx,
        &PlayerOutboundMessage::Error {
            message: message.to_string(),
        },
    );
    let _ = tx.send(Message::Close(None));
}

/// Push every view change to the socket and mirror score changes to admins.
fn spawn_view_forwarder(
    state: SharedState,
    mut view: watch::Receiver<PlayerView>,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_score = None;
        loop {
            let current = view.borrow_and_update().clone();
            if last_score != Some(current.score) {
                if last_score.is_some() {
                    sse_events::broadcast_score(state.admin_sse(), &current.player_name, current.score);
                }
                last_score = Some(current.score);
            }
            if send_message_to_websocket(&tx, &PlayerOutboundMessage::View(current)).is_err() {
                break;
            }
            if view.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is
/// reported as [`SessionError::ConnectionClosed`].
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), SessionError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| SessionError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_writer_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        drop(rx);
        let result = send_message_to_websocket(
            &tx,
            &PlayerOutboundMessage::Error {
                message: "late".into(),
            },
        );
        assert!(matches!(result, Err(SessionError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn reject_sends_error_then_close() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        reject(&tx, "unknown room code");

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        assert!(text.as_str().contains("unknown room code"));
        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
    }
}
