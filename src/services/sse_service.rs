use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    dto::sse::{AdminHandshake, ServerEvent},
    error::ServiceError,
    services::sse_events,
    state::{SharedState, SseHub},
    sync::transport::{Envelope, LocalEventBus},
};

/// Subscribe to the shared public SSE stream.
pub fn subscribe_public(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.public_sse().subscribe()
}

/// Subscribe to the admin-only SSE stream.
pub async fn subscribe_admin(
    state: &SharedState,
) -> Result<(broadcast::Receiver<ServerEvent>, String), ServiceError> {
    let token = state.admin_channel().claim().await.ok_or_else(|| {
        ServiceError::Unauthorized("Another admin SSE stream is already active".into())
    })?;
    let receiver = state.admin_sse().subscribe();
    Ok((receiver, token))
}

/// Forward every snapshot seen on the local event bus to the public SSE hub.
pub fn spawn_public_mirror(bus: &LocalEventBus, hub: SseHub) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            match envelope {
                Envelope::State(state) if state.target_player.is_none() => {
                    sse_events::broadcast_state(&hub, &state);
                }
                _ => {}
            }
        }
    })
}

/// Re-send the stored snapshot so a fresh public subscriber has something to render.
pub fn replay_current_state(state: &SharedState) {
    if let Some(current) = state.medium().ledger().game_state() {
        sse_events::broadcast_state(state.public_sse(), &current);
    }
}

/// Identifies the target SSE stream so we can perform stream-specific
/// bookkeeping when the connection is torn down.
#[derive(Clone)]
pub enum StreamKind {
    Public,
    /// Carries a clone of the shared application state so teardown logic can
    /// reset the admin token after the spawned task completes. Cloning
    /// `SharedState` is cheap because it is just bumping the inner `Arc`.
    Admin(SharedState),
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Public => tracing::info!("Public SSE stream disconnected"),
            StreamKind::Admin(state) => {
                // Own the necessary state inside the spawned task so we can
                // clean up even if the request context has already dropped.
                state.admin_channel().release().await;
                tracing::info!("Admin SSE stream disconnected")
            }
        }
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Broadcast a token refresh event to the admin stream.
pub fn broadcast_admin_handshake(hub: &SseHub, token: &str) {
    if let Ok(event) = ServerEvent::json(
        Some("admin_token".to_string()),
        &AdminHandshake {
            token: token.to_string(),
        },
    ) {
        hub.broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        sync::{
            clock::SystemClock,
            snapshot::{GameState, PhaseState},
            store::MemoryTruthStore,
        },
    };

    fn state() -> SharedState {
        crate::state::AppState::new(
            AppConfig::default(),
            Arc::new(MemoryTruthStore::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn only_one_admin_stream_holds_the_token() {
        let state = state();

        let (_receiver, token) = subscribe_admin(&state).await.unwrap();
        assert_eq!(
            state.admin_channel().check(&token).await,
            crate::state::TokenCheck::Valid
        );
        assert!(matches!(
            subscribe_admin(&state).await,
            Err(ServiceError::Unauthorized(_))
        ));

        state.admin_channel().release().await;
        assert!(subscribe_admin(&state).await.is_ok());
    }

    #[tokio::test]
    async fn public_mirror_skips_answers_addressed_to_one_player() {
        let bus = LocalEventBus::new();
        let hub = SseHub::new(8);
        let mut events = hub.subscribe();
        let _mirror = spawn_public_mirror(&bus, hub.clone());

        let mut answer = GameState::new(PhaseState::Join, 5, "A1B2");
        answer.sync_response = true;
        answer.target_player = Some("ada".into());
        bus.publish(Envelope::State(answer));
        bus.publish(Envelope::State(GameState::new(PhaseState::Join, 6, "A1B2")));

        let event = events.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("state"));
        assert!(event.data.contains("\"timestamp\":6"));
        assert!(events.try_recv().is_err());
    }
}
