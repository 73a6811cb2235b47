use serde::Serialize;
use tracing::warn;

use crate::{
    dto::sse::{PlayerAttachmentEvent, PresenceChangedEvent, ScoreChangedEvent, ServerEvent},
    state::SseHub,
    sync::{presence::ActivePlayer, snapshot::GameState, wire::StateMessage},
};

const EVENT_STATE: &str = "state";
const EVENT_PRESENCE: &str = "presence";
const EVENT_SCORE: &str = "player.score";
const EVENT_PLAYER_ATTACHED: &str = "player.attached";
const EVENT_PLAYER_DETACHED: &str = "player.detached";

/// Mirror a published snapshot onto the public stream.
pub fn broadcast_state(hub: &SseHub, state: &GameState) {
    send_event(hub, EVENT_STATE, &StateMessage::from(state));
}

/// Broadcast the players currently counted as active.
pub fn broadcast_presence(hub: &SseHub, players: Vec<ActivePlayer>) {
    let payload = PresenceChangedEvent {
        active_count: players.len(),
        players,
    };
    send_event(hub, EVENT_PRESENCE, &payload);
}

/// Broadcast a player's new score.
pub fn broadcast_score(hub: &SseHub, player_name: &str, score: u32) {
    let payload = ScoreChangedEvent {
        player_name: player_name.to_string(),
        score,
    };
    send_event(hub, EVENT_SCORE, &payload);
}

/// Broadcast that a player context attached or detached.
pub fn broadcast_attachment(hub: &SseHub, player_name: &str, attached: bool) {
    let payload = PlayerAttachmentEvent {
        player_name: player_name.to_string(),
        attached,
    };
    let event = if attached {
        EVENT_PLAYER_ATTACHED
    } else {
        EVENT_PLAYER_DETACHED
    };
    send_event(hub, event, &payload);
}

fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
