use serde::Serialize;
use utoipa::ToSchema;

use crate::sync::presence::ActivePlayer;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name, if any.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already encoded payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Token issued to the single admin stream; required on admin routes.
pub struct AdminHandshake {
    /// Value expected in the `X-Admin-Token` header.
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast whenever the set of active players changes.
pub struct PresenceChangedEvent {
    /// Number of players in `players`.
    pub active_count: usize,
    /// Players heard from within the presence window.
    pub players: Vec<ActivePlayer>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a player's score changes.
pub struct ScoreChangedEvent {
    /// Player whose score changed.
    pub player_name: String,
    /// New total for the epoch.
    pub score: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a player context attaches or detaches.
pub struct PlayerAttachmentEvent {
    /// Player concerned.
    pub player_name: String,
    /// True on attach, false on detach.
    pub attached: bool,
}
