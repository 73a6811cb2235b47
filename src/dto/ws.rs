use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sync::reconciler::PlayerView;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerInboundMessage {
    /// First message of every connection.
    #[serde(rename_all = "camelCase")]
    Identification { player_name: String, game_id: String },
    /// Select an option of the open question.
    Answer { option: usize },
    /// Ask the display to re-publish its state.
    #[serde(rename_all = "camelCase")]
    RequestState {
        #[serde(default)]
        force: bool,
    },
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerOutboundMessage {
    /// Current derived view of the player.
    View(PlayerView),
    /// A request from the player was refused.
    Error { message: String },
}
