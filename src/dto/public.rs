use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::sync::wire::{StateMessage, SyncRequestKind};

/// Truth store contents exposed to external polling clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    /// Room served by this host.
    pub game_id: String,
    /// Latest canonical snapshot, if one was ever published.
    pub game_state: Option<StateMessage>,
    /// Snapshot written when the current epoch started.
    pub display_truth: Option<StateMessage>,
}

/// Advisory resynchronisation request posted by an external player client.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestBody {
    /// Plain request or forced resynchronisation.
    #[serde(rename = "type")]
    pub kind: SyncRequestKind,
    /// Requesting player.
    #[validate(length(min = 1, max = 32))]
    pub player_name: String,
    /// Room the player believes it is in.
    #[validate(length(min = 1, max = 16))]
    pub game_id: String,
}

/// Acknowledgement that a sync request was forwarded to the display.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncAccepted {
    /// Always true; the display may still ignore the request.
    pub forwarded: bool,
}
