//! Service helpers backing the public polling and sync-request routes.

use crate::{
    dto::public::{StateResponse, SyncAccepted, SyncRequestBody},
    error::ServiceError,
    state::SharedState,
    sync::{
        transport::Envelope,
        wire::{StateMessage, SyncRequest},
    },
};

/// Read the truth store as an external player client would.
pub fn current_state(state: &SharedState) -> StateResponse {
    let ledger = state.medium().ledger();
    StateResponse {
        game_id: state.game_id().to_string(),
        game_state: ledger.game_state().as_ref().map(StateMessage::from),
        display_truth: ledger.display_truth().as_ref().map(StateMessage::from),
    }
}

/// Forward an advisory sync request to the display.
pub fn request_sync(
    state: &SharedState,
    payload: SyncRequestBody,
) -> Result<SyncAccepted, ServiceError> {
    if payload.game_id != state.game_id() {
        return Err(ServiceError::NotFound(format!(
            "unknown game `{}`",
            payload.game_id
        )));
    }
    state
        .medium()
        .send_upstream(Envelope::SyncRequest(SyncRequest {
            kind: payload.kind,
            player_name: payload.player_name,
            game_id: payload.game_id,
            timestamp: state.clock().now_ms(),
        }));
    Ok(SyncAccepted { forwarded: true })
}
