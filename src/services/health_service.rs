use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether every transport is available, logging when degraded.
pub fn health_status(state: &SharedState) -> HealthResponse {
    if state.is_degraded() {
        warn!("broadcast transport unavailable (degraded mode)");
        HealthResponse::degraded(state.game_id())
    } else {
        HealthResponse::ok(state.game_id())
    }
}
