use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::public::{StateResponse, SyncAccepted, SyncRequestBody},
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Polling fallback and sync-request endpoints for external player clients.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/state/sync", post(request_sync))
}

#[utoipa::path(
    get,
    path = "/state",
    tag = "public",
    responses((status = 200, description = "Stored gameState and displayTruth", body = StateResponse))
)]
/// Return both stored snapshots, exactly as a polling client would read them.
pub async fn get_state(State(state): State<SharedState>) -> Json<StateResponse> {
    Json(public_service::current_state(&state))
}

#[utoipa::path(
    post,
    path = "/state/sync",
    tag = "public",
    request_body = SyncRequestBody,
    responses(
        (status = 202, description = "Request forwarded to the display", body = SyncAccepted),
        (status = 404, description = "Unknown room code")
    )
)]
/// Ask the display to re-publish its state for a player.
pub async fn request_sync(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SyncRequestBody>>,
) -> Result<(StatusCode, Json<SyncAccepted>), AppError> {
    let accepted = public_service::request_sync(&state, payload)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
