use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::admin::{GameStatusResponse, OpenLobbyRequest, PresenceResponse, ScoresResponse},
    error::AppError,
    services::admin_service,
    state::{SharedState, TokenCheck},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Admin-only endpoints driving the display context.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/game/open", post(open_lobby))
        .route("/admin/game/begin", post(begin_game))
        .route("/admin/game/skip", post(skip_phase))
        .route("/admin/game/stop", post(stop_game))
        .route("/admin/presence", get(get_presence))
        .route("/admin/scores", get(get_scores))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Open a lobby with a new question set, starting a new game epoch.
#[utoipa::path(
    post,
    path = "/admin/game/open",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    request_body = OpenLobbyRequest,
    responses(
        (status = 200, description = "Lobby opened", body = GameStatusResponse),
        (status = 400, description = "Invalid question set")
    )
)]
pub async fn open_lobby(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OpenLobbyRequest>>,
) -> Result<Json<GameStatusResponse>, AppError> {
    Ok(Json(admin_service::open_lobby(&state, payload).await?))
}

/// Close the lobby and show the first question.
#[utoipa::path(
    post,
    path = "/admin/game/begin",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses(
        (status = 200, description = "First question published", body = GameStatusResponse),
        (status = 409, description = "No lobby is open")
    )
)]
pub async fn begin_game(
    State(state): State<SharedState>,
) -> Result<Json<GameStatusResponse>, AppError> {
    Ok(Json(admin_service::begin(&state).await?))
}

/// End the current timed phase immediately.
#[utoipa::path(
    post,
    path = "/admin/game/skip",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses(
        (status = 200, description = "Advanced to the next phase", body = GameStatusResponse),
        (status = 409, description = "No timed phase is running")
    )
)]
pub async fn skip_phase(
    State(state): State<SharedState>,
) -> Result<Json<GameStatusResponse>, AppError> {
    Ok(Json(admin_service::skip(&state).await?))
}

/// Publish the final leaderboard.
#[utoipa::path(
    post,
    path = "/admin/game/stop",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses(
        (status = 200, description = "Game stopped", body = GameStatusResponse),
        (status = 409, description = "No game is running")
    )
)]
pub async fn stop_game(
    State(state): State<SharedState>,
) -> Result<Json<GameStatusResponse>, AppError> {
    Ok(Json(admin_service::stop(&state).await?))
}

/// Players whose heartbeats arrived within the presence window.
#[utoipa::path(
    get,
    path = "/admin/presence",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses((status = 200, description = "Active players", body = PresenceResponse))
)]
pub async fn get_presence(State(state): State<SharedState>) -> Json<PresenceResponse> {
    Json(admin_service::presence(&state).await)
}

/// Scores of attached and departed players.
#[utoipa::path(
    get,
    path = "/admin/scores",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses((status = 200, description = "Player scores", body = ScoresResponse))
)]
pub async fn get_scores(State(state): State<SharedState>) -> Json<ScoresResponse> {
    Json(admin_service::scores(&state))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    match state.admin_channel().check(&provided).await {
        TokenCheck::Valid => Ok(next.run(req).await),
        TokenCheck::Mismatch => Err(AppError::Unauthorized("invalid admin token".into())),
        TokenCheck::Unclaimed => Err(AppError::Unauthorized(
            "admin SSE stream not initialised yet".into(),
        )),
    }
}
