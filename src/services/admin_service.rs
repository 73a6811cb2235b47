//! Business logic powering the admin REST routes: driving the display context
//! and reading presence and scores.

use tokio::time::Instant;
use tracing::info;

use crate::{
    dto::admin::{
        GameStatusResponse, OpenLobbyRequest, PresenceResponse, ScoresResponse,
    },
    error::ServiceError,
    state::SharedState,
    sync::{snapshot::GameState, wire::StateMessage},
};

fn status(state: &SharedState, published: GameState) -> GameStatusResponse {
    GameStatusResponse {
        game_id: state.game_id().to_string(),
        state: Some(StateMessage::from(&published)),
    }
}

/// Open a lobby with a fresh question set, starting a new epoch.
pub async fn open_lobby(
    state: &SharedState,
    payload: OpenLobbyRequest,
) -> Result<GameStatusResponse, ServiceError> {
    let (questions, settings) = payload.into_parts();
    let count = questions.len();
    let published = state.display().open_lobby(questions, settings).await?;
    info!(questions = count, timestamp = published.timestamp, "lobby opened");
    Ok(status(state, published))
}

/// Move from the lobby to the first question.
pub async fn begin(state: &SharedState) -> Result<GameStatusResponse, ServiceError> {
    let published = state.display().begin().await?;
    Ok(status(state, published))
}

/// End the current timed phase early.
pub async fn skip(state: &SharedState) -> Result<GameStatusResponse, ServiceError> {
    let published = state.display().skip().await?;
    Ok(status(state, published))
}

/// Publish the final leaderboard and stop the game.
pub async fn stop(state: &SharedState) -> Result<GameStatusResponse, ServiceError> {
    let published = state.display().stop().await?;
    info!(timestamp = published.timestamp, "game stopped");
    Ok(status(state, published))
}

/// Players heard from within the presence window.
pub async fn presence(state: &SharedState) -> PresenceResponse {
    let players = state.presence().read().await.active(Instant::now());
    PresenceResponse::new(state.game_id(), players)
}

/// Final or running scores of every player seen by this host.
pub fn scores(state: &SharedState) -> ScoresResponse {
    ScoresResponse::new(state.game_id(), state.scores())
}
