use axum::Router;

use crate::state::SharedState;

/// Host controls guarded by the admin token.
pub mod admin;
/// OpenAPI document and Swagger UI.
pub mod docs;
/// Liveness check.
pub mod health;
/// Truth store polling and sync requests.
pub mod public;
/// Public and admin event streams.
pub mod sse;
/// Player WebSocket sessions.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(public::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(admin::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
