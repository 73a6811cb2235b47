use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the trivia sync host.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::get_state,
        crate::routes::public::request_sync,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::open_lobby,
        crate::routes::admin::begin_game,
        crate::routes::admin::skip_phase,
        crate::routes::admin::stop_game,
        crate::routes::admin::get_presence,
        crate::routes::admin::get_scores,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::public::StateResponse,
            crate::dto::public::SyncRequestBody,
            crate::dto::public::SyncAccepted,
            crate::dto::admin::OpenLobbyRequest,
            crate::dto::admin::QuestionInput,
            crate::dto::admin::GameStatusResponse,
            crate::dto::admin::PresenceResponse,
            crate::dto::admin::ScoresResponse,
            crate::dto::admin::ScoreEntry,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
            crate::dto::sse::AdminHandshake,
            crate::dto::sse::PresenceChangedEvent,
            crate::dto::sse::ScoreChangedEvent,
            crate::dto::sse::PlayerAttachmentEvent,
            crate::sync::wire::StateMessage,
            crate::sync::wire::SyncRequestKind,
            crate::sync::presence::ActivePlayer,
            crate::sync::presence::ConnectionState,
            crate::sync::reconciler::PlayerView,
            crate::state::game::GameSettings,
            crate::state::game::Difficulty,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Polling fallback for player clients"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "players", description = "WebSocket sessions for player clients"),
        (name = "admin", description = "Host controls for the display context"),
    )
)]
/// OpenAPI document covering every route.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_sync_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/state", "/state/sync", "/admin/game/open", "/ws"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
