use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Room served by this host.
    pub game_id: String,
}

impl HealthResponse {
    /// Create a health response indicating every transport is available.
    pub fn ok(game_id: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            game_id: game_id.into(),
        }
    }

    /// Create a health response indicating the broadcast transport is missing.
    pub fn degraded(game_id: impl Into<String>) -> Self {
        Self {
            status: "degraded".to_string(),
            game_id: game_id.into(),
        }
    }
}
