/// Admin service driving the display context.
pub mod admin_service;
/// The display context: game cadence and authority publishing.
pub mod display_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Player contexts reconciling the three delivery channels.
pub mod player_service;
/// Heartbeat aggregation on the display side.
pub mod presence_service;
/// Public service for polling and sync requests.
pub mod public_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
