//! State synchronisation between the display authority and player contexts.

/// Wall clock abstraction.
pub mod clock;
pub mod presence;
pub mod publisher;
pub mod reconciler;
pub mod recovery;
/// Canonical game state snapshot.
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod wire;
