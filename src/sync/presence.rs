//! Player heartbeats and the display-side aggregation of active players.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::sync::snapshot::{GameId, Timestamp};

/// Connectivity as a player context perceives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No snapshot has ever been accepted.
    Waiting,
    /// The held snapshot was confirmed recently.
    Connected,
    /// Updates stopped arriving; the context keeps retrying.
    Reconnecting,
}

/// Liveness advertisement emitted by a player on a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Sender.
    pub player_name: String,
    /// Room the sender is bound to.
    pub game_id: GameId,
    /// Sender's wall clock in milliseconds.
    pub timestamp: Timestamp,
    /// Connectivity the sender perceives.
    pub connection_state: ConnectionState,
}

/// Player seen within the presence window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivePlayer {
    /// Player name.
    pub player_name: String,
    /// State from the latest heartbeat.
    pub connection_state: ConnectionState,
}

#[derive(Debug, Clone)]
struct Sighting {
    at: Instant,
    state: ConnectionState,
}

/// Aggregates heartbeats for one room over a trailing window.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    game_id: GameId,
    window: Duration,
    seen: IndexMap<String, Sighting>,
}

impl PresenceTracker {
    /// Tracker for `game_id` counting players heard from within `window`.
    pub fn new(game_id: impl Into<GameId>, window: Duration) -> Self {
        Self {
            game_id: game_id.into(),
            window,
            seen: IndexMap::new(),
        }
    }

    /// Record a heartbeat. Returns `true` when the player was not active before.
    /// Heartbeats for another room are ignored.
    pub fn record(&mut self, record: &PresenceRecord, now: Instant) -> bool {
        if record.game_id != self.game_id {
            return false;
        }
        let was_active = self.is_active(&record.player_name, now);
        self.seen.insert(
            record.player_name.clone(),
            Sighting {
                at: now,
                state: record.connection_state,
            },
        );
        !was_active
    }

    /// Drop players whose last heartbeat left the window. Returns the number removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.seen.len();
        let window = self.window;
        self.seen
            .retain(|_, sighting| now.saturating_duration_since(sighting.at) <= window);
        before - self.seen.len()
    }

    /// Players heard from within the window, in first-seen order.
    pub fn active(&self, now: Instant) -> Vec<ActivePlayer> {
        self.seen
            .iter()
            .filter(|(_, sighting)| now.saturating_duration_since(sighting.at) <= self.window)
            .map(|(name, sighting)| ActivePlayer {
                player_name: name.clone(),
                connection_state: sighting.state,
            })
            .collect()
    }

    /// Number of distinct players heard from within the window.
    pub fn active_count(&self, now: Instant) -> usize {
        self.active(now).len()
    }

    fn is_active(&self, name: &str, now: Instant) -> bool {
        self.seen
            .get(name)
            .is_some_and(|sighting| now.saturating_duration_since(sighting.at) <= self.window)
    }
}
