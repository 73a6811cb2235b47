use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Room code every snapshot is scoped to (e.g. `A1B2`).
pub type GameId = String;

/// Logical clock value in milliseconds, assigned by the authority publisher.
pub type Timestamp = u64;

/// Coarse game phases as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Lobby: players attach before the first question.
    Join,
    /// A question is open and its countdown is running.
    Question,
    /// The correct option of the last question is revealed.
    Answer,
    /// Short break between question blocks.
    Intermission,
    /// Standings are shown.
    Leaderboard,
}

/// Progress through the question set carried by every timed phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Round {
    /// Zero-based index into the question set, wraps modulo its length.
    pub question_index: usize,
    /// One-based count of questions asked so far in this epoch.
    pub question_counter: u32,
    /// Seconds remaining in the phase at emission time.
    pub time_left: u32,
}

/// Phase together with the payload that phase carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseState {
    /// Lobby, no round yet.
    Join,
    /// Open question.
    Question(Round),
    /// Answer reveal for the round's question.
    Answer(Round),
    /// Break after the round's answer.
    Intermission(Round),
    /// Standings after the round's answer.
    Leaderboard(Round),
}

impl PhaseState {
    /// Rebuild a phase state from its wire parts. Join ignores the round.
    pub fn from_parts(phase: Phase, round: Round) -> Self {
        match phase {
            Phase::Join => PhaseState::Join,
            Phase::Question => PhaseState::Question(round),
            Phase::Answer => PhaseState::Answer(round),
            Phase::Intermission => PhaseState::Intermission(round),
            Phase::Leaderboard => PhaseState::Leaderboard(round),
        }
    }

    /// Discriminant of this state.
    pub fn phase(&self) -> Phase {
        match self {
            PhaseState::Join => Phase::Join,
            PhaseState::Question(_) => Phase::Question,
            PhaseState::Answer(_) => Phase::Answer,
            PhaseState::Intermission(_) => Phase::Intermission,
            PhaseState::Leaderboard(_) => Phase::Leaderboard,
        }
    }

    /// Round payload, absent in the lobby.
    pub fn round(&self) -> Option<&Round> {
        match self {
            PhaseState::Join => None,
            PhaseState::Question(round)
            | PhaseState::Answer(round)
            | PhaseState::Intermission(round)
            | PhaseState::Leaderboard(round) => Some(round),
        }
    }

    /// Seconds left as stated by the publisher.
    pub fn time_left(&self) -> u32 {
        self.round().map(|round| round.time_left).unwrap_or(0)
    }

    /// Copy of this state with a different remaining time.
    pub fn with_time_left(&self, time_left: u32) -> Self {
        match self.round() {
            Some(round) => Self::from_parts(
                self.phase(),
                Round {
                    time_left,
                    ..*round
                },
            ),
            None => PhaseState::Join,
        }
    }
}

/// Flags that let a snapshot bypass the ordinary timestamp comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Priority {
    /// Snapshot restates the display's truth (epoch start or recovery).
    pub definitive_truth: bool,
    /// Snapshot was emitted redundantly to survive lossy delivery.
    pub guaranteed_delivery: bool,
    /// Snapshot answers a forced resynchronisation.
    pub force_sync: bool,
}

impl Priority {
    /// No flag set.
    pub const NONE: Priority = Priority {
        definitive_truth: false,
        guaranteed_delivery: false,
        force_sync: false,
    };

    /// Flags stamped on an epoch-establishing join snapshot.
    pub const EPOCH: Priority = Priority {
        definitive_truth: true,
        guaranteed_delivery: true,
        force_sync: false,
    };

    /// True when any pre-emption flag is set.
    pub fn is_high(&self) -> bool {
        self.definitive_truth || self.guaranteed_delivery || self.force_sync
    }
}

/// The canonical snapshot produced by the authority publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    /// Phase and its payload.
    pub phase: PhaseState,
    /// Logical clock value; the sole tie-breaker between snapshots.
    pub timestamp: Timestamp,
    /// Room this snapshot belongs to.
    pub game_id: Option<GameId>,
    /// Pre-emption flags.
    pub priority: Priority,
    /// Set when the snapshot re-publishes state in answer to a sync request.
    pub sync_response: bool,
    /// Player a sync response is addressed to.
    pub target_player: Option<String>,
}

impl GameState {
    /// Ordinary snapshot without flags.
    pub fn new(phase: PhaseState, timestamp: Timestamp, game_id: impl Into<GameId>) -> Self {
        Self {
            phase,
            timestamp,
            game_id: Some(game_id.into()),
            priority: Priority::NONE,
            sync_response: false,
            target_player: None,
        }
    }

    /// Same snapshot with the given flags.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// True when the snapshot may pre-empt timestamp ordering.
    pub fn is_high_priority(&self) -> bool {
        self.priority.is_high()
    }

    /// Whether `other` describes the same emission (same clock value, room and phase),
    /// ignoring delivery metadata.
    pub fn same_emission(&self, other: &GameState) -> bool {
        self.timestamp == other.timestamp
            && self.game_id == other.game_id
            && self.phase == other.phase
    }
}
