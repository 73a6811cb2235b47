//! JSON records exchanged through the truth store and the transports.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::sync::snapshot::{GameId, GameState, Phase, PhaseState, Priority, Round, Timestamp};

/// Flat transport form of a [`GameState`].
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    /// Phase discriminant.
    pub state: Phase,
    /// Question shown, zero for the lobby.
    pub question_index: usize,
    /// Seconds left at emission time.
    pub time_left: u32,
    /// One-based round count, zero for the lobby.
    pub question_counter: u32,
    /// Publisher clock value.
    pub timestamp: Timestamp,
    /// Room scope; records without one are accepted by every room.
    pub game_id: Option<GameId>,
    /// Restates the display's truth.
    pub definitive_truth: Option<bool>,
    /// Emitted redundantly.
    pub guaranteed_delivery: Option<bool>,
    /// Answers a forced resynchronisation.
    pub force_sync: Option<bool>,
    /// Answers a sync request.
    pub sync_response: Option<bool>,
    /// Player a sync answer is addressed to.
    pub target_player: Option<String>,
}

impl From<&GameState> for StateMessage {
    fn from(value: &GameState) -> Self {
        let round = value.phase.round().copied().unwrap_or_default();
        Self {
            state: value.phase.phase(),
            question_index: round.question_index,
            time_left: round.time_left,
            question_counter: round.question_counter,
            timestamp: value.timestamp,
            game_id: value.game_id.clone(),
            definitive_truth: value.priority.definitive_truth.then_some(true),
            guaranteed_delivery: value.priority.guaranteed_delivery.then_some(true),
            force_sync: value.priority.force_sync.then_some(true),
            sync_response: value.sync_response.then_some(true),
            target_player: value.target_player.clone(),
        }
    }
}

impl From<StateMessage> for GameState {
    fn from(value: StateMessage) -> Self {
        let round = Round {
            question_index: value.question_index,
            question_counter: value.question_counter,
            time_left: value.time_left,
        };
        Self {
            phase: PhaseState::from_parts(value.state, round),
            timestamp: value.timestamp,
            game_id: value.game_id,
            priority: Priority {
                definitive_truth: value.definitive_truth.unwrap_or(false),
                guaranteed_delivery: value.guaranteed_delivery.unwrap_or(false),
                force_sync: value.force_sync.unwrap_or(false),
            },
            sync_response: value.sync_response.unwrap_or(false),
            target_player: value.target_player,
        }
    }
}

/// Kind of advisory resynchronisation a player asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncRequestKind {
    /// Re-publish the current state.
    RequestState,
    /// Re-publish the current state flagged `forceSync`.
    ForceSync,
}

/// Advisory request from a player; correctness never depends on an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Plain request or forced resynchronisation.
    #[serde(rename = "type")]
    pub kind: SyncRequestKind,
    /// Requesting player; the answer is addressed to it.
    pub player_name: String,
    /// Room the requester is bound to.
    pub game_id: GameId,
    /// Requester's wall clock in milliseconds.
    pub timestamp: Timestamp,
}

/// Parse a stored or transported state record.
pub fn decode_state(raw: &str) -> serde_json::Result<GameState> {
    serde_json::from_str::<StateMessage>(raw).map(Into::into)
}

/// Serialize a state into its transport record.
pub fn encode_state(state: &GameState) -> serde_json::Result<String> {
    serde_json::to_string(&StateMessage::from(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flags_are_omitted_from_json() {
        let state = GameState::new(
            PhaseState::Question(Round {
                question_index: 2,
                question_counter: 3,
                time_left: 17,
            }),
            1_000,
            "A1B2",
        );

        let json = encode_state(&state).unwrap();
        assert!(json.contains("\"state\":\"question\""));
        assert!(json.contains("\"questionCounter\":3"));
        assert!(!json.contains("definitiveTruth"));
        assert!(!json.contains("targetPlayer"));
    }

    #[test]
    fn join_carries_zeroed_round_fields() {
        let state = GameState::new(PhaseState::Join, 5, "A1B2").with_priority(Priority::EPOCH);
        let message = StateMessage::from(&state);

        assert_eq!(message.question_index, 0);
        assert_eq!(message.question_counter, 0);
        assert_eq!(message.definitive_truth, Some(true));
        assert_eq!(message.force_sync, None);
    }

    #[test]
    fn external_payload_with_flags_decodes() {
        let raw = r#"{"state":"answer","questionIndex":1,"timeLeft":4,"questionCounter":2,
            "timestamp":99,"gameId":"A1B2","forceSync":true,"syncResponse":true,
            "targetPlayer":"ada"}"#;
        let state = decode_state(raw).unwrap();

        assert_eq!(state.phase.phase(), Phase::Answer);
        assert!(state.priority.force_sync);
        assert!(state.is_high_priority());
        assert_eq!(state.target_player.as_deref(), Some("ada"));
    }

    #[test]
    fn unknown_phase_or_negative_values_are_rejected() {
        assert!(decode_state(r#"{"state":"podium","questionIndex":0,"timeLeft":0,"questionCounter":0,"timestamp":1}"#).is_err());
        assert!(decode_state(r#"{"state":"question","questionIndex":-1,"timeLeft":0,"questionCounter":1,"timestamp":1}"#).is_err());
        assert!(decode_state("not json").is_err());
    }

    #[test]
    fn sync_request_uses_screaming_type_tag() {
        let request = SyncRequest {
            kind: SyncRequestKind::ForceSync,
            player_name: "ada".into(),
            game_id: "A1B2".into(),
            timestamp: 7,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"FORCE_SYNC\""));
        assert!(json.contains("\"playerName\":\"ada\""));
    }
}
