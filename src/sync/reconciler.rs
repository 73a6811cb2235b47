//! Player-side merge of the three delivery channels into one consistent view.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    state::game::QuestionSet,
    sync::{
        presence::ConnectionState,
        snapshot::{GameId, GameState, Phase, PhaseState},
    },
};

/// Largest gap (seconds) between local prediction and an authoritative
/// `timeLeft` that is absorbed without moving the countdown.
pub const COUNTDOWN_TOLERANCE_SECS: u32 = 2;

/// Channel a candidate snapshot arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Broadcast transport push.
    Broadcast,
    /// Local event bus push.
    Bus,
    /// Truth store poll.
    Poll,
    /// Desync recovery; always treated as high priority.
    Recovery,
}

/// Outcome of offering a candidate snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The candidate replaced the held snapshot.
    Accepted,
    /// Not newer than the held snapshot and not high priority.
    Stale,
    /// Same emission as the held snapshot.
    Duplicate,
    /// Scoped to another room.
    ForeignGame,
    /// Sync response addressed to another player.
    OtherPlayer,
}

impl Verdict {
    /// True for [`Verdict::Accepted`].
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

/// Why an answer selection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnswerError {
    /// No question is open.
    #[error("no question is open")]
    NotAcceptingAnswers,
    /// The local countdown already reached zero.
    #[error("time is up for this question")]
    TimeUp,
    /// The option index does not exist for the open question.
    #[error("option {0} does not exist")]
    UnknownOption(usize),
}

/// Per-player state derived from the held snapshot, as shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Player the view belongs to.
    pub player_name: String,
    /// Room the player is bound to.
    pub game_id: GameId,
    /// Phase of the held snapshot, absent before the first acceptance.
    pub phase: Option<Phase>,
    /// Question shown in the current round.
    pub question_index: Option<usize>,
    /// One-based count of the current round.
    pub question_counter: Option<u32>,
    /// Locally predicted seconds left.
    pub local_time_left: u32,
    /// Points earned in this epoch.
    pub score: u32,
    /// Shorthand for `status == connected`.
    pub connected: bool,
    /// Connectivity shown to the player.
    pub status: ConnectionState,
    /// Option chosen for the current round, if any.
    pub selected_option: Option<usize>,
}

/// Countdown predicted locally from an absolute deadline.
#[derive(Debug, Clone, Default)]
struct Countdown {
    key: Option<(Phase, u32)>,
    deadline: Option<Instant>,
}

impl Countdown {
    fn remaining(&self, now: Instant) -> u32 {
        let Some(deadline) = self.deadline else {
            return 0;
        };
        let left = deadline.saturating_duration_since(now).as_millis();
        left.div_ceil(1_000) as u32
    }

    fn align(&mut self, phase: &PhaseState, now: Instant) {
        let Some(round) = phase.round() else {
            self.key = None;
            self.deadline = None;
            return;
        };
        let key = (phase.phase(), round.question_counter);
        if self.key != Some(key) {
            self.key = Some(key);
            self.seed(round.time_left, now);
            return;
        }
        let predicted = self.remaining(now);
        if predicted.abs_diff(round.time_left) > COUNTDOWN_TOLERANCE_SECS {
            debug!(predicted, authoritative = round.time_left, "correcting local countdown");
            self.seed(round.time_left, now);
        }
    }

    fn seed(&mut self, time_left: u32, now: Instant) {
        self.deadline = Some(now + Duration::from_secs(u64::from(time_left)));
    }
}

#[derive(Debug, Clone, Copy)]
struct Selection {
    question_counter: u32,
    question_index: usize,
    option: usize,
}

#[derive(Debug, Clone, Default)]
struct Scorecard {
    score: u32,
    selection: Option<Selection>,
    settled_through: u32,
}

impl Scorecard {
    /// Score the pending selection once `phase` shows its question is closed.
    /// A missed answer snapshot is covered by any later round.
    fn settle(&mut self, phase: &PhaseState, questions: &QuestionSet) -> Option<u32> {
        let round = phase.round()?;
        let selection = self.selection?;
        if selection.question_counter <= self.settled_through {
            return None;
        }
        let closed = match phase {
            PhaseState::Question(_) => selection.question_counter < round.question_counter,
            _ => selection.question_counter <= round.question_counter,
        };
        if !closed {
            return None;
        }
        self.settled_through = selection.question_counter;
        let question = questions.get(selection.question_index)?;
        if !question.is_correct(selection.option) {
            return Some(0);
        }
        let points = question.difficulty.points();
        self.score += points;
        Some(points)
    }
}

/// Holds one player's accepted snapshot and everything derived from it.
///
/// Candidates may arrive from any channel in any order; acceptance is decided
/// on the snapshot timestamp alone, with high-priority flags allowed to
/// pre-empt. The reconciler never invents a transition: a countdown reaching
/// zero leaves the phase untouched until the publisher moves on.
#[derive(Debug)]
pub struct Reconciler {
    player_name: String,
    game_id: GameId,
    held: Option<GameState>,
    last_accepted: Option<Instant>,
    last_confirmed: Option<Instant>,
    observed_store: bool,
    countdown: Countdown,
    scorecard: Scorecard,
    questions: Arc<QuestionSet>,
}

impl Reconciler {
    /// Reconciler for `player_name` bound to room `game_id`.
    pub fn new(
        player_name: impl Into<String>,
        game_id: impl Into<GameId>,
        questions: Arc<QuestionSet>,
    ) -> Self {
        Self {
            player_name: player_name.into(),
            game_id: game_id.into(),
            held: None,
            last_accepted: None,
            last_confirmed: None,
            observed_store: false,
            countdown: Countdown::default(),
            scorecard: Scorecard::default(),
            questions,
        }
    }

    /// Name of the player this reconciler serves.
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Room this reconciler is bound to.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Currently held snapshot.
    pub fn held(&self) -> Option<&GameState> {
        self.held.as_ref()
    }

    /// Whether a truth store read ever returned a snapshot scoped to this player.
    pub fn observed_store(&self) -> bool {
        self.observed_store
    }

    /// When the last snapshot was accepted.
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    /// When the held snapshot was last accepted or found unchanged in the truth store.
    pub fn last_confirmed(&self) -> Option<Instant> {
        self.last_confirmed
    }

    /// Replace the questions used for scoring.
    pub fn set_questions(&mut self, questions: Arc<QuestionSet>) {
        self.questions = questions;
    }

    /// Offer a candidate snapshot from `source`.
    pub fn offer(&mut self, candidate: GameState, source: Source, now: Instant) -> Verdict {
        if let Some(verdict) = self.out_of_scope(&candidate) {
            return verdict;
        }

        let high_priority = candidate.is_high_priority() || source == Source::Recovery;
        if let Some(held) = &self.held {
            if held.same_emission(&candidate) {
                return Verdict::Duplicate;
            }
            if !high_priority && candidate.timestamp <= held.timestamp {
                return Verdict::Stale;
            }
        }

        self.apply(candidate, source, now);
        Verdict::Accepted
    }

    /// Feed the result of a truth store read.
    pub fn observe_store(&mut self, stored: Option<GameState>, now: Instant) -> Option<Verdict> {
        let stored = stored?;
        if let Some(verdict) = self.out_of_scope(&stored) {
            return Some(verdict);
        }
        self.observed_store = true;
        let verdict = self.offer(stored, Source::Poll, now);
        if verdict == Verdict::Duplicate {
            self.last_confirmed = Some(now);
        }
        Some(verdict)
    }

    /// Record the player's choice for the open question. Last selection wins.
    pub fn select_answer(&mut self, option: usize, now: Instant) -> Result<(), AnswerError> {
        let Some(PhaseState::Question(round)) = self.held.as_ref().map(|held| &held.phase) else {
            return Err(AnswerError::NotAcceptingAnswers);
        };
        if self.countdown.remaining(now) == 0 {
            return Err(AnswerError::TimeUp);
        }
        if let Some(question) = self.questions.get(round.question_index) {
            if option >= question.options.len() {
                return Err(AnswerError::UnknownOption(option));
            }
        }
        self.scorecard.selection = Some(Selection {
            question_counter: round.question_counter,
            question_index: round.question_index,
            option,
        });
        Ok(())
    }

    /// Locally predicted seconds left in the current phase.
    pub fn local_time_left(&self, now: Instant) -> u32 {
        self.countdown.remaining(now)
    }

    /// Player score so far in this epoch.
    pub fn score(&self) -> u32 {
        self.scorecard.score
    }

    /// Connectivity derived from how recently the held snapshot was confirmed.
    pub fn connection_state(&self, now: Instant, stale_after: Duration) -> ConnectionState {
        match self.last_confirmed {
            None => ConnectionState::Waiting,
            Some(at) if now.saturating_duration_since(at) <= stale_after => {
                ConnectionState::Connected
            }
            Some(_) => ConnectionState::Reconnecting,
        }
    }

    /// Snapshot of everything the player UI shows.
    pub fn view(&self, now: Instant, stale_after: Duration) -> PlayerView {
        let round = self.held.as_ref().and_then(|held| held.phase.round());
        let status = self.connection_state(now, stale_after);
        let selected_option = self
            .scorecard
            .selection
            .filter(|selection| Some(selection.question_counter) == round.map(|r| r.question_counter))
            .map(|selection| selection.option);
        PlayerView {
            player_name: self.player_name.clone(),
            game_id: self.game_id.clone(),
            phase: self.held.as_ref().map(|held| held.phase.phase()),
            question_index: round.map(|round| round.question_index),
            question_counter: round.map(|round| round.question_counter),
            local_time_left: self.countdown.remaining(now),
            score: self.scorecard.score,
            connected: status == ConnectionState::Connected,
            status,
            selected_option,
        }
    }

    fn out_of_scope(&self, candidate: &GameState) -> Option<Verdict> {
        if candidate
            .game_id
            .as_ref()
            .is_some_and(|id| *id != self.game_id)
        {
            return Some(Verdict::ForeignGame);
        }
        if candidate
            .target_player
            .as_ref()
            .is_some_and(|target| *target != self.player_name)
        {
            return Some(Verdict::OtherPlayer);
        }
        None
    }

    fn apply(&mut self, candidate: GameState, source: Source, now: Instant) {
        let previous = self.held.as_ref().map(|held| held.phase.phase());
        let next = candidate.phase.phase();
        if previous != Some(next) {
            debug!(
                player = %self.player_name,
                from = ?previous,
                to = ?next,
                timestamp = candidate.timestamp,
                source = ?source,
                "accepted phase change"
            );
        }

        self.countdown.align(&candidate.phase, now);
        if candidate.phase == PhaseState::Join {
            if previous != Some(Phase::Join) {
                self.scorecard = Scorecard::default();
            }
        } else if let Some(points) = self.scorecard.settle(&candidate.phase, &self.questions) {
            debug!(player = %self.player_name, points, total = self.scorecard.score, "answer settled");
        }

        self.held = Some(candidate);
        self.last_accepted = Some(now);
        self.last_confirmed = Some(now);
    }
}
