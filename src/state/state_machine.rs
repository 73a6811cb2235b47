use thiserror::Error;

use crate::{
    state::game::GameSettings,
    sync::snapshot::{PhaseState, Round},
};

/// High-level phases of the display's game driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GamePhase {
    /// No lobby has been opened yet.
    Idle,
    /// A game is active; the payload is what the publisher last emitted.
    Running(PhaseState),
    /// The game was stopped; the payload is the final leaderboard.
    Finished(PhaseState),
}

impl GamePhase {
    /// Synchronised phase to publish, if any.
    pub fn published(&self) -> Option<&PhaseState> {
        match self {
            GamePhase::Idle => None,
            GamePhase::Running(phase) | GamePhase::Finished(phase) => Some(phase),
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Host opens a lobby; starts a new epoch from any phase.
    OpenLobby,
    /// Host starts the first question.
    Begin,
    /// The current phase deadline passed.
    TimerElapsed,
    /// Host ends the current timed phase early.
    Skip,
    /// Host ends the game.
    Stop,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Cadence of the display game, independent of any clock.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    settings: GameSettings,
    question_count: usize,
    version: usize,
}

impl GameStateMachine {
    /// Idle machine for `question_count` questions played with `settings`.
    pub fn new(settings: GameSettings, question_count: usize) -> Self {
        Self {
            phase: GamePhase::Idle,
            settings,
            question_count,
            version: 0,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &GamePhase {
        &self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Swap the question set size and settings, e.g. when a new lobby is opened.
    pub fn reconfigure(&mut self, settings: GameSettings, question_count: usize) {
        self.settings = settings;
        self.question_count = question_count;
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(self.phase.clone())
    }

    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let settings = &self.settings;
        let next = match (&self.phase, event) {
            (_, GameEvent::OpenLobby) => GamePhase::Running(PhaseState::Join),
            (GamePhase::Running(PhaseState::Join), GameEvent::Begin) if self.question_count > 0 => {
                GamePhase::Running(PhaseState::Question(Round {
                    question_index: 0,
                    question_counter: 1,
                    time_left: settings.question_duration,
                }))
            }
            (
                GamePhase::Running(PhaseState::Question(round)),
                GameEvent::TimerElapsed | GameEvent::Skip,
            ) => GamePhase::Running(PhaseState::Answer(Round {
                time_left: settings.answer_reveal_duration,
                ..*round
            })),
            (
                GamePhase::Running(PhaseState::Answer(round)),
                GameEvent::TimerElapsed | GameEvent::Skip,
            ) => GamePhase::Running(self.after_answer(round)),
            (
                GamePhase::Running(PhaseState::Intermission(round) | PhaseState::Leaderboard(round)),
                GameEvent::TimerElapsed | GameEvent::Skip,
            ) => GamePhase::Running(self.next_question(round)),
            (GamePhase::Running(phase), GameEvent::Stop) => {
                let round = phase.round().copied().unwrap_or_default();
                GamePhase::Finished(PhaseState::Leaderboard(Round {
                    time_left: 0,
                    ..round
                }))
            }
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }

    fn after_answer(&self, round: &Round) -> PhaseState {
        let counter = round.question_counter;
        let every = |frequency: u32| frequency > 0 && counter % frequency == 0;
        let pause = Round {
            time_left: self.settings.intermission_duration,
            ..*round
        };
        if every(self.settings.leaderboard_frequency) {
            PhaseState::Leaderboard(pause)
        } else if every(self.settings.intermission_frequency) {
            PhaseState::Intermission(pause)
        } else {
            self.next_question(round)
        }
    }

    fn next_question(&self, round: &Round) -> PhaseState {
        PhaseState::Question(Round {
            question_index: (round.question_index + 1) % self.question_count.max(1),
            question_counter: round.question_counter + 1,
            time_left: self.settings.question_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::Phase;

    fn machine(question_count: usize) -> GameStateMachine {
        GameStateMachine::new(
            GameSettings {
                question_duration: 20,
                intermission_frequency: 2,
                leaderboard_frequency: 3,
                intermission_duration: 10,
                answer_reveal_duration: 5,
            },
            question_count,
        )
    }

    fn phase_of(phase: &GamePhase) -> Option<Phase> {
        phase.published().map(PhaseState::phase)
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = machine(3);
        assert_eq!(sm.phase(), &GamePhase::Idle);
    }

    #[test]
    fn cadence_inserts_intermission_and_leaderboard() {
        let mut sm = machine(2);
        sm.apply(GameEvent::OpenLobby).unwrap();
        sm.apply(GameEvent::Begin).unwrap();

        let mut seen = Vec::new();
        for _ in 0..9 {
            let next = sm.apply(GameEvent::TimerElapsed).unwrap();
            let round = *next.published().unwrap().round().unwrap();
            seen.push((phase_of(&next).unwrap(), round.question_counter));
        }

        assert_eq!(
            seen,
            vec![
                (Phase::Answer, 1),
                (Phase::Question, 2),
                (Phase::Answer, 2),
                (Phase::Intermission, 2),
                (Phase::Question, 3),
                (Phase::Answer, 3),
                (Phase::Leaderboard, 3),
                (Phase::Question, 4),
                (Phase::Answer, 4),
            ]
        );
    }

    #[test]
    fn question_index_wraps_around_the_set() {
        let mut sm = machine(2);
        sm.apply(GameEvent::OpenLobby).unwrap();
        sm.apply(GameEvent::Begin).unwrap();
        sm.apply(GameEvent::Skip).unwrap();
        sm.apply(GameEvent::Skip).unwrap();
        assert_eq!(
            sm.phase().published().unwrap().round().unwrap().question_index,
            1
        );

        sm.apply(GameEvent::Skip).unwrap();
        sm.apply(GameEvent::Skip).unwrap();
        let next = sm.apply(GameEvent::Skip).unwrap();
        let round = next.published().unwrap().round().copied().unwrap();
        assert_eq!(phase_of(&next), Some(Phase::Question));
        assert_eq!((round.question_index, round.question_counter), (0, 3));
        assert_eq!(round.time_left, 20);
    }

    #[test]
    fn stop_finishes_with_final_leaderboard_and_lobby_restarts() {
        let mut sm = machine(3);
        sm.apply(GameEvent::OpenLobby).unwrap();
        sm.apply(GameEvent::Begin).unwrap();

        let finished = sm.apply(GameEvent::Stop).unwrap();
        assert_eq!(
            finished,
            GamePhase::Finished(PhaseState::Leaderboard(Round {
                question_index: 0,
                question_counter: 1,
                time_left: 0,
            }))
        );
        assert!(sm.apply(GameEvent::Skip).is_err());

        assert_eq!(
            sm.apply(GameEvent::OpenLobby).unwrap(),
            GamePhase::Running(PhaseState::Join)
        );
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = machine(3);
        let err = sm.apply(GameEvent::Begin).unwrap_err();
        assert_eq!(err.from, GamePhase::Idle);
        assert_eq!(err.event, GameEvent::Begin);

        sm.apply(GameEvent::OpenLobby).unwrap();
        assert!(sm.apply(GameEvent::TimerElapsed).is_err());
        assert_eq!(sm.version(), 1);
    }

    #[test]
    fn begin_requires_questions() {
        let mut sm = machine(0);
        sm.apply(GameEvent::OpenLobby).unwrap();
        assert!(sm.apply(GameEvent::Begin).is_err());
    }
}
