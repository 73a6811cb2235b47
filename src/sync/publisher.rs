//! Display-side authority: the single writer of canonical game state.

use std::{sync::Arc, time::Duration};

use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::sync::{
    clock::Clock,
    snapshot::{GameId, GameState, PhaseState, Priority, Timestamp},
    transport::{Envelope, Medium},
    wire::{SyncRequest, SyncRequestKind},
};

/// How far ahead of the wall clock an epoch-establishing join is stamped, so it
/// outranks anything still circulating from a previous game.
pub const JOIN_EPOCH_OFFSET_MS: u64 = 10_000;

/// Extra copies of the join snapshot pushed after the first emission.
#[derive(Debug, Clone, Copy)]
pub struct Redundancy {
    /// Number of re-emissions.
    pub copies: u32,
    /// Delay between re-emissions.
    pub interval: Duration,
}

impl Default for Redundancy {
    fn default() -> Self {
        Self {
            copies: 3,
            interval: Duration::from_millis(500),
        }
    }
}

/// Produces every state transition and fans it out through the medium.
pub struct AuthorityPublisher {
    medium: Medium,
    clock: Arc<dyn Clock>,
    game_id: GameId,
    redundancy: Redundancy,
    last_timestamp: Timestamp,
    current: Option<GameState>,
    echo: Option<JoinHandle<()>>,
}

impl AuthorityPublisher {
    /// Publisher for `game_id` writing into `medium`.
    pub fn new(
        medium: Medium,
        clock: Arc<dyn Clock>,
        game_id: impl Into<GameId>,
        redundancy: Redundancy,
    ) -> Self {
        Self {
            medium,
            clock,
            game_id: game_id.into(),
            redundancy,
            last_timestamp: 0,
            current: None,
            echo: None,
        }
    }

    /// Room this publisher is authoritative for.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Last published snapshot.
    pub fn current(&self) -> Option<&GameState> {
        self.current.as_ref()
    }

    /// Publish a transition and return its timestamp. Timestamps are strictly
    /// increasing over the publisher's lifetime.
    pub fn publish(&mut self, phase: PhaseState, priority: Priority) -> Timestamp {
        let timestamp = self.next_timestamp(self.clock.now_ms());
        let state = GameState::new(phase, timestamp, self.game_id.clone()).with_priority(priority);
        self.emit(state);
        timestamp
    }

    /// Enter the join phase of a new epoch.
    ///
    /// The snapshot is stamped `now + JOIN_EPOCH_OFFSET_MS`, flagged as
    /// definitive, written as display truth and re-emitted a few times on the
    /// push channels. Later publishes continue from the raised clock floor.
    pub fn establish_epoch(&mut self) -> Timestamp {
        let timestamp = self.next_timestamp(self.clock.now_ms() + JOIN_EPOCH_OFFSET_MS);
        let state = GameState::new(PhaseState::Join, timestamp, self.game_id.clone())
            .with_priority(Priority::EPOCH);

        if let Err(err) = self.medium.ledger().write_display_truth(&state) {
            warn!(error = %err, "failed to write display truth");
        }
        self.emit(state.clone());
        self.spawn_echo(state);
        timestamp
    }

    /// Re-publish the current state in answer to an advisory sync request.
    /// Requests for another room, or arriving before anything was published, are ignored.
    ///
    /// The answer is addressed to the requester and only pushed; the truth
    /// store keeps the last canonical snapshot.
    pub fn answer_sync(&mut self, request: &SyncRequest) -> Option<Timestamp> {
        if request.game_id != self.game_id {
            return None;
        }
        let phase = self.current.as_ref()?.phase.clone();
        let priority = Priority {
            force_sync: request.kind == SyncRequestKind::ForceSync,
            ..Priority::NONE
        };
        let timestamp = self.next_timestamp(self.clock.now_ms());
        let mut state =
            GameState::new(phase, timestamp, self.game_id.clone()).with_priority(priority);
        state.sync_response = true;
        state.target_player = Some(request.player_name.clone());

        debug!(player = %request.player_name, kind = ?request.kind, timestamp, "answering sync request");
        self.push(&state);
        Some(timestamp)
    }

    fn next_timestamp(&mut self, candidate: Timestamp) -> Timestamp {
        let timestamp = candidate.max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;
        timestamp
    }

    fn emit(&mut self, state: GameState) {
        // Leaving the lobby supersedes any pending join copies.
        if state.phase != PhaseState::Join {
            if let Some(echo) = self.echo.take() {
                echo.abort();
            }
        }
        if let Err(err) = self.medium.ledger().write_game_state(&state) {
            warn!(error = %err, timestamp = state.timestamp, "failed to write game state");
        }
        self.push(&state);
        debug!(phase = ?state.phase.phase(), timestamp = state.timestamp, "published game state");
        self.current = Some(state);
    }

    fn push(&self, state: &GameState) {
        self.medium.broadcast_envelope(Envelope::State(state.clone()));
        self.medium.bus().publish(Envelope::State(state.clone()));
    }

    fn spawn_echo(&mut self, state: GameState) {
        if let Some(previous) = self.echo.take() {
            previous.abort();
        }
        if self.redundancy.copies == 0 {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime available; skipping redundant join emission");
            return;
        };
        let medium = self.medium.clone();
        let Redundancy { copies, interval } = self.redundancy;
        self.echo = Some(runtime.spawn(async move {
            for _ in 0..copies {
                sleep(interval).await;
                medium.broadcast_envelope(Envelope::State(state.clone()));
                medium.bus().publish(Envelope::State(state.clone()));
            }
        }));
    }
}

impl Drop for AuthorityPublisher {
    fn drop(&mut self) {
        if let Some(echo) = self.echo.take() {
            echo.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    use crate::{
        state::game::QuestionSet,
        sync::{
            clock::ManualClock,
            reconciler::{Reconciler, Verdict},
            snapshot::Round,
            store::MemoryTruthStore,
            transport::{BroadcastTransport, LocalEventBus},
        },
    };

    fn medium() -> Medium {
        Medium::new(
            Arc::new(MemoryTruthStore::new()),
            BroadcastTransport::open(16),
            LocalEventBus::new(),
        )
    }

    fn question(counter: u32) -> PhaseState {
        PhaseState::Question(Round {
            question_index: (counter - 1) as usize,
            question_counter: counter,
            time_left: 20,
        })
    }

    #[test]
    fn timestamps_strictly_increase_even_with_frozen_or_rewound_clock() {
        let clock = ManualClock::starting_at(1_000);
        let mut publisher = AuthorityPublisher::new(
            medium(),
            Arc::new(clock.clone()),
            "A1B2",
            Redundancy::default(),
        );

        let first = publisher.publish(question(1), Priority::NONE);
        let second = publisher.publish(question(2), Priority::NONE);
        clock.set(10);
        let third = publisher.publish(question(3), Priority::NONE);

        assert!(first < second && second < third);
    }

    #[test]
    fn publish_writes_store_and_bus() {
        let medium = medium();
        let mut bus = medium.bus().subscribe();
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(50)),
            "A1B2",
            Redundancy::default(),
        );

        let timestamp = publisher.publish(question(1), Priority::NONE);

        let stored = medium.ledger().game_state().unwrap();
        assert_eq!(stored.timestamp, timestamp);
        assert_eq!(stored.game_id.as_deref(), Some("A1B2"));
        let Some(Envelope::State(pushed)) = bus.try_recv() else {
            panic!("expected a state on the bus");
        };
        assert_eq!(pushed, stored);
    }

    #[test]
    fn epoch_join_is_inflated_definitive_and_recorded_as_display_truth() {
        let medium = medium();
        let clock = ManualClock::starting_at(1_000);
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(clock),
            "A1B2",
            Redundancy::default(),
        );

        let join = publisher.establish_epoch();
        assert_eq!(join, 1_000 + JOIN_EPOCH_OFFSET_MS);

        let truth = medium.ledger().display_truth().unwrap();
        assert_eq!(truth.timestamp, join);
        assert!(truth.priority.definitive_truth);
        assert_eq!(medium.ledger().game_state().unwrap(), truth);

        let next = publisher.publish(question(1), Priority::NONE);
        assert!(next > truth.timestamp);
    }

    #[test]
    fn sync_answer_targets_requesting_player() {
        let medium = medium();
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(1)),
            "A1B2",
            Redundancy::default(),
        );
        let request = SyncRequest {
            kind: SyncRequestKind::ForceSync,
            player_name: "ada".into(),
            game_id: "A1B2".into(),
            timestamp: 0,
        };
        assert_eq!(publisher.answer_sync(&request), None);

        let published = publisher.publish(question(1), Priority::NONE);
        let mut bus = medium.bus().subscribe();
        let answered = publisher.answer_sync(&request).unwrap();

        let Some(Envelope::State(pushed)) = bus.try_recv() else {
            panic!("expected the answer on the bus");
        };
        assert_eq!(pushed.timestamp, answered);
        assert!(pushed.sync_response && pushed.priority.force_sync);
        assert_eq!(pushed.target_player.as_deref(), Some("ada"));
        assert_eq!(pushed.phase, question(1));

        let stored = medium.ledger().game_state().unwrap();
        assert_eq!(stored.timestamp, published);
        assert!(!stored.sync_response && stored.target_player.is_none());
        assert_eq!(publisher.current(), Some(&stored));

        let foreign = SyncRequest {
            game_id: "X9Y8".into(),
            ..request
        };
        assert_eq!(publisher.answer_sync(&foreign), None);
    }

    #[test]
    fn poll_only_reader_adopts_the_lobby_after_another_players_request() {
        let medium = medium();
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(1_000)),
            "A1B2",
            Redundancy::default(),
        );
        let join = publisher.establish_epoch();
        publisher.answer_sync(&SyncRequest {
            kind: SyncRequestKind::RequestState,
            player_name: "grace".into(),
            game_id: "A1B2".into(),
            timestamp: 0,
        });

        let mut ada = Reconciler::new("ada", "A1B2", Arc::new(QuestionSet::default()));
        let verdict = ada.observe_store(medium.ledger().game_state(), Instant::now());

        assert_eq!(verdict, Some(Verdict::Accepted));
        assert_eq!(ada.held().unwrap().timestamp, join);
        assert_eq!(ada.held().unwrap().phase, PhaseState::Join);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_answer_does_not_cut_the_join_echo_short() {
        let medium = medium();
        let mut rx = medium.subscribe_broadcast().unwrap();
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(0)),
            "A1B2",
            Redundancy {
                copies: 3,
                interval: Duration::from_millis(100),
            },
        );

        let join = publisher.establish_epoch();
        sleep(Duration::from_millis(50)).await;
        publisher.answer_sync(&SyncRequest {
            kind: SyncRequestKind::RequestState,
            player_name: "grace".into(),
            game_id: "A1B2".into(),
            timestamp: 0,
        });
        sleep(Duration::from_millis(500)).await;

        let mut joins = 0;
        while let Ok(Envelope::State(state)) = rx.try_recv() {
            if state.timestamp == join {
                joins += 1;
            }
        }
        assert_eq!(joins, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn join_is_echoed_until_superseded() {
        let medium = medium();
        let mut rx = medium.subscribe_broadcast().unwrap();
        let mut publisher = AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(0)),
            "A1B2",
            Redundancy {
                copies: 3,
                interval: Duration::from_millis(100),
            },
        );

        let join = publisher.establish_epoch();
        sleep(Duration::from_millis(250)).await;
        publisher.publish(question(1), Priority::NONE);
        sleep(Duration::from_millis(500)).await;

        let mut joins = 0;
        while let Ok(Envelope::State(state)) = rx.try_recv() {
            if state.timestamp == join {
                joins += 1;
            }
        }
        // initial emission plus the two copies sent before the question
        assert_eq!(joins, 3);
    }
}
