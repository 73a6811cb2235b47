//! Player contexts: one isolated task per attached player, merging the three
//! delivery channels through a [`Reconciler`].

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    config::SyncTimings,
    error::ServiceError,
    state::game::QuestionSet,
    sync::{
        clock::Clock,
        presence::PresenceRecord,
        reconciler::{PlayerView, Reconciler, Source},
        recovery,
        snapshot::GameId,
        transport::{BusSubscription, Envelope, Medium, next_broadcast},
        wire::{SyncRequest, SyncRequestKind},
    },
};

const COMMAND_BUFFER: usize = 16;
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Identity and cadence of one player context.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Unique name among attached players.
    pub player_name: String,
    /// Room the context is bound to.
    pub game_id: GameId,
    /// Poll, recovery and heartbeat cadence.
    pub timings: SyncTimings,
}

#[derive(Debug)]
enum PlayerCommand {
    SelectAnswer {
        option: usize,
        reply: oneshot::Sender<Result<PlayerView, ServiceError>>,
    },
    RequestState {
        force: bool,
    },
}

/// Owner of a running player context. Dropping it tears the context down.
#[derive(Debug)]
pub struct PlayerHandle {
    player_name: String,
    commands: mpsc::Sender<PlayerCommand>,
    view: watch::Receiver<PlayerView>,
    task: JoinHandle<()>,
}

impl PlayerHandle {
    /// Name the context was attached with.
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Current derived view.
    pub fn view(&self) -> PlayerView {
        self.view.borrow().clone()
    }

    /// Watch the view for changes.
    pub fn subscribe(&self) -> watch::Receiver<PlayerView> {
        self.view.clone()
    }

    /// Select an option for the open question.
    pub async fn select_answer(&self, option: usize) -> Result<PlayerView, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(PlayerCommand::SelectAnswer { option, reply })
            .await
            .map_err(|_| ServiceError::ContextGone("player context"))?;
        response
            .await
            .map_err(|_| ServiceError::ContextGone("player context"))?
    }

    /// Ask the display to re-publish its state.
    pub async fn request_state(&self, force: bool) -> Result<(), ServiceError> {
        self.commands
            .send(PlayerCommand::RequestState { force })
            .await
            .map_err(|_| ServiceError::ContextGone("player context"))
    }

    /// Stop every periodic task and drop every subscription, returning the last view.
    /// Once this returns nothing of the context is left running.
    pub async fn detach(mut self) -> PlayerView {
        self.task.abort();
        if let Err(err) = (&mut self.task).await {
            if !err.is_cancelled() {
                warn!(player = %self.player_name, error = %err, "player context failed");
            }
        }
        let view = self.view.borrow().clone();
        info!(player = %self.player_name, score = view.score, "player detached");
        view
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a player context bound to `options.game_id`.
///
/// Subscriptions are registered before this returns, so nothing published
/// afterwards is missed by the push channels.
pub fn attach(
    medium: Medium,
    clock: Arc<dyn Clock>,
    questions: watch::Receiver<Arc<QuestionSet>>,
    options: PlayerOptions,
) -> PlayerHandle {
    let now = Instant::now();
    let reconciler = Reconciler::new(
        options.player_name.clone(),
        options.game_id.clone(),
        questions.borrow().clone(),
    );
    let (view_tx, view_rx) = watch::channel(reconciler.view(now, options.timings.stale_after));
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let channels = Channels {
        commands: receiver,
        bus: medium.bus().subscribe(),
        broadcast: medium.subscribe_broadcast(),
        questions,
    };
    let context = PlayerContext {
        reconciler,
        medium,
        clock,
        timings: options.timings,
        attached_at: now,
        view: view_tx,
    };

    info!(player = %options.player_name, game_id = %options.game_id, "player attached");
    PlayerHandle {
        player_name: options.player_name,
        commands,
        view: view_rx,
        task: tokio::spawn(context.run(channels)),
    }
}

struct Channels {
    commands: mpsc::Receiver<PlayerCommand>,
    bus: BusSubscription,
    broadcast: Option<broadcast::Receiver<Envelope>>,
    questions: watch::Receiver<Arc<QuestionSet>>,
}

struct PlayerContext {
    reconciler: Reconciler,
    medium: Medium,
    clock: Arc<dyn Clock>,
    timings: SyncTimings,
    attached_at: Instant,
    view: watch::Sender<PlayerView>,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl PlayerContext {
    async fn run(mut self, mut channels: Channels) {
        let mut poll = ticker(self.timings.poll_interval);
        let mut desync = ticker(self.timings.desync_check_interval);
        let mut countdown = ticker(COUNTDOWN_TICK);
        let mut heartbeat = ticker(self.timings.heartbeat_interval);

        loop {
            tokio::select! {
                command = channels.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                envelope = next_broadcast(&mut channels.broadcast) => {
                    self.on_envelope(envelope, Source::Broadcast);
                }
                Some(envelope) = channels.bus.recv() => self.on_envelope(envelope, Source::Bus),
                Ok(()) = channels.questions.changed() => {
                    let questions = channels.questions.borrow_and_update().clone();
                    self.reconciler.set_questions(questions);
                }
                _ = poll.tick() => self.poll(),
                _ = desync.tick() => self.check_desync(),
                _ = countdown.tick() => self.refresh_view(),
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }
    }

    fn handle(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::SelectAnswer { option, reply } => {
                let result = self
                    .reconciler
                    .select_answer(option, Instant::now())
                    .map_err(ServiceError::from)
                    .map(|()| {
                        self.refresh_view();
                        self.view.borrow().clone()
                    });
                let _ = reply.send(result);
            }
            PlayerCommand::RequestState { force } => {
                let kind = if force {
                    SyncRequestKind::ForceSync
                } else {
                    SyncRequestKind::RequestState
                };
                self.send_sync_request(kind);
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope, source: Source) {
        let Envelope::State(candidate) = envelope else {
            return;
        };
        if self
            .reconciler
            .offer(candidate, source, Instant::now())
            .is_accepted()
        {
            self.refresh_view();
        }
    }

    fn poll(&mut self) {
        let stored = self.medium.ledger().game_state();
        let verdict = self.reconciler.observe_store(stored, Instant::now());
        if verdict.is_some_and(|verdict| verdict.is_accepted()) {
            debug!(player = self.reconciler.player_name(), "caught up from truth store");
            self.refresh_view();
        }
    }

    fn check_desync(&mut self) {
        let now = Instant::now();
        let recovered = recovery::check(
            &mut self.reconciler,
            self.medium.ledger(),
            self.timings.desync_grace_ms,
            now,
        );
        if recovered.is_some() {
            self.refresh_view();
            self.send_sync_request(SyncRequestKind::RequestState);
            return;
        }

        let silent_since = self.reconciler.last_confirmed().unwrap_or(self.attached_at);
        let limit = match self.reconciler.last_confirmed() {
            None => self.timings.startup_grace,
            Some(_) => self.timings.stale_after,
        };
        if now.saturating_duration_since(silent_since) > limit {
            self.send_sync_request(SyncRequestKind::RequestState);
        }
    }

    fn heartbeat(&mut self) {
        let record = PresenceRecord {
            player_name: self.reconciler.player_name().to_string(),
            game_id: self.reconciler.game_id().to_string(),
            timestamp: self.clock.now_ms(),
            connection_state: self
                .reconciler
                .connection_state(Instant::now(), self.timings.stale_after),
        };
        self.medium.bus().publish(Envelope::Presence(record));
    }

    fn send_sync_request(&self, kind: SyncRequestKind) {
        debug!(player = self.reconciler.player_name(), kind = ?kind, "requesting state");
        self.medium
            .send_upstream(Envelope::SyncRequest(SyncRequest {
                kind,
                player_name: self.reconciler.player_name().to_string(),
                game_id: self.reconciler.game_id().to_string(),
                timestamp: self.clock.now_ms(),
            }));
    }

    fn refresh_view(&self) {
        let next = self
            .reconciler
            .view(Instant::now(), self.timings.stale_after);
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;
    use crate::{
        services::display_service::{DisplayOptions, spawn_display},
        state::game::{Difficulty, GameSettings, Question},
        sync::{
            clock::ManualClock,
            presence::ConnectionState,
            publisher::{AuthorityPublisher, Redundancy},
            snapshot::{GameState, Phase, PhaseState, Priority, Round},
            store::MemoryTruthStore,
            transport::{BroadcastTransport, LocalEventBus, TransportError},
        },
    };

    fn medium() -> Medium {
        Medium::new(
            Arc::new(MemoryTruthStore::new()),
            BroadcastTransport::open(64),
            LocalEventBus::new(),
        )
    }

    fn questions() -> watch::Receiver<Arc<QuestionSet>> {
        let (_tx, rx) = watch::channel(Arc::new(QuestionSet::new(vec![Question {
            text: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option: 1,
            difficulty: Difficulty::Medium,
        }])));
        rx
    }

    fn player(medium: &Medium, name: &str) -> PlayerHandle {
        attach(
            medium.clone(),
            Arc::new(ManualClock::starting_at(0)),
            questions(),
            PlayerOptions {
                player_name: name.into(),
                game_id: "A1B2".into(),
                timings: SyncTimings::default(),
            },
        )
    }

    fn publisher(medium: &Medium) -> AuthorityPublisher {
        AuthorityPublisher::new(
            medium.clone(),
            Arc::new(ManualClock::starting_at(1_000)),
            "A1B2",
            Redundancy::default(),
        )
    }

    fn round(time_left: u32) -> Round {
        Round {
            question_index: 0,
            question_counter: 1,
            time_left,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follows_published_transitions_and_scores() {
        let medium = medium();
        let ada = player(&medium, "ada");
        let mut publisher = publisher(&medium);

        publisher.establish_epoch();
        publisher.publish(PhaseState::Question(round(20)), Priority::NONE);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(ada.view().phase, Some(Phase::Question));
        assert_eq!(ada.view().status, ConnectionState::Connected);

        let view = ada.select_answer(1).await.unwrap();
        assert_eq!(view.selected_option, Some(1));

        publisher.publish(PhaseState::Answer(round(5)), Priority::NONE);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(ada.view().score, 200);

        let last = ada.detach().await;
        assert_eq!(last.score, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn catches_up_from_the_store_without_push_channels() {
        let store: Arc<MemoryTruthStore> = Arc::new(MemoryTruthStore::new());
        let display_side = Medium::new(
            store.clone(),
            Err(TransportError::Unsupported("disabled".into())),
            LocalEventBus::new(),
        );
        let player_side = Medium::new(
            store,
            Err(TransportError::Unsupported("disabled".into())),
            LocalEventBus::new(),
        );
        let mut publisher = publisher(&display_side);
        publisher.publish(PhaseState::Leaderboard(round(10)), Priority::NONE);

        let ada = player(&player_side, "ada");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(ada.view().phase, Some(Phase::Leaderboard));

        publisher.establish_epoch();
        sleep(SyncTimings::default().poll_interval).await;

        assert_eq!(ada.view().phase, Some(Phase::Join));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_only_reader_is_not_blinded_by_another_players_sync_answer() {
        let store: Arc<MemoryTruthStore> = Arc::new(MemoryTruthStore::new());
        let display_side = Medium::new(store.clone(), BroadcastTransport::open(16), LocalEventBus::new());
        let player_side = Medium::new(
            store,
            Err(TransportError::Unsupported("disabled".into())),
            LocalEventBus::new(),
        );
        let mut publisher = publisher(&display_side);
        let join = publisher.establish_epoch();
        publisher.answer_sync(&SyncRequest {
            kind: SyncRequestKind::RequestState,
            player_name: "grace".into(),
            game_id: "A1B2".into(),
            timestamp: 0,
        });

        let ada = player(&player_side, "ada");
        sleep(SyncTimings::default().poll_interval).await;

        assert_eq!(ada.view().phase, Some(Phase::Join));
        assert_eq!(ada.view().status, ConnectionState::Connected);
        assert_eq!(display_side.ledger().game_state().unwrap().timestamp, join);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_lobby_never_looks_like_a_lost_connection() {
        let medium = medium();
        let (questions_tx, questions_rx) = watch::channel(Arc::new(QuestionSet::default()));
        let (display, _task) = spawn_display(
            medium.clone(),
            Arc::new(ManualClock::starting_at(1_000)),
            DisplayOptions {
                game_id: "A1B2".into(),
                redundancy: Redundancy::default(),
                default_settings: GameSettings::default(),
                tick_interval: Duration::from_secs(1),
            },
            questions_tx,
        );
        display.open_lobby(QuestionSet::default(), None).await.unwrap();
        let ada = attach(
            medium.clone(),
            Arc::new(ManualClock::starting_at(1_000)),
            questions_rx,
            PlayerOptions {
                player_name: "ada".into(),
                game_id: "A1B2".into(),
                timings: SyncTimings::default(),
            },
        );
        let mut upstream = medium.subscribe_broadcast().unwrap();

        let stale_after = SyncTimings::default().stale_after;
        let mut statuses = Vec::new();
        for _ in 0..(stale_after.as_secs() * 3) {
            sleep(Duration::from_secs(1)).await;
            statuses.push(ada.view().status);
        }

        assert!(statuses.iter().all(|status| *status == ConnectionState::Connected));
        assert_eq!(ada.view().phase, Some(Phase::Join));
        while let Ok(envelope) = upstream.try_recv() {
            assert!(!matches!(envelope, Envelope::SyncRequest(_)));
        }
        assert!(medium.ledger().game_state().unwrap().target_player.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn local_countdown_ticks_without_network_traffic() {
        let medium = medium();
        let ada = player(&medium, "ada");
        let mut publisher = publisher(&medium);
        publisher.publish(PhaseState::Question(round(20)), Priority::NONE);

        sleep(Duration::from_millis(3_500)).await;

        assert_eq!(ada.view().local_time_left, 17);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_room_broadcast_changes_nothing() {
        let medium = medium();
        let ada = player(&medium, "ada");
        sleep(Duration::from_millis(10)).await;
        let before = ada.view();

        medium.broadcast_envelope(Envelope::State(GameState::new(
            PhaseState::Leaderboard(round(10)),
            99_999,
            "X9Y8",
        )));
        sleep(Duration::from_millis(10)).await;

        assert_eq!(ada.view(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_releases_every_subscription() {
        let medium = medium();
        let baseline = medium.bus().subscriber_count();
        let ada = player(&medium, "ada");
        assert_eq!(medium.bus().subscriber_count(), baseline + 1);

        ada.detach().await;

        assert_eq!(medium.bus().subscriber_count(), baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_are_emitted_on_the_bus() {
        let medium = medium();
        let mut bus = medium.bus().subscribe();
        let _ada = player(&medium, "ada");

        sleep(Duration::from_millis(10)).await;

        let mut heartbeat = None;
        while let Some(envelope) = bus.try_recv() {
            if let Envelope::Presence(record) = envelope {
                heartbeat = Some(record);
            }
        }
        let heartbeat = heartbeat.unwrap();
        assert_eq!(heartbeat.player_name, "ada");
        assert_eq!(heartbeat.connection_state, ConnectionState::Waiting);
    }
}
