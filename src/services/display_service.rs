//! The display context: drives the game cadence and owns the authority publisher.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    state::{
        game::{GameSettings, QuestionSet},
        state_machine::{GameEvent, GamePhase, GameStateMachine},
    },
    sync::{
        clock::Clock,
        publisher::{AuthorityPublisher, Redundancy},
        snapshot::{GameId, GameState, PhaseState, Priority},
        transport::{BusSubscription, Envelope, Medium, next_broadcast},
    },
};

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Requests handled by the display task.
#[derive(Debug)]
pub enum DisplayCommand {
    /// Start a new epoch with the given questions.
    OpenLobby {
        questions: QuestionSet,
        settings: Option<GameSettings>,
        reply: Reply<GameState>,
    },
    /// Apply a host event.
    Event {
        event: GameEvent,
        reply: Reply<GameState>,
    },
    /// Last published snapshot and driver phase.
    Current { reply: Reply<Option<GameState>> },
}

/// Everything the display context needs to run.
#[derive(Clone)]
pub struct DisplayOptions {
    /// Room the display is authoritative for.
    pub game_id: GameId,
    /// Join re-emission policy.
    pub redundancy: Redundancy,
    /// Settings used when a lobby is opened without any.
    pub default_settings: GameSettings,
    /// Cadence of deadline checks and state refreshes.
    pub tick_interval: Duration,
}

/// Cheap handle used by HTTP handlers to drive the display.
#[derive(Clone, Debug)]
pub struct DisplayHandle {
    commands: mpsc::Sender<DisplayCommand>,
}

impl DisplayHandle {
    /// Open a lobby (new epoch) with the given question set.
    pub async fn open_lobby(
        &self,
        questions: QuestionSet,
        settings: Option<GameSettings>,
    ) -> Result<GameState, ServiceError> {
        self.request(|reply| DisplayCommand::OpenLobby {
            questions,
            settings,
            reply,
        })
        .await
    }

    /// Start the first question.
    pub async fn begin(&self) -> Result<GameState, ServiceError> {
        self.event(GameEvent::Begin).await
    }

    /// End the current timed phase now.
    pub async fn skip(&self) -> Result<GameState, ServiceError> {
        self.event(GameEvent::Skip).await
    }

    /// Publish the final leaderboard and stop driving phases.
    pub async fn stop(&self) -> Result<GameState, ServiceError> {
        self.event(GameEvent::Stop).await
    }

    /// Last snapshot the display published.
    pub async fn current(&self) -> Result<Option<GameState>, ServiceError> {
        self.request(|reply| DisplayCommand::Current { reply }).await
    }

    async fn event(&self, event: GameEvent) -> Result<GameState, ServiceError> {
        self.request(|reply| DisplayCommand::Event { event, reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DisplayCommand,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ServiceError::ContextGone("display"))?;
        response
            .await
            .map_err(|_| ServiceError::ContextGone("display"))?
    }
}

/// Spawn the display context. The returned task runs until every handle is dropped.
pub fn spawn_display(
    medium: Medium,
    clock: Arc<dyn Clock>,
    options: DisplayOptions,
    questions: watch::Sender<Arc<QuestionSet>>,
) -> (DisplayHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let bus = medium.bus().subscribe();
    let broadcast = medium.subscribe_broadcast();
    let question_count = questions.borrow().len();
    let driver = DisplayDriver {
        publisher: AuthorityPublisher::new(
            medium,
            clock,
            options.game_id.clone(),
            options.redundancy,
        ),
        machine: GameStateMachine::new(options.default_settings, question_count),
        deadline: None,
        default_settings: options.default_settings,
        questions,
    };
    let task = tokio::spawn(driver.run(receiver, bus, broadcast, options.tick_interval));
    (DisplayHandle { commands }, task)
}

struct DisplayDriver {
    publisher: AuthorityPublisher,
    machine: GameStateMachine,
    deadline: Option<Instant>,
    default_settings: GameSettings,
    questions: watch::Sender<Arc<QuestionSet>>,
}

impl DisplayDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<DisplayCommand>,
        mut bus: BusSubscription,
        mut broadcast: Option<tokio::sync::broadcast::Receiver<Envelope>>,
        tick: Duration,
    ) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(game_id = %self.publisher.game_id(), "display context started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => self.tick(Instant::now()),
                Some(envelope) = bus.recv() => self.on_envelope(envelope),
                envelope = next_broadcast(&mut broadcast) => self.on_envelope(envelope),
            }
        }

        info!(game_id = %self.publisher.game_id(), "display context stopped");
    }

    fn handle(&mut self, command: DisplayCommand, now: Instant) {
        match command {
            DisplayCommand::OpenLobby {
                questions,
                settings,
                reply,
            } => {
                let settings = settings.unwrap_or(self.default_settings);
                self.machine.reconfigure(settings, questions.len());
                self.questions.send_replace(Arc::new(questions));
                let _ = reply.send(self.apply(GameEvent::OpenLobby, now));
            }
            DisplayCommand::Event { event, reply } => {
                let _ = reply.send(self.apply(event, now));
            }
            DisplayCommand::Current { reply } => {
                let _ = reply.send(Ok(self.publisher.current().cloned()));
            }
        }
    }

    fn apply(&mut self, event: GameEvent, now: Instant) -> Result<GameState, ServiceError> {
        let next = self.machine.apply(event)?;
        debug!(event = ?event, phase = ?next, "display transition");

        match &next {
            GamePhase::Running(PhaseState::Join) => {
                self.deadline = None;
                self.publisher.establish_epoch();
            }
            GamePhase::Running(phase) => {
                self.deadline = Some(now + Duration::from_secs(u64::from(phase.time_left())));
                self.publisher.publish(phase.clone(), Priority::NONE);
            }
            GamePhase::Finished(phase) => {
                self.deadline = None;
                self.publisher.publish(phase.clone(), Priority::NONE);
            }
            GamePhase::Idle => {}
        }

        self.publisher
            .current()
            .cloned()
            .ok_or_else(|| ServiceError::InvalidState("nothing has been published".into()))
    }

    fn tick(&mut self, now: Instant) {
        let GamePhase::Running(phase) = self.machine.phase().clone() else {
            return;
        };
        let Some(deadline) = self.deadline else {
            // The lobby has no deadline; restate it so idle players stay live.
            self.publisher.publish(phase, Priority::NONE);
            return;
        };

        let remaining = deadline.saturating_duration_since(now).as_millis().div_ceil(1_000) as u32;
        if remaining == 0 {
            if let Err(err) = self.apply(GameEvent::TimerElapsed, now) {
                warn!(error = %err, "failed to advance phase on deadline");
            }
            return;
        }

        let refreshed = phase.with_time_left(remaining);
        self.publisher.publish(refreshed, Priority::NONE);
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        if let Envelope::SyncRequest(request) = envelope {
            if self.publisher.answer_sync(&request).is_none() {
                debug!(player = %request.player_name, game_id = %request.game_id, "sync request ignored");
            }
        }
    }
}
