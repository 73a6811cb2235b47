/// Question sets, settings and room codes.
pub mod game;
mod sse;
/// Display-side game phase transitions.
pub mod state_machine;

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use tracing::info;

use crate::{
    config::AppConfig,
    dto::admin::ScoreEntry,
    error::ServiceError,
    services::{
        display_service::{self, DisplayHandle, DisplayOptions},
        player_service::{self, PlayerHandle, PlayerOptions},
        presence_service, sse_service,
    },
    state::game::{QuestionSet, generate_room_code},
    sync::{
        clock::Clock,
        presence::PresenceTracker,
        reconciler::PlayerView,
        snapshot::GameId,
        store::TruthStore,
        transport::{BroadcastTransport, LocalEventBus, Medium, TransportError},
    },
};

pub use self::sse::{AdminChannel, SseHub, TokenCheck};
use self::sse::SseChannels;

/// Cheaply clonable handle to the application state.
pub type SharedState = Arc<AppState>;

/// Central application state: the shared medium, the display context and the
/// registry of attached player contexts.
pub struct AppState {
    config: Arc<AppConfig>,
    game_id: GameId,
    clock: Arc<dyn Clock>,
    medium: Medium,
    display: DisplayHandle,
    questions: watch::Receiver<Arc<QuestionSet>>,
    presence: Arc<RwLock<PresenceTracker>>,
    players: DashMap<String, watch::Receiver<PlayerView>>,
    departed: DashMap<String, u32>,
    sse: SseChannels,
    tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Build the medium, spawn the display context and its listeners, and wrap
    /// everything in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig, store: Arc<dyn TruthStore>, clock: Arc<dyn Clock>) -> SharedState {
        let game_id = config.room_code.clone().unwrap_or_else(generate_room_code);
        let broadcast = if config.broadcast_enabled {
            BroadcastTransport::open(config.broadcast_capacity)
        } else {
            Err(TransportError::Unsupported("disabled by configuration".into()))
        };
        let medium = Medium::new(store, broadcast, LocalEventBus::new());
        let sse = SseChannels::new(64, 64);

        let (questions_tx, questions) = watch::channel(Arc::new(QuestionSet::default()));
        let (display, display_task) = display_service::spawn_display(
            medium.clone(),
            clock.clone(),
            DisplayOptions {
                game_id: game_id.clone(),
                redundancy: config.join_redundancy,
                default_settings: config.default_settings,
                tick_interval: config.timings.tick_interval,
            },
            questions_tx,
        );

        let presence = Arc::new(RwLock::new(PresenceTracker::new(
            game_id.clone(),
            config.timings.presence_window,
        )));
        let presence_task = presence_service::spawn_presence_listener(
            medium.bus(),
            presence.clone(),
            sse.admin().hub().clone(),
            config.timings.heartbeat_interval,
        );
        let mirror_task = sse_service::spawn_public_mirror(medium.bus(), sse.public().clone());

        info!(game_id = %game_id, degraded = medium.is_degraded(), "room ready");
        Arc::new(Self {
            config: Arc::new(config),
            game_id,
            clock,
            medium,
            display,
            questions,
            presence,
            players: DashMap::new(),
            departed: DashMap::new(),
            sse,
            tasks: vec![display_task, presence_task, mirror_task],
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Room code served by this host.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Wall clock used for protocol timestamps.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Shared truth store and push channels.
    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Handle driving the display context.
    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    /// True when the broadcast transport is unavailable.
    pub fn is_degraded(&self) -> bool {
        self.medium.is_degraded()
    }

    /// Presence aggregate maintained by the display listener.
    pub fn presence(&self) -> &RwLock<PresenceTracker> {
        &self.presence
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin().hub()
    }

    /// Admin feed and the token guarding admin routes.
    pub fn admin_channel(&self) -> &AdminChannel {
        self.sse.admin()
    }

    /// Attach a player context for `player_name`. Names are unique among
    /// attached players; a departed player may attach again.
    pub fn attach_player(&self, player_name: &str) -> Result<PlayerHandle, ServiceError> {
        match self.players.entry(player_name.to_string()) {
            Entry::Occupied(_) => Err(ServiceError::DuplicatePlayer(player_name.to_string())),
            Entry::Vacant(slot) => {
                let handle = player_service::attach(
                    self.medium.clone(),
                    self.clock.clone(),
                    self.questions.clone(),
                    PlayerOptions {
                        player_name: player_name.to_string(),
                        game_id: self.game_id.clone(),
                        timings: self.config.timings,
                    },
                );
                slot.insert(handle.subscribe());
                self.departed.remove(player_name);
                Ok(handle)
            }
        }
    }

    /// Tear a player context down and keep its final score.
    pub async fn detach_player(&self, handle: PlayerHandle) -> PlayerView {
        let name = handle.player_name().to_string();
        let view = handle.detach().await;
        self.players.remove(&name);
        self.departed.insert(name, view.score);
        view
    }

    /// Views of every attached player.
    pub fn player_views(&self) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|entry| entry.value().borrow().clone())
            .collect()
    }

    /// Scores of attached and departed players.
    pub fn scores(&self) -> Vec<ScoreEntry> {
        let attached = self.player_views().into_iter().map(|view| ScoreEntry {
            player_name: view.player_name,
            score: view.score,
            attached: true,
        });
        let departed = self.departed.iter().map(|entry| ScoreEntry {
            player_name: entry.key().clone(),
            score: *entry.value(),
            attached: false,
        });
        attached.chain(departed).collect()
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        state::game::{Difficulty, Question},
        sync::{clock::SystemClock, snapshot::Phase, store::MemoryTruthStore},
    };

    fn room(broadcast_enabled: bool) -> SharedState {
        let config = AppConfig {
            room_code: Some("A1B2".into()),
            broadcast_enabled,
            ..AppConfig::default()
        };
        AppState::new(config, Arc::new(MemoryTruthStore::new()), Arc::new(SystemClock))
    }

    fn questions() -> QuestionSet {
        QuestionSet::new(vec![Question {
            text: "Capital of France?".into(),
            options: vec!["Lyon".into(), "Paris".into(), "Nice".into()],
            correct_option: 1,
            difficulty: Difficulty::Hard,
        }])
    }

    #[tokio::test(start_paused = true)]
    async fn players_follow_the_display_without_broadcast() {
        let state = room(false);
        assert!(state.is_degraded());
        let ada = state.attach_player("ada").unwrap();

        state.display().open_lobby(questions(), None).await.unwrap();
        state.display().begin().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(ada.view().phase, Some(Phase::Question));

        ada.select_answer(1).await.unwrap();
        state.display().skip().await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(ada.view().phase, Some(Phase::Answer));
        assert_eq!(ada.view().score, 300);
        assert_eq!(state.scores()[0].score, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn names_are_unique_while_attached() {
        let state = room(true);
        let ada = state.attach_player("ada").unwrap();

        assert!(matches!(
            state.attach_player("ada"),
            Err(ServiceError::DuplicatePlayer(_))
        ));

        let last = state.detach_player(ada).await;
        assert_eq!(state.player_views().len(), 0);
        assert_eq!(
            state.scores(),
            vec![ScoreEntry {
                player_name: "ada".into(),
                score: last.score,
                attached: false,
            }]
        );
        assert!(state.attach_player("ada").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn detaching_leaves_no_listener_behind() {
        let state = room(true);
        let baseline = state.medium().bus().subscriber_count();

        let ada = state.attach_player("ada").unwrap();
        let grace = state.attach_player("grace").unwrap();
        assert_eq!(state.medium().bus().subscriber_count(), baseline + 2);

        state.detach_player(ada).await;
        state.detach_player(grace).await;

        assert_eq!(state.medium().bus().subscriber_count(), baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_reach_the_presence_tracker() {
        let state = room(true);
        let _ada = state.attach_player("ada").unwrap();

        sleep(Duration::from_millis(10)).await;

        let active = state.presence().read().await.active(tokio::time::Instant::now());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].player_name, "ada");
    }
}
