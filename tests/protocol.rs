//! Player contexts reading a truth store shared with a display in another
//! process: no broadcast channel and no common event bus.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use trivia_sync::{
    config::SyncTimings,
    services::player_service::{self, PlayerHandle, PlayerOptions},
    state::game::QuestionSet,
    sync::{
        clock::ManualClock,
        presence::ConnectionState,
        snapshot::{GameState, Phase, PhaseState, Round},
        store::{Ledger, MemoryTruthStore, TruthStore},
        transport::{LocalEventBus, Medium, TransportError},
    },
};

fn isolated_medium(store: Arc<dyn TruthStore>) -> Medium {
    Medium::new(
        store,
        Err(TransportError::Unsupported("no broadcast in this process".into())),
        LocalEventBus::new(),
    )
}

fn attach(medium: &Medium, name: &str) -> PlayerHandle {
    let (_questions_tx, questions) = watch::channel(Arc::new(QuestionSet::default()));
    player_service::attach(
        medium.clone(),
        Arc::new(ManualClock::starting_at(0)),
        questions,
        PlayerOptions {
            player_name: name.into(),
            game_id: "A1B2".into(),
            timings: SyncTimings::default(),
        },
    )
}

fn round(question_counter: u32, time_left: u32) -> Round {
    Round {
        question_index: 0,
        question_counter,
        time_left,
    }
}

#[tokio::test(start_paused = true)]
async fn missed_question_is_recovered_within_one_desync_check() {
    let store: Arc<dyn TruthStore> = Arc::new(MemoryTruthStore::new());
    let ledger = Ledger::new(store.clone());
    let medium = isolated_medium(store);

    ledger
        .write_game_state(&GameState::new(
            PhaseState::Intermission(round(3, 10)),
            5_000,
            "A1B2",
        ))
        .unwrap();
    let ada = attach(&medium, "ada");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(ada.view().phase, Some(Phase::Intermission));

    // A question stamped by a lagging clock never outranks the intermission.
    ledger
        .write_game_state(&GameState::new(
            PhaseState::Question(round(4, 20)),
            4_000,
            "A1B2",
        ))
        .unwrap();
    sleep(SyncTimings::default().poll_interval).await;
    assert_eq!(ada.view().phase, Some(Phase::Intermission));

    sleep(SyncTimings::default().desync_check_interval).await;
    let view = ada.view();
    assert_eq!(view.phase, Some(Phase::Question));
    assert_eq!(view.question_counter, Some(4));

    ada.detach().await;
}

#[tokio::test(start_paused = true)]
async fn another_room_in_the_store_is_never_adopted() {
    let store: Arc<dyn TruthStore> = Arc::new(MemoryTruthStore::new());
    let ledger = Ledger::new(store.clone());
    let medium = isolated_medium(store);

    let foreign = GameState::new(PhaseState::Question(round(1, 20)), 90_000, "X9Y8");
    ledger.write_game_state(&foreign).unwrap();
    ledger.write_display_truth(&foreign).unwrap();

    let ada = attach(&medium, "ada");
    sleep(Duration::from_secs(12)).await;

    let view = ada.view();
    assert_eq!(view.phase, None);
    assert_eq!(view.status, ConnectionState::Waiting);
    assert!(!view.connected);
}

#[tokio::test(start_paused = true)]
async fn display_truth_is_adopted_when_the_store_lags_far_behind() {
    let store: Arc<dyn TruthStore> = Arc::new(MemoryTruthStore::new());
    let ledger = Ledger::new(store.clone());
    let medium = isolated_medium(store);

    ledger
        .write_game_state(&GameState::new(
            PhaseState::Leaderboard(round(5, 10)),
            1_000,
            "A1B2",
        ))
        .unwrap();
    let ada = attach(&medium, "ada");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(ada.view().phase, Some(Phase::Leaderboard));

    ledger
        .write_display_truth(&GameState::new(PhaseState::Join, 20_000, "A1B2"))
        .unwrap();
    sleep(SyncTimings::default().desync_check_interval).await;

    assert_eq!(ada.view().phase, Some(Phase::Join));
    assert_eq!(ada.view().score, 0);
}
