//! Display-side listener aggregating player heartbeats.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::debug;

use crate::{
    services::sse_events,
    state::SseHub,
    sync::{
        presence::PresenceTracker,
        transport::{Envelope, LocalEventBus},
    },
};

/// Listen for heartbeats on `bus`, keep `tracker` current and notify admins
/// whenever the set of active players changes.
pub fn spawn_presence_listener(
    bus: &LocalEventBus,
    tracker: Arc<RwLock<PresenceTracker>>,
    admin: SseHub,
    prune_every: Duration,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        let mut prune = interval(prune_every);
        prune.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                envelope = subscription.recv() => match envelope {
                    Some(Envelope::Presence(record)) => {
                        let now = Instant::now();
                        let mut tracker = tracker.write().await;
                        if tracker.record(&record, now) {
                            debug!(player = %record.player_name, "player became active");
                            sse_events::broadcast_presence(&admin, tracker.active(now));
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = prune.tick() => {
                    let now = Instant::now();
                    let mut tracker = tracker.write().await;
                    if tracker.prune(now) > 0 {
                        sse_events::broadcast_presence(&admin, tracker.active(now));
                    }
                }
            }
        }
    })
}
