//! Push transports connecting execution contexts: the lossy broadcast channel
//! and the reliable, process-scoped local event bus.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::sync::{
    presence::PresenceRecord,
    snapshot::GameState,
    store::{Ledger, TruthStore},
    wire::SyncRequest,
};

/// Everything that travels on the push channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A snapshot emitted by the authority publisher.
    State(GameState),
    /// An advisory resynchronisation request from a player.
    SyncRequest(SyncRequest),
    /// A player heartbeat.
    Presence(PresenceRecord),
}

/// Raised when the broadcast channel cannot be established.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The runtime offers no broadcast channel (disabled or zero capacity).
    #[error("broadcast transport unsupported: {0}")]
    Unsupported(String),
}

/// Fire-and-forget fan-out without persistence.
///
/// Receivers that are not subscribed when a message is sent never see it, and
/// receivers lagging more than `capacity` messages behind lose the overflow.
#[derive(Debug)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastTransport {
    /// Open a channel buffering up to `capacity` messages per receiver.
    pub fn open(capacity: usize) -> Result<Self, TransportError> {
        if capacity == 0 {
            return Err(TransportError::Unsupported(
                "channel capacity must be positive".into(),
            ));
        }
        let (sender, _receiver) = broadcast::channel(capacity);
        Ok(Self { sender })
    }

    /// Register a receiver for subsequent messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Send to whoever is listening right now. Returns how many receivers were reached.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }
}

/// Reliable in-process fan-out. Every live subscription receives every message
/// published after it was created, in publish order.
#[derive(Debug, Clone, Default)]
pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::UnboundedSender<Envelope>>,
}

impl LocalEventBus {
    /// Fresh bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; dropping it unregisters.
    pub fn subscribe(&self) -> BusSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.insert(id, tx);
        BusSubscription {
            id,
            receiver: rx,
            bus: self.inner.clone(),
        }
    }

    /// Deliver to every subscription.
    pub fn publish(&self, envelope: Envelope) {
        let mut closed = Vec::new();
        for entry in self.inner.subscribers.iter() {
            if entry.value().send(envelope.clone()).is_err() {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.inner.subscribers.remove(&id);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Receiving end of a [`LocalEventBus`] subscription.
#[derive(Debug)]
pub struct BusSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    bus: Arc<BusInner>,
}

impl BusSubscription {
    /// Next message; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Next already-delivered message, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
    }
}

/// The shared medium handed to every execution context: truth store, optional
/// broadcast channel and local event bus.
#[derive(Clone)]
pub struct Medium {
    ledger: Ledger,
    broadcast: Option<Arc<BroadcastTransport>>,
    bus: LocalEventBus,
}

impl Medium {
    /// Assemble a medium. A failed broadcast channel degrades the medium to
    /// store and polling only.
    pub fn new(
        store: Arc<dyn TruthStore>,
        broadcast: Result<BroadcastTransport, TransportError>,
        bus: LocalEventBus,
    ) -> Self {
        let broadcast = match broadcast {
            Ok(transport) => Some(Arc::new(transport)),
            Err(err) => {
                warn!(error = %err, "broadcast transport unavailable; relying on truth store polling");
                None
            }
        };
        Self {
            ledger: Ledger::new(store),
            broadcast,
            bus,
        }
    }

    /// Typed truth store access.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Broadcast channel, when it could be opened.
    pub fn broadcast(&self) -> Option<&Arc<BroadcastTransport>> {
        self.broadcast.as_ref()
    }

    /// Process-scoped event bus.
    pub fn bus(&self) -> &LocalEventBus {
        &self.bus
    }

    /// True when running without the broadcast channel.
    pub fn is_degraded(&self) -> bool {
        self.broadcast.is_none()
    }

    /// Subscribe to the broadcast channel if it exists.
    pub fn subscribe_broadcast(&self) -> Option<broadcast::Receiver<Envelope>> {
        self.broadcast.as_ref().map(|transport| transport.subscribe())
    }

    /// Send on the broadcast channel; silently dropped when it is unavailable.
    pub fn broadcast_envelope(&self, envelope: Envelope) {
        if let Some(transport) = &self.broadcast {
            transport.publish(envelope);
        }
    }

    /// Send a player-originated message towards the display: on the broadcast
    /// channel when it exists, otherwise on the local event bus.
    pub fn send_upstream(&self, envelope: Envelope) {
        match &self.broadcast {
            Some(transport) => {
                transport.publish(envelope);
            }
            None => self.bus.publish(envelope),
        }
    }
}

/// Wait for the next broadcast message, skipping lag notifications. Pends
/// forever when there is no receiver so it can sit in a `select!` arm.
pub async fn next_broadcast(receiver: &mut Option<broadcast::Receiver<Envelope>>) -> Envelope {
    loop {
        let Some(rx) = receiver.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(envelope) => return envelope,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "broadcast receiver lagged; missed messages are left to polling");
            }
            Err(broadcast::error::RecvError::Closed) => {
                *receiver = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::PhaseState;

    fn join(timestamp: u64) -> Envelope {
        Envelope::State(GameState::new(PhaseState::Join, timestamp, "A1B2"))
    }

    #[test]
    fn zero_capacity_broadcast_is_unsupported() {
        assert!(matches!(
            BroadcastTransport::open(0),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn late_broadcast_subscriber_misses_earlier_messages() {
        let transport = BroadcastTransport::open(4).unwrap();
        assert_eq!(transport.publish(join(1)), 0);

        let mut rx = transport.subscribe();
        transport.publish(join(2));

        assert_eq!(rx.recv().await.unwrap(), join(2));
    }

    #[tokio::test]
    async fn lagging_receiver_skips_overflow() {
        let transport = BroadcastTransport::open(2).unwrap();
        let mut rx = Some(transport.subscribe());
        for ts in 1..=5 {
            transport.publish(join(ts));
        }

        assert_eq!(next_broadcast(&mut rx).await, join(4));
        assert_eq!(next_broadcast(&mut rx).await, join(5));
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscription_in_order() {
        let bus = LocalEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(join(1));
        bus.publish(join(2));

        assert_eq!(first.recv().await, Some(join(1)));
        assert_eq!(first.recv().await, Some(join(2)));
        assert_eq!(second.recv().await, Some(join(1)));
    }

    #[test]
    fn upstream_messages_fall_back_to_the_bus_without_broadcast() {
        let medium = Medium::new(
            Arc::new(crate::sync::store::MemoryTruthStore::new()),
            Err(TransportError::Unsupported("disabled".into())),
            LocalEventBus::new(),
        );
        let mut bus = medium.bus().subscribe();

        medium.send_upstream(join(7));

        assert!(medium.is_degraded());
        assert_eq!(bus.try_recv(), Some(join(7)));
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        let bus = LocalEventBus::new();
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
