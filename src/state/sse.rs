use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Outcome of checking a token presented on an admin route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Matches the token held by the live admin stream.
    Valid,
    /// An admin stream is live but holds another token.
    Mismatch,
    /// No admin stream is connected.
    Unclaimed,
}

/// SSE channels owned by the host: the public snapshot mirror and the admin feed.
pub struct SseChannels {
    public: SseHub,
    admin: AdminChannel,
}

impl SseChannels {
    /// Build both hubs with per-stream capacities.
    pub fn new(public_capacity: usize, admin_capacity: usize) -> Self {
        Self {
            public: SseHub::new(public_capacity),
            admin: AdminChannel {
                hub: SseHub::new(admin_capacity),
                token: Mutex::new(None),
            },
        }
    }

    /// Hub mirroring every published snapshot.
    pub fn public(&self) -> &SseHub {
        &self.public
    }

    /// Presence, attachment and score feed for the host.
    pub fn admin(&self) -> &AdminChannel {
        &self.admin
    }
}

/// Admin feed plus the token of the single stream allowed to consume it.
pub struct AdminChannel {
    hub: SseHub,
    token: Mutex<Option<String>>,
}

impl AdminChannel {
    /// Hub carrying admin-only events.
    pub fn hub(&self) -> &SseHub {
        &self.hub
    }

    /// Issue a fresh token, or `None` while another admin stream holds one.
    pub async fn claim(&self) -> Option<String> {
        let mut guard = self.token.lock().await;
        if guard.is_some() {
            return None;
        }
        let token = Uuid::new_v4().simple().to_string();
        *guard = Some(token.clone());
        Some(token)
    }

    /// Forget the current token once its stream disconnects.
    pub async fn release(&self) {
        self.token.lock().await.take();
    }

    /// Compare `provided` with the live token.
    pub async fn check(&self, provided: &str) -> TokenCheck {
        match self.token.lock().await.as_deref() {
            Some(token) if token == provided => TokenCheck::Valid,
            Some(_) => TokenCheck::Mismatch,
            None => TokenCheck::Unclaimed,
        }
    }
}

/// Cloneable handle over a Tokio broadcast channel of SSE events.
#[derive(Clone)]
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers; having none is fine.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of connected SSE clients.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_clones_share_subscribers() {
        let hub = SseHub::new(4);
        let mut receiver = hub.subscribe();

        hub.clone()
            .broadcast(ServerEvent::new(Some("info".into()), "hello".into()));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("info"));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn admin_token_is_exclusive_until_released() {
        let channels = SseChannels::new(4, 4);
        let admin = channels.admin();
        assert_eq!(admin.check("anything").await, TokenCheck::Unclaimed);

        let token = admin.claim().await.unwrap();
        assert_eq!(admin.claim().await, None);
        assert_eq!(admin.check(&token).await, TokenCheck::Valid);
        assert_eq!(admin.check("stale").await, TokenCheck::Mismatch);

        admin.release().await;
        assert!(admin.claim().await.is_some());
    }
}
