//! In-process bus for auth-state change notifications.
//!
//! The gateway publishes an [`AuthEvent`] whenever its session changes. Listeners call
//! [`AuthEventBus::subscribe`] and get back a [`Subscription`]: events are read with
//! [`Subscription::recv`], and disposing (or dropping) the subscription unregisters it.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::trace;

use crate::auth::session::Session;

/// Kind of auth-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthChangeEvent {
    /// Events after which the gateway holds a usable session.
    pub fn establishes_session(&self) -> bool {
        matches!(self, Self::SignedIn | Self::TokenRefreshed)
    }
}

impl fmt::Display for AuthChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthChangeEvent,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::UnboundedSender<AuthEvent>>,
}

/// Fan-out publisher of [`AuthEvent`]s. Cloning shares the subscriber set.
#[derive(Clone, Default)]
pub struct AuthEventBus {
    inner: Arc<BusInner>,
}

impl AuthEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.insert(id, tx);
        trace!(subscription_id = id, "Auth event subscriber registered");

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live subscriber, returning how many received it.
    pub fn publish(&self, event: AuthEvent) -> usize {
        let kind = event.kind;
        let mut delivered = 0;
        self.inner.subscribers.retain(|_, tx| {
            let ok = tx.send(event.clone()).is_ok();
            delivered += usize::from(ok);
            ok
        });
        trace!(event = %kind, delivered, "Auth event published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl fmt::Debug for AuthEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle for one registered listener. Unsubscribes when disposed or dropped.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus has gone away.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
            trace!(subscription_id = self.id, "Auth event subscriber disposed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = AuthEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(AuthEvent::new(AuthChangeEvent::SignedIn, None)), 2);

        assert_eq!(first.recv().await.unwrap().kind, AuthChangeEvent::SignedIn);
        assert_eq!(second.recv().await.unwrap().kind, AuthChangeEvent::SignedIn);
    }

    #[tokio::test]
    async fn test_dispose_unsubscribes() {
        let bus = AuthEventBus::new();
        let subscription = bus.subscribe();
        let _other = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        subscription.dispose();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(AuthEvent::new(AuthChangeEvent::SignedOut, None)), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = AuthEventBus::new();
        {
            let _subscription = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(AuthEvent::new(AuthChangeEvent::SignedIn, None)), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = AuthEventBus::new();
        let mut subscription = bus.subscribe();
        drop(bus);
        assert!(subscription.recv().await.is_none());
    }

    #[test]
    fn test_event_names_match_wire_format() {
        assert_eq!(AuthChangeEvent::TokenRefreshed.to_string(), "TOKEN_REFRESHED");
        assert_eq!(
            serde_json::to_string(&AuthChangeEvent::SignedIn).unwrap(),
            "\"SIGNED_IN\""
        );
        assert!(AuthChangeEvent::SignedIn.establishes_session());
        assert!(AuthChangeEvent::TokenRefreshed.establishes_session());
        assert!(!AuthChangeEvent::SignedOut.establishes_session());
    }
}
