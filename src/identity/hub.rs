//! Per-client session cache and change bus.
//!
//! A `SessionHub` is the single source of truth for "is this client signed in".
//! Screens read `current()` instead of polling the provider, and anything that
//! mirrors auth state (header buttons, the `/auth/events` stream) holds a
//! [`SessionSubscription`] for as long as it cares. Dropping the subscription,
//! or calling [`SessionSubscription::unsubscribe`], detaches it.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::model::Session;
use crate::tprintln;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
    UserUpdated,
}

pub struct SessionHub {
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionHub {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { current: RwLock::new(None), events }
    }
}

impl SessionHub {
    pub fn new() -> Self { Self::default() }

    pub fn with_session(session: Session) -> Self {
        let hub = Self::default();
        *hub.current.write() = Some(session);
        hub
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn set(&self, session: Session) {
        tprintln!("hub.set identity={}", session.identity_id);
        *self.current.write() = Some(session.clone());
        self.publish(SessionEvent::SignedIn(session));
    }

    /// Drop the cached session. Emits `SignedOut` only when one was present.
    pub fn clear(&self) -> Option<Session> {
        let prev = self.current.write().take();
        if prev.is_some() {
            self.publish(SessionEvent::SignedOut);
        }
        prev
    }

    pub fn notify_user_updated(&self) {
        self.publish(SessionEvent::UserUpdated);
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription { rx: self.events.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is the common case outside of live views.
        let _ = self.events.send(event);
    }
}

pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// Next event, or `None` once the hub is gone. A receiver that fell behind
    /// skips ahead to the oldest event still buffered.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(target: "auth", skipped, "session subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
