//! Session → UI event bus.
//!
//! A single bounded mailbox. The core is the only producer family and the
//! UI is the sole consumer. Emission never blocks I/O: when the mailbox is
//! full the event is logged and dropped.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use confab_core::SessionEvent;

/// Default mailbox capacity (anticipated burst × 4).
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Cloneable sending end of the event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with the given mailbox capacity; returns the UI's
    /// receiving end alongside.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Emit an event, dropping it if the UI cannot keep up.
    pub fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "UI event mailbox full — dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("UI event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (bus, mut rx) = EventBus::new(8);
        bus.emit(SessionEvent::TextDelta("a".into()));
        bus.emit(SessionEvent::TextDelta("b".into()));
        assert!(matches!(rx.recv().await, Some(SessionEvent::TextDelta(t)) if t == "a"));
        assert!(matches!(rx.recv().await, Some(SessionEvent::TextDelta(t)) if t == "b"));
    }

    #[tokio::test]
    async fn full_mailbox_drops_instead_of_blocking() {
        let (bus, mut rx) = EventBus::new(1);
        bus.emit(SessionEvent::TurnStarted);
        // Mailbox is full; this must return immediately and drop.
        bus.emit(SessionEvent::TurnCompleted);
        assert!(matches!(rx.recv().await, Some(SessionEvent::TurnStarted)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_receiver_is_tolerated() {
        let (bus, rx) = EventBus::new(4);
        drop(rx);
        bus.emit(SessionEvent::TurnStarted); // must not panic
    }
}
