//! Session lifecycle events
//!
//! An explicit observer abstraction: subscribers get a broadcast receiver,
//! emitters never know who is listening. No global dispatch.

use tokio::sync::broadcast;

use scorelink_core::types::SessionId;

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Events emitted by the session manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { session_id: SessionId },
    Joined { session_id: SessionId },
    Left { session_id: SessionId },
    /// The live-sync participant set changed.
    ParticipantsChanged,
    /// The signaling bridge gave up reconnecting to the relay.
    BridgeError { message: String },
}

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

/// Broadcast bus for session events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Emit to all current subscribers; emitting with none is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(SessionEvent::ParticipantsChanged);

        assert!(matches!(
            first.recv().await.unwrap(),
            SessionEvent::ParticipantsChanged
        ));
        assert!(matches!(
            second.recv().await.unwrap(),
            SessionEvent::ParticipantsChanged
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(SessionEvent::ParticipantsChanged);
    }
}
