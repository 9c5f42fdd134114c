//! Session lifecycle notifications
//!
//! The request layer never navigates anywhere itself. When a refresh window
//! fails it broadcasts `SessionEvent::Expired`; the application subscribes
//! and routes the user back to its login flow.

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::RefreshFailure;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh window failed and the stored credentials were cleared.
    Expired { reason: RefreshFailure },
    /// The application logged out.
    LoggedOut,
}

/// Broadcast channel for `SessionEvent`s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. With no subscribers the event is dropped.
    pub fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            debug!("session event dropped, no subscribers");
        }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
