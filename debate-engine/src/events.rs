//! Progress events published by the controllers.
//!
//! Uses Tokio broadcast channels; publishing with no subscribers is fine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::report::Report;
use crate::session::{DebateMode, SessionStatus, Speaker};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Everything a controller reports while driving a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: String,
        mode: DebateMode,
        timestamp: DateTime<Utc>,
    },
    Resumed {
        session_id: String,
        mode: DebateMode,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
    },
    RoundAdvanced {
        session_id: String,
        round: u32,
        timestamp: DateTime<Utc>,
    },
    NodeEntered {
        session_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    OptionSelected {
        session_id: String,
        node_id: String,
        option_id: String,
        timestamp: DateTime<Utc>,
    },
    Backtracked {
        session_id: String,
        history_len: usize,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    MessageAppended {
        session_id: String,
        speaker: Speaker,
        round: u32,
        timestamp: DateTime<Utc>,
    },
    TurnTimedOut {
        session_id: String,
        round: u32,
        timestamp: DateTime<Utc>,
    },
    GenerationFailed {
        session_id: String,
        round: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Completed {
        session_id: String,
        report: Option<Report>,
        timestamp: DateTime<Utc>,
    },
    Reset {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. }
            | Self::Resumed { session_id, .. }
            | Self::RoundAdvanced { session_id, .. }
            | Self::NodeEntered { session_id, .. }
            | Self::OptionSelected { session_id, .. }
            | Self::Backtracked { session_id, .. }
            | Self::MessageAppended { session_id, .. }
            | Self::TurnTimedOut { session_id, .. }
            | Self::GenerationFailed { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Reset { session_id, .. } => session_id,
        }
    }

    /// Short event type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Resumed { .. } => "resumed",
            Self::RoundAdvanced { .. } => "round_advanced",
            Self::NodeEntered { .. } => "node_entered",
            Self::OptionSelected { .. } => "option_selected",
            Self::Backtracked { .. } => "backtracked",
            Self::MessageAppended { .. } => "message_appended",
            Self::TurnTimedOut { .. } => "turn_timed_out",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::Completed { .. } => "completed",
            Self::Reset { .. } => "reset",
        }
    }
}

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(SessionEvent::RoundAdvanced {
            session_id: "s1".into(),
            round: 2,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "s1");
        assert_eq!(event.event_type(), "round_advanced");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(SessionEvent::Reset {
            session_id: "s1".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = SessionEvent::TurnTimedOut {
            session_id: "s1".into(),
            round: 1,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_timed_out");
        assert_eq!(json["round"], 1);
    }
}
