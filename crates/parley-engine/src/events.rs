//! Engine event types

use parley_api::Session;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeFailure;
use crate::message::Message;

/// Events broadcast by the engine whenever its state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The session directory was reloaded or edited
    SessionsUpdated { sessions: Vec<Session> },

    /// A different session (or the pending new session) became active; the
    /// timeline was cleared
    SessionSelected { session_id: Option<String> },

    /// The pending session received its server-assigned id
    SessionAssigned { session_id: String },

    /// A message was added at the tail
    MessageAppended { message: Message },

    /// The in-flight message changed; `delta` is the appended text, if any
    MessageUpdated {
        message_id: String,
        delta: Option<String>,
    },

    /// The in-flight message is final
    MessageFinalized {
        message: Message,
        failure: Option<ExchangeFailure>,
    },

    /// Older history was inserted at the head
    HistoryPrepended {
        session_id: String,
        count: usize,
        exhausted: bool,
    },

    /// A message was scrolled into view and highlighted
    MessageFocused { message_id: String },

    /// The viewport moved
    Scrolled { scroll_top: f64 },
}

impl EngineEvent {
    /// Id of the message this event is about, if any
    pub fn message_id(&self) -> Option<&str> {
        match self {
            EngineEvent::MessageAppended { message }
            | EngineEvent::MessageFinalized { message, .. } => Some(&message.id),
            EngineEvent::MessageUpdated { message_id, .. }
            | EngineEvent::MessageFocused { message_id } => Some(message_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::MessageUpdated {
            message_id: "m1".into(),
            delta: Some("hi".into()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "message_updated", "message_id": "m1", "delta": "hi"})
        );
        assert_eq!(event.message_id(), Some("m1"));
    }

    #[test]
    fn test_finalized_carries_failure() {
        let event = EngineEvent::MessageFinalized {
            message: Message::assistant_placeholder(),
            failure: Some(ExchangeFailure::Timeout),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["failure"], serde_json::json!({"kind": "timeout"}));
        assert!(EngineEvent::Scrolled { scroll_top: 0.0 }.message_id().is_none());
    }
}
