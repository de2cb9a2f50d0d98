//! Timeline message and the partial updates applied to it

use parley_api::{HistoryRecord, ResponseMetadata, Role};
use serde::{Deserialize, Serialize};

/// A single entry of the conversation timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            intent: None,
            latency_ms: None,
            ttft_ms: None,
            metadata: None,
            is_error: false,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an empty assistant message to be filled by a reply
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    /// Convert a stored history record; records with roles the timeline does
    /// not show are dropped.
    pub fn from_history(record: HistoryRecord) -> Option<Self> {
        let Some(role) = Role::parse(&record.role) else {
            tracing::debug!("Skipping history record with role {:?}", record.role);
            return None;
        };

        let timestamp = record
            .timestamp
            .as_ref()
            .and_then(|t| t.to_millis())
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let intent = record
            .intent
            .or_else(|| record.metadata.as_ref().and_then(|m| m.route.clone()));
        let latency_ms = record
            .latency
            .filter(|ms| *ms >= 0.0)
            .map(|ms| ms.round() as u64)
            .or_else(|| record.metadata.as_ref().and_then(|m| m.total_latency_ms()));

        Some(Self {
            id: record
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role,
            content: record.content,
            timestamp,
            intent,
            latency_ms,
            ttft_ms: None,
            metadata: record.metadata,
            is_error: false,
        })
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Merge a patch into this message.
    ///
    /// Content is replaced (if given) before the delta is appended. TTFT is
    /// write-once. Metadata replaces the previous object and refreshes the
    /// intent from its route.
    pub fn apply(&mut self, patch: &MessagePatch) {
        if let Some(content) = &patch.replace_content {
            self.content.clone_from(content);
        }
        if let Some(delta) = &patch.append {
            self.content.push_str(delta);
        }
        if self.ttft_ms.is_none() {
            self.ttft_ms = patch.ttft_ms;
        }
        if let Some(metadata) = &patch.metadata {
            self.intent.clone_from(&metadata.route);
            self.metadata = Some(metadata.clone());
        }
        if let Some(latency) = patch.latency_ms {
            self.latency_ms = Some(latency);
        }
        if patch.is_error {
            self.is_error = true;
        }
    }
}

/// Fields to merge into the in-flight assistant message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    /// Text appended to the content
    pub append: Option<String>,
    /// Replacement for the whole content, applied before `append`
    pub replace_content: Option<String>,
    pub ttft_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub metadata: Option<ResponseMetadata>,
    pub is_error: bool,
}

impl MessagePatch {
    /// Append a content delta
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            append: Some(text.into()),
            ..Default::default()
        }
    }

    /// Whether applying the patch would change nothing
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_api::{LatencyInfo, Timestamp};

    fn record(role: &str, content: &str) -> HistoryRecord {
        HistoryRecord {
            id: None,
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Some(Timestamp::Text("2024-05-01T10:20:30Z".into())),
            intent: None,
            latency: None,
            metadata: None,
        }
    }

    #[test]
    fn test_from_history_assigns_id_and_timestamp() {
        let msg = Message::from_history(record("user", "hello")).unwrap();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.timestamp, 1_714_558_830_000);
    }

    #[test]
    fn test_from_history_keeps_server_id() {
        let mut rec = record("assistant", "hi");
        rec.id = Some("m-7".into());
        assert_eq!(Message::from_history(rec).unwrap().id, "m-7");
    }

    #[test]
    fn test_from_history_drops_system_role() {
        assert!(Message::from_history(record("system", "setup")).is_none());
    }

    #[test]
    fn test_from_history_latency_and_intent_from_metadata() {
        let mut rec = record("assistant", "hi");
        rec.metadata = Some(ResponseMetadata {
            route: Some("rag".into()),
            latency: Some(LatencyInfo {
                total_ms: Some(450.2),
                ..Default::default()
            }),
            ..Default::default()
        });
        let msg = Message::from_history(rec).unwrap();
        assert_eq!(msg.intent.as_deref(), Some("rag"));
        assert_eq!(msg.latency_ms, Some(450));
    }

    #[test]
    fn test_apply_replace_then_append() {
        let mut msg = Message::assistant_placeholder();
        msg.apply(&MessagePatch::delta("ab"));
        msg.apply(&MessagePatch {
            replace_content: Some("x".into()),
            append: Some("y".into()),
            ..Default::default()
        });
        assert_eq!(msg.content, "xy");
    }

    #[test]
    fn test_apply_ttft_is_write_once() {
        let mut msg = Message::assistant_placeholder();
        msg.apply(&MessagePatch {
            ttft_ms: Some(120),
            ..Default::default()
        });
        msg.apply(&MessagePatch {
            ttft_ms: Some(999),
            ..Default::default()
        });
        assert_eq!(msg.ttft_ms, Some(120));
    }

    #[test]
    fn test_apply_metadata_overwrites() {
        let mut msg = Message::assistant_placeholder();
        let first = ResponseMetadata {
            route: Some("chat".into()),
            trace_id: Some("t1".into()),
            ..Default::default()
        };
        let second = ResponseMetadata {
            route: Some("rag".into()),
            ..Default::default()
        };
        msg.apply(&MessagePatch {
            metadata: Some(first),
            ..Default::default()
        });
        msg.apply(&MessagePatch {
            metadata: Some(second.clone()),
            ..Default::default()
        });
        msg.apply(&MessagePatch {
            metadata: Some(second.clone()),
            ..Default::default()
        });
        assert_eq!(msg.intent.as_deref(), Some("rag"));
        assert_eq!(msg.metadata, Some(second));
    }

    #[test]
    fn test_metadata_without_route_clears_intent() {
        let mut msg = Message::assistant_placeholder();
        msg.apply(&MessagePatch {
            metadata: Some(ResponseMetadata {
                route: Some("rag".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let plain = ResponseMetadata {
            trace_id: Some("t2".into()),
            ..Default::default()
        };
        msg.apply(&MessagePatch {
            metadata: Some(plain.clone()),
            ..Default::default()
        });
        assert_eq!(msg.intent, None);
        assert_eq!(msg.metadata, Some(plain));
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        let mut msg = Message::user("hello");
        msg.id = "u1".into();
        msg.timestamp = 5;
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"id": "u1", "role": "user", "content": "hello", "timestamp": 5})
        );
    }
}
