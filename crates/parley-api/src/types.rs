//! Wire types shared by the session, history and completion endpoints

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Name shown for sessions the server has not named yet
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role, returning `None` for roles the timeline does not show
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A chat session as listed by `GET sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(alias = "createdAt", deserialize_with = "flexible_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Name to show, falling back to the default for unnamed sessions
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            DEFAULT_SESSION_NAME
        } else {
            &self.name
        }
    }
}

/// A timestamp as the server sends it: epoch number or date string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Number(f64),
    Text(String),
}

impl Timestamp {
    /// Convert to epoch milliseconds. Numbers below 1e11 are taken as seconds.
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Timestamp::Number(n) if *n < 1e11 => Some((*n * 1000.0).round() as i64),
            Timestamp::Number(n) => Some(n.round() as i64),
            Timestamp::Text(raw) => parse_timestamp(raw).map(|dt| dt.timestamp_millis()),
        }
    }
}

/// One stored message as returned by `GET sessions/{id}/history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub latency: Option<f64>,
    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
}

/// Server-side timings reported with a reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata attached to a reply: routing, timings and tracing.
///
/// Keys this client does not interpret are kept in `extra` so a consumer can
/// still display them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_used: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseMetadata {
    /// Total server latency in whole milliseconds
    pub fn total_latency_ms(&self) -> Option<u64> {
        self.latency
            .as_ref()
            .and_then(|l| l.total_ms)
            .filter(|ms| *ms >= 0.0)
            .map(|ms| ms.round() as u64)
    }
}

/// Body of `POST chat/completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// `None` asks the server to open a new session
    pub session_id: Option<String>,
    pub query: String,
    pub stream: bool,
}

/// A complete, non-streamed reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionBody {
    pub content: Option<String>,
    pub metadata: Option<ResponseMetadata>,
}

impl CompletionBody {
    /// Decode a non-streamed reply, unwrapping the `{code, data}` envelope
    /// when the server uses one.
    pub fn from_response(value: Value) -> Result<Self> {
        let payload = match value {
            Value::Object(mut map) if map.contains_key("code") && map.contains_key("data") => {
                let code = map.get("code").and_then(Value::as_i64).unwrap_or(-1);
                if code != 0 {
                    let detail = map
                        .get("detail")
                        .or_else(|| map.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(Error::Rejected { code, detail });
                }
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        if !payload.is_object() {
            return Err(Error::UnexpectedResponse(format!(
                "expected a JSON object, got {}",
                payload
            )));
        }
        Ok(serde_json::from_value(payload)?)
    }
}

/// One JSON record of the completion stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPayload {
    /// Text delta; `Some("")` still counts as output
    pub content: Option<String>,
    pub metadata: Option<ResponseMetadata>,
}

/// A message matched by `GET search/messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub session_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn nullable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn flexible_datetime<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_naive_iso_timestamp() {
        let session: Session = serde_json::from_value(json!({
            "id": "42",
            "name": "Recipes",
            "created_at": "2024-05-01T10:20:30.123456"
        }))
        .unwrap();
        assert_eq!(session.id, "42");
        assert_eq!(session.created_at.timestamp(), 1714558830);
    }

    #[test]
    fn test_session_null_name_falls_back() {
        let session: Session = serde_json::from_value(json!({
            "id": "a",
            "name": null,
            "created_at": "2024-05-01T10:20:30+00:00"
        }))
        .unwrap();
        assert_eq!(session.name, "");
        assert_eq!(session.display_name(), DEFAULT_SESSION_NAME);
    }

    #[test]
    fn test_session_rejects_garbage_timestamp() {
        let result: std::result::Result<Session, _> = serde_json::from_value(json!({
            "id": "a",
            "name": "x",
            "created_at": "yesterday"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_seconds_and_millis() {
        assert_eq!(Timestamp::Number(1_700_000_000.0).to_millis(), Some(1_700_000_000_000));
        assert_eq!(Timestamp::Number(1_700_000_000_123.0).to_millis(), Some(1_700_000_000_123));
        assert_eq!(
            Timestamp::Text("2024-05-01T10:20:30Z".into()).to_millis(),
            Some(1_714_558_830_000)
        );
        assert_eq!(Timestamp::Text("not a date".into()).to_millis(), None);
    }

    #[test]
    fn test_metadata_keeps_unknown_keys() {
        let meta: ResponseMetadata = serde_json::from_value(json!({
            "latency": {"total_ms": 812.6, "ttft_ms": 120, "router_ms": 30},
            "route": "rag",
            "trace_id": "t-1",
            "actions": [{"name": "start"}]
        }))
        .unwrap();
        assert_eq!(meta.total_latency_ms(), Some(813));
        assert_eq!(meta.route.as_deref(), Some("rag"));
        assert!(meta.extra.contains_key("actions"));
        assert!(meta.latency.unwrap().extra.contains_key("router_ms"));
    }

    #[test]
    fn test_completion_body_bare() {
        let body = CompletionBody::from_response(json!({"content": "hi"})).unwrap();
        assert_eq!(body.content.as_deref(), Some("hi"));
        assert!(body.metadata.is_none());
    }

    #[test]
    fn test_completion_body_envelope() {
        let body = CompletionBody::from_response(json!({
            "code": 0,
            "data": {"content": "hi", "metadata": {"route": "chat"}}
        }))
        .unwrap();
        assert_eq!(body.content.as_deref(), Some("hi"));
        assert_eq!(body.metadata.unwrap().route.as_deref(), Some("chat"));
    }

    #[test]
    fn test_completion_body_envelope_nonzero_code() {
        let err = CompletionBody::from_response(json!({
            "code": 3,
            "data": {},
            "detail": "quota exceeded"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Rejected { code: 3, ref detail } if detail == "quota exceeded"));
    }

    #[test]
    fn test_completion_body_missing_content() {
        let body = CompletionBody::from_response(json!({"metadata": null})).unwrap();
        assert!(body.content.is_none());
    }

    #[test]
    fn test_completion_body_not_an_object() {
        let err = CompletionBody::from_response(json!("hi")).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[test]
    fn test_completion_request_serializes_null_session() {
        let request = CompletionRequest {
            session_id: None,
            query: "hello".into(),
            stream: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"session_id": null, "query": "hello", "stream": true})
        );
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("User"), Some(Role::User));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }
}
