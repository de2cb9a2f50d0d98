//! Session/history and completion endpoints, and their HTTP implementation

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    types::{CompletionBody, CompletionRequest, HistoryRecord, SearchHit, Session},
};

/// Raw body chunks of a streamed reply
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// What `POST chat/completions` hands back
pub enum CompletionReply {
    /// Non-streamed JSON reply
    Complete(CompletionBody),
    /// Streamed reply; decode with [`crate::stream::WireDecoder`]
    Stream(ByteStream),
}

impl std::fmt::Debug for CompletionReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionReply::Complete(body) => f.debug_tuple("Complete").field(body).finish(),
            CompletionReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Session directory and history storage
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// All sessions of the current user
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// A page of stored messages, newest-last. `offset` counts back from the
    /// newest message.
    async fn fetch_history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>>;

    async fn rename_session(&self, session_id: &str, name: &str) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Full-text search over the user's messages
    async fn search_messages(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Chat completion endpoint
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply>;
}

/// Settings for [`HttpBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// API root, e.g. `http://localhost:8000/api/v1`
    pub base_url: String,
    /// Bearer token forwarded as-is, if any
    pub api_token: Option<String>,
    /// Bound on establishing a connection
    pub connect_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            api_token: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// `reqwest` client for both the session and completion endpoints
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidConfig(format!("base_url {:?}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "base_url {:?} cannot be used as a base",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Build an endpoint URL; each segment is percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig("base_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Turn a non-success response into [`Error::Status`], preferring the
/// server's `{"detail": ...}` message over the raw body.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: Some(serde_json::Value::String(s)),
        }) => s,
        Ok(ErrorBody {
            detail: Some(other),
        }) => other.to_string(),
        _ if !text.trim().is_empty() => text,
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(Error::status(status.as_u16(), detail))
}

#[async_trait]
impl SessionApi for HttpBackend {
    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let url = self.endpoint(&["sessions"])?;
        let response = check_status(self.request(Method::GET, url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn fetch_history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let url = self.endpoint(&["sessions", session_id, "history"])?;
        tracing::debug!("GET history session={} limit={} offset={}", session_id, limit, offset);
        let response = self
            .request(Method::GET, url)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn rename_session(&self, session_id: &str, name: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", session_id, "rename"])?;
        let response = self
            .request(Method::PUT, url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", session_id])?;
        check_status(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchHit>> {
        let url = self.endpoint(&["search", "messages"])?;
        let response = self
            .request(Method::GET, url)
            .query(&[("q", query)])
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CompletionApi for HttpBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply> {
        let url = self.endpoint(&["chat", "completions"])?;
        tracing::debug!(
            "POST completions session={:?} stream={}",
            request.session_id,
            request.stream
        );

        let response = self.request(Method::POST, url).json(request).send().await?;
        let response = check_status(response).await?;

        if !request.stream {
            let value: serde_json::Value = response.json().await?;
            return Ok(CompletionReply::Complete(CompletionBody::from_response(value)?));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from));
        Ok(CompletionReply::Stream(Box::pin(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> Result<HttpBackend> {
        HttpBackend::new(HttpBackendConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let backend = backend("http://localhost:8000/api/v1").unwrap();
        let url = backend.endpoint(&["sessions", "abc", "history"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/sessions/abc/history");
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let backend = backend("http://localhost:8000/api/v1/").unwrap();
        let url = backend.endpoint(&["chat", "completions"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/chat/completions");
    }

    #[test]
    fn test_endpoint_encodes_session_id() {
        let backend = backend("http://localhost:8000/api/v1").unwrap();
        let url = backend.endpoint(&["sessions", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/sessions/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(backend("not a url"), Err(Error::InvalidConfig(_))));
        assert!(matches!(backend("mailto:someone@example.com"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let backend = HttpBackend::new(HttpBackendConfig {
            api_token: Some("  ".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(backend.api_token.is_none());
    }
}
