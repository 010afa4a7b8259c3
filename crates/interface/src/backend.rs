//! Backend collaborator
//!
//! Request/response calls to the database-assistant API plus the raw byte
//! stream of the streaming chat endpoint. No protocol logic lives here.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use chatdb_core::{HistoryEntry, ServerConfig};

/// Raw response body chunks of a streaming chat call.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, BackendError>> + Send>>;

/// Backend-specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("HTTP error! status: {status}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid config: {0}")]
    Config(String),
}

/// Convert a reqwest error, keeping the status code when there is one.
pub fn map_reqwest_error(error: reqwest::Error) -> BackendError {
    match error.status() {
        Some(status) => BackendError::Http {
            status: status.as_u16(),
            body: error.to_string(),
        },
        None if error.is_decode() => BackendError::Decode(error.to_string()),
        None => BackendError::Network(error.to_string()),
    }
}

/// Natural-language query result. `error` is set when the generated SQL
/// failed to execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub sql: Option<String>,
    #[serde(default)]
    pub rows: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Failure body of the query endpoint (`{"error", "sql"}`). `None` unless
    /// the body names the SQL that failed.
    pub fn from_failure_body(body: &str) -> Option<Self> {
        let response: Self = serde_json::from_str(body).ok()?;
        let has_sql = response
            .sql
            .as_deref()
            .is_some_and(|sql| !sql.trim().is_empty());
        (has_sql && response.error.is_some()).then_some(response)
    }
}

/// Non-streaming chat reply. Older servers answer with `message`, newer ones
/// with `text`; database answers carry `sql`/`rows`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: Option<String>,
    pub text: Option<String>,
    pub sql: Option<String>,
    pub rows: Option<Vec<Value>>,
    /// Upstream model response, passed through by the server
    pub raw: Option<Value>,
}

impl ChatReply {
    /// The model was still loading when the request was served.
    pub fn is_model_loading(&self) -> bool {
        self.raw
            .as_ref()
            .and_then(|raw| raw.get("done_reason"))
            .and_then(Value::as_str)
            == Some("load")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    history: &'a [HistoryEntry],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Database-assistant API
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Natural language → SQL (+ rows when executed)
    async fn send(&self, text: &str) -> Result<QueryResponse, BackendError>;

    /// Non-streaming chat
    async fn chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        model: Option<&str>,
    ) -> Result<ChatReply, BackendError>;

    /// Streaming chat, returning the undecoded response body
    async fn stream_chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        model: Option<&str>,
    ) -> Result<ByteStream, BackendError>;

    /// Available model names
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

/// Accepts `["a", "b"]`, `{"models": [...]}` (names or `{ "name": .. }`
/// objects) or `{"error": ..}`.
pub fn parse_models(value: &Value) -> Vec<String> {
    fn names(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| {
                item.as_str()
                    .or_else(|| item.get("name").and_then(Value::as_str))
                    .map(|s| s.to_string())
            })
            .collect()
    }

    match value {
        Value::Array(items) => names(items),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("models") {
                names(items)
            } else if let Some(error) = map.get("error") {
                warn!("models endpoint returned error: {}", error);
                Vec::new()
            } else {
                map.keys().cloned().collect()
            }
        }
        _ => Vec::new(),
    }
}

/// HTTP implementation of `ChatBackend`
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    stream_path: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("stream_path", &self.stream_path)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(config: &ServerConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            stream_path: config.stream_path.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn checked(builder: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send(&self, text: &str) -> Result<QueryResponse, BackendError> {
        let builder = self
            .client
            .post(self.url("/query"))
            .json(&serde_json::json!({ "query": text }));
        match Self::checked(self.authorize(builder)).await {
            Ok(response) => response.json().await.map_err(map_reqwest_error),
            Err(BackendError::Http { status, body }) => {
                match QueryResponse::from_failure_body(&body) {
                    Some(failed) => {
                        debug!("Query SQL failed with status {}", status);
                        Ok(failed)
                    }
                    None => Err(BackendError::Http { status, body }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        model: Option<&str>,
    ) -> Result<ChatReply, BackendError> {
        let body = ChatRequest {
            message,
            history,
            model,
        };
        let builder = self.client.post(self.url("/chat")).json(&body);
        let response = Self::checked(self.authorize(builder)).await?;
        response.json().await.map_err(map_reqwest_error)
    }

    async fn stream_chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        model: Option<&str>,
    ) -> Result<ByteStream, BackendError> {
        let body = ChatRequest {
            message,
            history,
            model,
        };
        let builder = self
            .client
            .post(self.url(&self.stream_path))
            .header("Accept", "text/event-stream")
            .json(&body);
        let response = Self::checked(self.authorize(builder)).await?;
        debug!("Streaming chat opened ({})", response.status());

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error));
        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let builder = self.client.get(self.url("/models"));
        let response = Self::checked(self.authorize(builder)).await?;
        let value: Value = response.json().await.map_err(map_reqwest_error)?;
        Ok(parse_models(&value))
    }
}
