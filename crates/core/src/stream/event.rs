//! Event Classifier
//!
//! Maps a frame payload to a `StreamEvent` by its `status` field:
//!
//! ```text
//! {"status": "thinking"|"responding"|"chunk"|"result"|"error",
//!  "message"?: string, "response"?: string, "error"?: string}
//! ```
//!
//! Unrecognised or missing statuses, and payloads that are not JSON at all,
//! become `StreamEvent::Unknown` so that newer servers never break the
//! assembler.

use serde_json::Value;
use tracing::debug;

/// Error text used when an error event carries none.
pub const UNKNOWN_ERROR_TEXT: &str = "未知错误";

/// Classified stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Model is working; `message` is the status line to display
    Thinking { message: Option<String> },
    /// First real output is being produced
    Responding { message: Option<String> },
    /// Incremental text fragment
    Chunk { response: String },
    /// Authoritative final text
    Result { response: String },
    Error { message: String },
    /// Anything else. `raw` keeps the original payload.
    Unknown {
        raw: String,
        response: Option<String>,
        message: Option<String>,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Responding { .. } => "responding",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Result { .. } => "result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Unknown { .. } => "unknown",
        }
    }
}

/// Classify one frame payload.
pub fn classify(payload: &str) -> StreamEvent {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            debug!("Malformed frame payload ({}): {}", e, payload);
            return StreamEvent::Unknown {
                raw: payload.to_string(),
                response: None,
                message: None,
            };
        }
    };

    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    };

    match value.get("status").and_then(Value::as_str) {
        Some("thinking") => StreamEvent::Thinking {
            message: field("message"),
        },
        Some("responding") => StreamEvent::Responding {
            message: field("message"),
        },
        Some("chunk") => StreamEvent::Chunk {
            response: field("response").unwrap_or_default(),
        },
        Some("result") => StreamEvent::Result {
            response: field("response").unwrap_or_default(),
        },
        Some("error") => StreamEvent::Error {
            message: field("message")
                .or_else(|| field("error"))
                .unwrap_or_else(|| UNKNOWN_ERROR_TEXT.to_string()),
        },
        other => {
            debug!("Unrecognised stream status: {:?}", other);
            StreamEvent::Unknown {
                raw: payload.to_string(),
                response: field("response"),
                message: field("message"),
            }
        }
    }
}
