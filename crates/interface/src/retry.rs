//! Model-loading retry for non-streaming chat.
//!
//! The backend answers with `raw.done_reason == "load"` while the selected
//! model is still being loaded. Such replies are retried a bounded number of
//! times with a fixed delay. Streaming chat is never retried.

use std::time::Duration;

use tracing::{info, warn};

use chatdb_core::{ChatSettings, HistoryEntry};

use crate::backend::{ChatBackend, ChatReply};
use crate::chat::ChatError;
use crate::render::format_query_result;

/// Reply text when the backend answered with nothing displayable.
pub const FALLBACK_REPLY: &str = "抱歉，我没有理解您的问题。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            max_attempts: settings.retry_attempts.max(1),
            delay: settings.retry_delay(),
        }
    }
}

/// Non-streaming chat, retried while the model is loading.
pub async fn chat_with_retry(
    backend: &dyn ChatBackend,
    message: &str,
    history: &[HistoryEntry],
    model: Option<&str>,
    policy: RetryPolicy,
) -> Result<ChatReply, ChatError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let reply = backend.chat(message, history, model).await?;
        if !reply.is_model_loading() {
            return Ok(reply);
        }
        if attempt >= policy.max_attempts {
            warn!("Model still loading after {} attempts", attempt);
            return Err(ChatError::ModelLoading { attempts: attempt });
        }
        info!(
            "模型正在加载，重试中 ({}/{})",
            attempt, policy.max_attempts
        );
        tokio::time::sleep(policy.delay).await;
    }
}

/// Displayable text of a chat reply.
pub fn reply_text(reply: &ChatReply) -> String {
    if let Some(message) = reply.message.as_deref().filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    if let Some(text) = reply.text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    if let Some(sql) = reply.sql.as_deref() {
        return format_query_result(sql, reply.rows.as_deref());
    }
    FALLBACK_REPLY.to_string()
}
