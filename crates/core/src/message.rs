//! Conversation Messages
//!
//! 职责:
//! - 对话消息模型 (角色、类型、内容、折叠状态)
//! - 组装器产出的消息操作 (`MessageOp`)
//! - 消息列表 (`Conversation`)：唯一应用操作的地方

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::presentation::CollapsePolicy;

/// Greeting shown at the top of a fresh conversation.
pub const GREETING: &str =
    "您好！我是您的AI数据库助手。您可以问我任何关于数据库的问题，我会尽力帮助您。";

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// What a message represents in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    System,
    UserEcho,
    DatabaseResult,
    Error,
    /// Transient "working" indicator, removed once real output arrives
    Thinking,
    Response,
    /// Content split into a thinking trace and a final response
    Separated,
}

/// Stable message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message text. Either plain content or the separated thinking/response pair,
/// never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Plain(String),
    Separated { thinking: String, response: String },
}

/// A single conversation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    /// 仅在临时 "思考中" 占位消息存活期间为 true
    pub is_processing: bool,
    pub is_collapsed: bool,
    pub is_long_message: bool,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            body: MessageBody::Plain(content.into()),
            timestamp: Utc::now(),
            message_type,
            is_processing: false,
            is_collapsed: false,
            is_long_message: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageType::UserEcho, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, MessageType::System, content)
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Assistant, MessageType::Thinking, content);
        message.is_processing = true;
        message
    }

    pub fn response(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageType::Response, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageType::Error, content)
    }

    pub fn database_result(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageType::DatabaseResult, content)
    }

    pub fn content(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Plain(content) => Some(content),
            MessageBody::Separated { .. } => None,
        }
    }

    pub fn thinking_content(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Plain(_) => None,
            MessageBody::Separated { thinking, .. } => Some(thinking),
        }
    }

    pub fn response_content(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Plain(_) => None,
            MessageBody::Separated { response, .. } => Some(response),
        }
    }

    /// Whole message text, joining separated parts.
    pub fn full_text(&self) -> Cow<'_, str> {
        match &self.body {
            MessageBody::Plain(content) => Cow::Borrowed(content),
            MessageBody::Separated { thinking, response } => {
                Cow::Owned(format!("{}{}", thinking, response))
            }
        }
    }

    pub fn toggle_collapsed(&mut self) {
        self.is_collapsed = !self.is_collapsed;
    }
}

/// A state transition produced by the assembler and applied by `Conversation`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOp {
    Append(ConversationMessage),
    SetContent {
        id: MessageId,
        content: String,
    },
    Remove {
        id: MessageId,
    },
    Separate {
        id: MessageId,
        thinking: String,
        response: String,
    },
}

/// One prior turn sent with a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub text: String,
}

/// The on-screen message list.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    policy: CollapsePolicy,
}

impl Conversation {
    pub fn new(policy: CollapsePolicy) -> Self {
        Self {
            messages: Vec::new(),
            policy,
        }
    }

    /// Conversation seeded with the assistant greeting.
    pub fn with_greeting(policy: CollapsePolicy) -> Self {
        let mut conversation = Self::new(policy);
        conversation.push(greeting());
        conversation
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn policy(&self) -> &CollapsePolicy {
        &self.policy
    }

    pub fn get(&self, id: MessageId) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn push(&mut self, mut message: ConversationMessage) -> MessageId {
        self.policy.observe(&mut message);
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(ConversationMessage::user(content))
    }

    pub fn push_error(&mut self, content: impl Into<String>) -> MessageId {
        self.push(ConversationMessage::error(content))
    }

    /// Reset to the single greeting message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.push(greeting());
    }

    /// Flip the collapsed flag of one message. Returns false for unknown ids.
    pub fn toggle_collapsed(&mut self, id: MessageId) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.toggle_collapsed();
                true
            }
            None => false,
        }
    }

    /// Apply one assembler operation. Returns false when the target message
    /// no longer exists.
    pub fn apply(&mut self, op: &MessageOp) -> bool {
        let policy = self.policy;
        match op {
            MessageOp::Append(message) => {
                self.push(message.clone());
                true
            }
            MessageOp::SetContent { id, content } => match self.get_mut(*id) {
                Some(message) => {
                    message.body = MessageBody::Plain(content.clone());
                    policy.observe(message);
                    true
                }
                None => {
                    warn!("SetContent for unknown message {}", id);
                    false
                }
            },
            MessageOp::Remove { id } => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != *id);
                if self.messages.len() == before {
                    warn!("Remove for unknown message {}", id);
                    return false;
                }
                true
            }
            MessageOp::Separate {
                id,
                thinking,
                response,
            } => match self.get_mut(*id) {
                Some(message) => {
                    message.body = MessageBody::Separated {
                        thinking: thinking.clone(),
                        response: response.clone(),
                    };
                    message.message_type = MessageType::Separated;
                    policy.observe(message);
                    true
                }
                None => {
                    warn!("Separate for unknown message {}", id);
                    false
                }
            },
        }
    }

    pub fn apply_all<'a>(&mut self, ops: impl IntoIterator<Item = &'a MessageOp>) {
        for op in ops {
            self.apply(op);
        }
    }

    /// Prior turns for the next chat request. Transient thinking messages are
    /// skipped.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| m.message_type != MessageType::Thinking)
            .map(|m| HistoryEntry {
                role: m.role,
                text: m.full_text().into_owned(),
            })
            .collect()
    }
}

fn greeting() -> ConversationMessage {
    ConversationMessage::new(MessageRole::Assistant, MessageType::System, GREETING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_accessors() {
        let message = ConversationMessage::response("hello");
        assert_eq!(message.content(), Some("hello"));
        assert!(message.thinking_content().is_none());
        assert!(message.response_content().is_none());
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(!message.is_processing);
    }

    #[test]
    fn test_thinking_message_is_processing() {
        let message = ConversationMessage::thinking("正在思考...");
        assert_eq!(message.message_type, MessageType::Thinking);
        assert!(message.is_processing);
    }

    #[test]
    fn test_apply_set_content_and_remove() {
        let mut conversation = Conversation::default();
        let message = ConversationMessage::response("");
        let id = message.id;

        assert!(conversation.apply(&MessageOp::Append(message)));
        assert!(conversation.apply(&MessageOp::SetContent {
            id,
            content: "Hello".to_string(),
        }));
        assert_eq!(conversation.get(id).unwrap().content(), Some("Hello"));

        assert!(conversation.apply(&MessageOp::Remove { id }));
        assert!(conversation.is_empty());
        assert!(!conversation.apply(&MessageOp::Remove { id }));
    }

    #[test]
    fn test_apply_separate_clears_content() {
        let mut conversation = Conversation::default();
        let id = conversation.push(ConversationMessage::response("x"));

        conversation.apply(&MessageOp::Separate {
            id,
            thinking: "foo".to_string(),
            response: "bar".to_string(),
        });

        let message = conversation.get(id).unwrap();
        assert!(message.content().is_none());
        assert_eq!(message.thinking_content(), Some("foo"));
        assert_eq!(message.response_content(), Some("bar"));
        assert_eq!(message.message_type, MessageType::Separated);
    }

    #[test]
    fn test_set_content_unknown_id_is_ignored() {
        let mut conversation = Conversation::default();
        conversation.push_user("hi");
        let applied = conversation.apply(&MessageOp::SetContent {
            id: MessageId::new(),
            content: "x".to_string(),
        });
        assert!(!applied);
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_set_content_marks_long_message() {
        let mut conversation = Conversation::new(CollapsePolicy::new(10));
        let id = conversation.push(ConversationMessage::response("short"));
        assert!(!conversation.get(id).unwrap().is_long_message);

        conversation.apply(&MessageOp::SetContent {
            id,
            content: "definitely longer than ten".to_string(),
        });
        let message = conversation.get(id).unwrap();
        assert!(message.is_long_message);
        assert!(message.is_collapsed);
    }

    #[test]
    fn test_clear_resets_to_greeting() {
        let mut conversation = Conversation::with_greeting(CollapsePolicy::default());
        conversation.push_user("hello");
        conversation.push_error("boom");
        assert_eq!(conversation.len(), 3);

        conversation.clear();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].content(), Some(GREETING));
    }

    #[test]
    fn test_history_skips_thinking() {
        let mut conversation = Conversation::default();
        conversation.push_user("q");
        conversation.push(ConversationMessage::thinking("..."));
        conversation.push(ConversationMessage::response("a"));

        let history = conversation.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].text, "a");
    }

    #[test]
    fn test_toggle_collapsed_is_pure_flip() {
        let mut conversation = Conversation::default();
        let id = conversation.push(ConversationMessage::response("x"));
        assert!(conversation.toggle_collapsed(id));
        assert!(conversation.get(id).unwrap().is_collapsed);
        assert!(conversation.toggle_collapsed(id));
        let message = conversation.get(id).unwrap();
        assert!(!message.is_collapsed);
        assert!(!message.is_long_message);
        assert_eq!(message.content(), Some("x"));
    }

    #[test]
    fn test_message_type_serde() {
        let json = serde_json::to_string(&MessageType::DatabaseResult).unwrap();
        assert_eq!(json, "\"database-result\"");
        let role: MessageRole = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, MessageRole::Assistant);
    }
}
