//! Plain-text rendering
//!
//! - 对话快照渲染 (折叠 / 分离消息)
//! - 终端流式输出 (`TerminalSink`)

use std::io::Write;
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use chatdb_core::{
    CollapsePolicy, Conversation, ConversationMessage, MessageBody, MessageId, MessageOp,
    MessageRole, MessageType,
};

use crate::chat::ConversationSink;

pub const THINKING_HEADER: &str = "[思考过程]";
pub const RESPONSE_HEADER: &str = "[回复内容]";

/// Database answer shown for a natural-language query.
pub fn format_query_result(sql: &str, rows: Option<&[Value]>) -> String {
    let rows = match rows {
        Some(rows) => serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string()),
        None => "[]".to_string(),
    };
    format!(
        "我理解您想要查询数据库。已生成并执行以下SQL:\n\n```sql\n{}\n```\n\n查询结果:\n{}",
        sql.trim(),
        rows
    )
}

/// Generated SQL that failed to execute.
pub fn format_query_error(sql: &str, error: &str) -> String {
    format!(
        "我理解您想要查询数据库并生成了SQL:\n\n```sql\n{}\n```\n\n但在执行时遇到了错误: {}",
        sql.trim(),
        error
    )
}

fn label(message: &ConversationMessage) -> &'static str {
    match (message.role, message.message_type) {
        (_, MessageType::Thinking) => "思考中",
        (_, MessageType::Error) => "错误",
        (MessageRole::User, _) => "你",
        (MessageRole::System, _) => "系统",
        (MessageRole::Assistant, _) => "助手",
    }
}

fn push_indented(lines: &mut Vec<String>, text: &str, indent: &str) {
    for line in text.lines() {
        lines.push(format!("{}{}", indent, line));
    }
}

/// Render one message. Collapsed messages show their preview; a collapsed
/// separated message hides its thinking section.
pub fn message_to_plain_text(message: &ConversationMessage, policy: &CollapsePolicy) -> String {
    let mut lines = vec![format!("{}:", label(message))];

    match &message.body {
        MessageBody::Plain(_) => {
            push_indented(&mut lines, &policy.display_text(message), "  ");
        }
        MessageBody::Separated { thinking, response } => {
            if message.is_collapsed {
                lines.push(format!("  {} (已折叠)", THINKING_HEADER));
            } else {
                lines.push(format!("  {}", THINKING_HEADER));
                push_indented(&mut lines, thinking, "    ");
            }
            lines.push(format!("  {}", RESPONSE_HEADER));
            let response = if message.is_collapsed {
                policy.preview(response)
            } else {
                response.into()
            };
            push_indented(&mut lines, &response, "    ");
        }
    }

    if message.is_long_message && message.is_collapsed {
        lines.push(format!(
            "  (共 {} 字，已折叠)",
            message.full_text().chars().count()
        ));
    }
    lines.join("\n")
}

pub fn conversation_to_plain_text(conversation: &Conversation) -> String {
    conversation
        .messages()
        .iter()
        .map(|m| message_to_plain_text(m, conversation.policy()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Expand or collapse every long message at once.
pub fn toggle_all_long_messages(conversation: &mut Conversation) {
    let ids: Vec<MessageId> = conversation
        .messages()
        .iter()
        .filter(|m| m.is_long_message)
        .map(|m| m.id)
        .collect();
    for id in ids {
        conversation.toggle_collapsed(id);
    }
}

#[derive(Debug, Default)]
struct SinkState {
    /// Message being streamed and the text already written for it.
    streaming: Option<(MessageId, String)>,
}

/// Writes assembler operations to a terminal as they are applied.
pub struct TerminalSink<W: Write + Send> {
    out: Mutex<(W, SinkState)>,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new((out, SinkState::default())),
        }
    }

    pub fn into_inner(self) -> W {
        let (out, _) = self.out.into_inner().unwrap_or_else(|e| e.into_inner());
        out
    }
}

fn emit<W: Write>(out: &mut W, text: &str) {
    if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
        debug!("Terminal write failed: {}", e);
    }
}

impl<W: Write + Send> ConversationSink for TerminalSink<W> {
    fn on_op(&self, op: &MessageOp, conversation: &Conversation) {
        let mut guard = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let (out, state) = &mut *guard;

        match op {
            MessageOp::Append(message) => match message.message_type {
                MessageType::Thinking => {
                    emit(out, &format!("[思考中] {}\n", message.full_text()));
                }
                MessageType::UserEcho => {}
                _ => {
                    let text = message.full_text().into_owned();
                    emit(out, &format!("{}: {}", label(message), text));
                    state.streaming = Some((message.id, text));
                }
            },
            MessageOp::SetContent { id, content } => {
                let Some(message) = conversation.get(*id) else {
                    return;
                };
                if message.message_type == MessageType::Thinking {
                    emit(out, &format!("[思考中] {}\n", content));
                    return;
                }
                match &mut state.streaming {
                    Some((streaming_id, printed))
                        if *streaming_id == *id && content.starts_with(printed.as_str()) =>
                    {
                        emit(out, &content[printed.len()..]);
                        *printed = content.clone();
                    }
                    _ => {
                        emit(out, &format!("\n{}", content));
                        state.streaming = Some((*id, content.clone()));
                    }
                }
            }
            MessageOp::Remove { .. } => {}
            MessageOp::Separate { id, .. } => {
                if let Some(message) = conversation.get(*id) {
                    let text = message_to_plain_text(message, conversation.policy());
                    emit(out, &format!("\n\n{}", text));
                }
                state.streaming = None;
            }
        }
    }
}
