//! Message Assembler
//!
//! 职责:
//! - 按到达顺序消费流式事件
//! - 维护进行中的 assistant 消息 (StreamSession)
//! - 产出显式的消息操作 (`MessageOp`)，由渲染层应用
//!
//! States: `Idle → ThinkingShown → Responding → Done`, `Errored` from anywhere.
//! At most one transient thinking message and one assistant message are open
//! per session; the thinking message is removed as soon as any real output,
//! result or error arrives.

use tracing::{debug, info, warn};

use crate::message::{ConversationMessage, MessageId, MessageOp};
use crate::separator::separate;
use crate::stream::StreamEvent;

/// Placeholder text when a thinking event carries no message.
pub const DEFAULT_THINKING_TEXT: &str = "正在思考...";

/// Prefix of an error notice appended to partial output.
pub const ERROR_NOTICE_PREFIX: &str = "\n\n[错误] ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    ThinkingShown,
    Responding,
    Done,
    Errored,
}

/// Per-request assembly state. Owned by exactly one in-flight request.
#[derive(Debug)]
pub struct StreamSession {
    thinking: Option<MessageId>,
    assistant: Option<MessageId>,
    /// Standalone error message, when the error arrived before any output
    error: Option<(MessageId, String)>,
    buffer: String,
    status: Option<String>,
    state: AssemblyState,
    closed: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            thinking: None,
            assistant: None,
            error: None,
            buffer: String::new(),
            status: None,
            state: AssemblyState::Idle,
            closed: false,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// True after `finish` or `fail`.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn assistant_id(&self) -> Option<MessageId> {
        self.assistant
    }

    pub fn thinking_id(&self) -> Option<MessageId> {
        self.thinking
    }

    /// Message this session produced: the assistant response, or the error
    /// message when it failed before any output.
    pub fn message_id(&self) -> Option<MessageId> {
        self.assistant.or(self.error.as_ref().map(|(id, _)| *id))
    }

    /// Accumulated assistant text.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Last status line sent by the server.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Apply one event, in arrival order.
    pub fn apply(&mut self, event: StreamEvent) -> Vec<MessageOp> {
        if self.closed {
            warn!("Ignoring {} event on a closed stream session", event.kind());
            return Vec::new();
        }
        if self.state == AssemblyState::Errored && !matches!(event, StreamEvent::Error { .. }) {
            warn!("Ignoring {} event after a stream error", event.kind());
            return Vec::new();
        }
        debug!("Stream event: {}", event.kind());

        let mut ops = Vec::new();
        match event {
            StreamEvent::Thinking { message } => self.on_thinking(message, &mut ops),
            StreamEvent::Responding { message } => {
                if message.is_some() {
                    self.status = message;
                }
                self.drop_thinking(&mut ops);
                self.ensure_assistant(&mut ops);
                self.state = AssemblyState::Responding;
            }
            StreamEvent::Chunk { response } => self.on_chunk(&response, &mut ops),
            StreamEvent::Result { response } => self.on_result(response, &mut ops),
            StreamEvent::Error { message } => self.on_error(&message, &mut ops),
            // legacy payload shapes: `response` wins over `message`
            StreamEvent::Unknown {
                raw,
                response,
                message,
            } => {
                if let Some(response) = response {
                    self.on_chunk(&response, &mut ops);
                } else if let Some(message) = message {
                    self.on_result(message, &mut ops);
                } else {
                    debug!("Ignoring unrecognised frame: {}", raw);
                }
            }
        }
        ops
    }

    /// Stream completed (terminator or transport close).
    ///
    /// Removes a leftover thinking message and separates the assistant
    /// message unless the session errored.
    pub fn finish(&mut self) -> Vec<MessageOp> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let mut ops = Vec::new();
        self.drop_thinking(&mut ops);

        if self.state != AssemblyState::Errored {
            if let Some(id) = self.assistant {
                if let Some((thinking, response)) = separate(&self.buffer).into_parts() {
                    ops.push(MessageOp::Separate {
                        id,
                        thinking,
                        response,
                    });
                }
            }
            self.state = AssemblyState::Done;
        }

        info!("Stream session finished in state {:?}", self.state);
        ops
    }

    /// Terminal transport failure or cancellation.
    pub fn fail(&mut self, reason: &str) -> Vec<MessageOp> {
        if self.closed {
            return Vec::new();
        }
        let mut ops = Vec::new();
        self.on_error(reason, &mut ops);
        self.closed = true;
        warn!("Stream session failed: {}", reason);
        ops
    }

    fn on_thinking(&mut self, message: Option<String>, ops: &mut Vec<MessageOp>) {
        let text = message.unwrap_or_else(|| DEFAULT_THINKING_TEXT.to_string());

        if self.assistant.is_some() {
            // output already started; a thinking line would be stale
            self.status = Some(text);
            return;
        }

        match self.thinking {
            Some(id) => ops.push(MessageOp::SetContent {
                id,
                content: text.clone(),
            }),
            None => {
                let placeholder = ConversationMessage::thinking(text.clone());
                self.thinking = Some(placeholder.id);
                ops.push(MessageOp::Append(placeholder));
            }
        }
        self.status = Some(text);
        self.state = AssemblyState::ThinkingShown;
    }

    fn on_chunk(&mut self, fragment: &str, ops: &mut Vec<MessageOp>) {
        self.drop_thinking(ops);
        let id = self.ensure_assistant(ops);
        if !fragment.is_empty() {
            self.buffer.push_str(fragment);
            ops.push(MessageOp::SetContent {
                id,
                content: self.buffer.clone(),
            });
        }
        self.state = AssemblyState::Responding;
    }

    fn on_result(&mut self, response: String, ops: &mut Vec<MessageOp>) {
        self.drop_thinking(ops);
        match self.assistant {
            Some(id) => {
                // chunk + result carrying the same text must not duplicate it
                if !self.buffer.ends_with(&response) {
                    self.buffer = response;
                    ops.push(MessageOp::SetContent {
                        id,
                        content: self.buffer.clone(),
                    });
                }
            }
            None => {
                let message = ConversationMessage::response(response.clone());
                self.assistant = Some(message.id);
                self.buffer = response;
                ops.push(MessageOp::Append(message));
            }
        }
        self.state = AssemblyState::Done;
    }

    fn on_error(&mut self, message: &str, ops: &mut Vec<MessageOp>) {
        self.drop_thinking(ops);
        if let Some(id) = self.assistant {
            self.buffer.push_str(ERROR_NOTICE_PREFIX);
            self.buffer.push_str(message);
            ops.push(MessageOp::SetContent {
                id,
                content: self.buffer.clone(),
            });
        } else if let Some((id, text)) = &mut self.error {
            text.push_str(ERROR_NOTICE_PREFIX);
            text.push_str(message);
            ops.push(MessageOp::SetContent {
                id: *id,
                content: text.clone(),
            });
        } else {
            let error = ConversationMessage::error(message);
            self.error = Some((error.id, message.to_string()));
            ops.push(MessageOp::Append(error));
        }
        self.state = AssemblyState::Errored;
    }

    fn drop_thinking(&mut self, ops: &mut Vec<MessageOp>) {
        if let Some(id) = self.thinking.take() {
            ops.push(MessageOp::Remove { id });
        }
    }

    fn ensure_assistant(&mut self, ops: &mut Vec<MessageOp>) -> MessageId {
        if let Some(id) = self.assistant {
            return id;
        }
        let message = ConversationMessage::response(self.buffer.clone());
        let id = message.id;
        self.assistant = Some(id);
        ops.push(MessageOp::Append(message));
        id
    }
}
