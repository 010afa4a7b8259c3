//! Chat controller
//!
//! 职责:
//! - 维护对话消息列表 (Conversation)
//! - 驱动流式请求: 字节流 → 帧 → 事件 → `StreamSession` → `MessageOp`
//! - 单请求并发约束、取消、模型列表
//!
//! All mutations of the message list go through `MessageOp`s produced by the
//! assembler (or by the controller for user echo / database answers), and
//! every applied op is forwarded to the optional `ConversationSink`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use chatdb_core::{
    AssemblyState, ChatSettings, Conversation, ConversationMessage, Frame, HistoryEntry,
    MessageId, MessageOp, StreamSession, classify, decode_frames,
};

use crate::backend::{BackendError, ChatBackend, QueryResponse};
use crate::render::{format_query_error, format_query_result, toggle_all_long_messages};
use crate::retry::{RetryPolicy, chat_with_retry, reply_text};

/// Prefix of the visible message for a failed request.
pub const REQUEST_ERROR_PREFIX: &str = "抱歉，在处理您的请求时遇到了错误: ";

/// Shown when a streaming request is cancelled before it completes.
pub const CANCELLED_TEXT: &str = "请求已取消";

/// Shown when the model is still loading after every retry.
pub const MODEL_LOADING_TEXT: &str = "模型加载超时，请稍后再试。";

/// Models offered when the backend cannot list its own.
pub const DEFAULT_MODELS: [&str; 3] = ["llama2", "mistral", "codellama"];

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("A request is already in progress")]
    Busy,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("{text} (after {attempts} attempts)", text = MODEL_LOADING_TEXT)]
    ModelLoading { attempts: u32 },
}

/// Receives every operation applied to the conversation, after it was applied.
///
/// Called with the conversation lock held; implementations must not call back
/// into the controller.
pub trait ConversationSink: Send + Sync {
    fn on_op(&self, op: &MessageOp, conversation: &Conversation);
}

/// Result of one streaming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub state: AssemblyState,
    /// Assistant (or error) message produced by the request
    pub message_id: Option<MessageId>,
    pub frames: usize,
}

/// What `ask` did with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    /// Blank input
    Ignored,
    /// Answered with generated SQL and its rows
    Database { sql: String, message_id: MessageId },
    /// SQL was generated but failed to execute
    QueryFailed {
        sql: String,
        error: String,
        message_id: MessageId,
    },
    Streamed(StreamOutcome),
    Replied(MessageId),
}

/// Clears the in-flight flag on drop.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, ChatError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ChatError::Busy)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One streaming request in progress. Dropping it before the session closed
/// (the request future was dropped) fails the session so no thinking message
/// is left behind.
struct ActiveStream<'a> {
    controller: &'a ChatController,
    session: StreamSession,
    frames: usize,
    _guard: InFlightGuard,
}

impl<'a> ActiveStream<'a> {
    fn new(controller: &'a ChatController, guard: InFlightGuard) -> Self {
        Self {
            controller,
            session: StreamSession::new(),
            frames: 0,
            _guard: guard,
        }
    }

    fn on_payload(&mut self, payload: &str) {
        self.frames += 1;
        let ops = self.session.apply(classify(payload));
        self.controller.commit(&ops);
    }

    fn finish(&mut self) {
        let ops = self.session.finish();
        self.controller.commit(&ops);
    }

    fn fail(&mut self, reason: &str) {
        let ops = self.session.fail(reason);
        self.controller.commit(&ops);
    }

    fn outcome(&self) -> StreamOutcome {
        StreamOutcome {
            state: self.session.state(),
            message_id: self.session.message_id(),
            frames: self.frames,
        }
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        if !self.session.is_closed() {
            debug!("Streaming request dropped before completion");
            self.fail(CANCELLED_TEXT);
        }
    }
}

/// Conversation state plus the backend it talks to. Cheap to clone; clones
/// share the conversation and the in-flight flag.
#[derive(Clone)]
pub struct ChatController {
    backend: Arc<dyn ChatBackend>,
    conversation: Arc<Mutex<Conversation>>,
    model: Arc<Mutex<Option<String>>>,
    models: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicBool>,
    sink: Option<Arc<dyn ConversationSink>>,
    retry: RetryPolicy,
    streaming: bool,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &ChatSettings) -> Self {
        Self {
            backend,
            conversation: Arc::new(Mutex::new(Conversation::with_greeting(
                settings.collapse_policy(),
            ))),
            model: Arc::new(Mutex::new(settings.model.clone())),
            models: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
            sink: None,
            retry: RetryPolicy::from_settings(settings),
            streaming: settings.stream,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ConversationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read access to the conversation.
    pub fn with_conversation<R>(&self, f: impl FnOnce(&Conversation) -> R) -> R {
        f(&self.lock())
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.lock().messages().to_vec()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn model(&self) -> Option<String> {
        self.model.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.lock().unwrap_or_else(|e| e.into_inner()) = Some(model.into());
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn toggle_collapsed(&self, id: MessageId) -> bool {
        self.lock().toggle_collapsed(id)
    }

    /// Expand or collapse every long message.
    pub fn toggle_all_long(&self) {
        toggle_all_long_messages(&mut self.lock());
    }

    /// Reset to the greeting.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn commit(&self, ops: &[MessageOp]) {
        if ops.is_empty() {
            return;
        }
        let mut conversation = self.lock();
        for op in ops {
            conversation.apply(op);
            if let Some(sink) = &self.sink {
                sink.on_op(op, &conversation);
            }
        }
    }

    /// Echo the user message and return the history sent with the request,
    /// which ends with that message.
    fn echo_user(&self, text: &str) -> Vec<HistoryEntry> {
        self.commit(&[MessageOp::Append(ConversationMessage::user(text))]);
        self.lock().history()
    }

    /// Natural-language query first; when no SQL comes back the input is sent
    /// to chat (streaming or not, per settings).
    pub async fn ask(&self, text: &str) -> Result<AskOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(AskOutcome::Ignored);
        }
        let guard = InFlightGuard::acquire(&self.in_flight)?;
        let history = self.echo_user(text);

        match self.backend.send(text).await {
            Ok(QueryResponse {
                sql: Some(sql),
                error: Some(error),
                ..
            }) if !sql.trim().is_empty() => {
                warn!("Generated SQL failed: {}", error);
                let message = ConversationMessage::error(format_query_error(&sql, &error));
                let message_id = message.id;
                self.commit(&[MessageOp::Append(message)]);
                return Ok(AskOutcome::QueryFailed {
                    sql,
                    error,
                    message_id,
                });
            }
            Ok(QueryResponse {
                sql: Some(sql),
                rows,
                ..
            }) if !sql.trim().is_empty() => {
                info!("Query answered with SQL");
                let message = ConversationMessage::database_result(format_query_result(
                    &sql,
                    rows.as_deref(),
                ));
                let message_id = message.id;
                self.commit(&[MessageOp::Append(message)]);
                return Ok(AskOutcome::Database { sql, message_id });
            }
            Ok(_) => debug!("No SQL generated, falling back to chat"),
            Err(e) => debug!("Query failed ({}), falling back to chat", e),
        }

        if self.streaming {
            let outcome = self
                .run_stream(text, history, std::future::pending(), guard)
                .await;
            Ok(AskOutcome::Streamed(outcome))
        } else {
            self.run_blocking(text, history, guard)
                .await
                .map(AskOutcome::Replied)
        }
    }

    /// Streaming chat for `text`.
    pub async fn chat_streaming(&self, text: &str) -> Result<StreamOutcome, ChatError> {
        self.chat_streaming_until(text, std::future::pending()).await
    }

    /// Streaming chat that is cancelled when `cancel` resolves first.
    pub async fn chat_streaming_until<F>(
        &self,
        text: &str,
        cancel: F,
    ) -> Result<StreamOutcome, ChatError>
    where
        F: Future<Output = ()>,
    {
        let guard = InFlightGuard::acquire(&self.in_flight)?;
        let history = self.echo_user(text);
        Ok(self.run_stream(text, history, cancel, guard).await)
    }

    /// Non-streaming chat with model-loading retry.
    pub async fn chat_blocking(&self, text: &str) -> Result<MessageId, ChatError> {
        let guard = InFlightGuard::acquire(&self.in_flight)?;
        let history = self.echo_user(text);
        self.run_blocking(text, history, guard).await
    }

    async fn run_stream<F>(
        &self,
        text: &str,
        history: Vec<HistoryEntry>,
        cancel: F,
        guard: InFlightGuard,
    ) -> StreamOutcome
    where
        F: Future<Output = ()>,
    {
        let model = self.model();
        let mut active = ActiveStream::new(self, guard);

        let body = match self
            .backend
            .stream_chat(text, &history, model.as_deref())
            .await
        {
            Ok(body) => body,
            Err(e) => {
                active.fail(&format!("{}{}", REQUEST_ERROR_PREFIX, e));
                return active.outcome();
            }
        };

        let frames = decode_frames(body);
        tokio::pin!(frames);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;

                _ = &mut cancel => {
                    info!("Streaming request cancelled");
                    active.fail(CANCELLED_TEXT);
                    break;
                }
                next = frames.next() => match next {
                    Some(Ok(Frame::Data(payload))) => active.on_payload(&payload),
                    Some(Ok(Frame::Done)) | None => {
                        active.finish();
                        break;
                    }
                    Some(Err(e)) => {
                        active.fail(&format!("{}{}", REQUEST_ERROR_PREFIX, e));
                        break;
                    }
                },
            }
        }

        active.outcome()
    }

    async fn run_blocking(
        &self,
        text: &str,
        history: Vec<HistoryEntry>,
        _guard: InFlightGuard,
    ) -> Result<MessageId, ChatError> {
        let model = self.model();
        match chat_with_retry(
            self.backend.as_ref(),
            text,
            &history,
            model.as_deref(),
            self.retry,
        )
        .await
        {
            Ok(reply) => {
                let message = ConversationMessage::response(reply_text(&reply));
                let id = message.id;
                self.commit(&[MessageOp::Append(message)]);
                Ok(id)
            }
            Err(e) => {
                let content = match &e {
                    ChatError::ModelLoading { .. } => MODEL_LOADING_TEXT.to_string(),
                    other => format!("{}{}", REQUEST_ERROR_PREFIX, other),
                };
                self.commit(&[MessageOp::Append(ConversationMessage::error(content))]);
                Err(e)
            }
        }
    }

    /// Refresh the model list. Falls back to `DEFAULT_MODELS` when the
    /// backend is unreachable, and selects the first model when none is set.
    pub async fn load_models(&self) -> Vec<String> {
        let models = match self.backend.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!("Failed to load models: {}", e);
                DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
            }
        };

        {
            let mut selected = self.model.lock().unwrap_or_else(|e| e.into_inner());
            if selected.is_none() {
                *selected = models.first().cloned();
            }
        }
        *self.models.lock().unwrap_or_else(|e| e.into_inner()) = models.clone();
        info!("Loaded {} models", models.len());
        models
    }
}
