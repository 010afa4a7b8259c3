//! Scripted backend and recording sink shared by the interface tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use chatdb_core::{Conversation, HistoryEntry, MessageOp};

use crate::backend::{BackendError, ByteStream, ChatBackend, ChatReply, QueryResponse};
use crate::chat::ConversationSink;

/// One SSE data frame.
pub(crate) fn sse(payload: &str) -> Vec<u8> {
    format!("data: {}\n\n", payload).into_bytes()
}

/// Cut a wire transcript into fixed-size transport chunks.
pub(crate) fn split_chunks(wire: &[u8], size: usize) -> Vec<Vec<u8>> {
    wire.chunks(size).map(|c| c.to_vec()).collect()
}

#[derive(Default)]
struct Script {
    query: Option<Result<QueryResponse, BackendError>>,
    replies: VecDeque<ChatReply>,
    stream: Option<Vec<Result<Vec<u8>, BackendError>>>,
    hang: bool,
    models: Option<Result<Vec<String>, BackendError>>,
    chat_calls: usize,
    stream_calls: usize,
    last_message: Option<String>,
    last_history: Vec<HistoryEntry>,
}

/// Backend answering from a fixed script. Unscripted calls fail with a
/// network error.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

fn unreachable_backend() -> BackendError {
    BackendError::Network("connection refused".to_string())
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn with_query(self, query: Result<QueryResponse, BackendError>) -> Self {
        self.script().query = Some(query);
        self
    }

    pub(crate) fn with_replies(self, replies: Vec<ChatReply>) -> Self {
        self.script().replies = replies.into();
        self
    }

    pub(crate) fn with_stream(self, chunks: Vec<Vec<u8>>) -> Self {
        self.with_stream_results(chunks.into_iter().map(Ok).collect())
    }

    pub(crate) fn with_stream_results(self, chunks: Vec<Result<Vec<u8>, BackendError>>) -> Self {
        self.script().stream = Some(chunks);
        self
    }

    /// Keep the stream open after the scripted chunks.
    pub(crate) fn hanging(self) -> Self {
        self.script().hang = true;
        self
    }

    pub(crate) fn with_models(self, models: Result<Vec<String>, BackendError>) -> Self {
        self.script().models = Some(models);
        self
    }

    pub(crate) fn chat_calls(&self) -> usize {
        self.script().chat_calls
    }

    pub(crate) fn stream_calls(&self) -> usize {
        self.script().stream_calls
    }

    pub(crate) fn last_message(&self) -> Option<String> {
        self.script().last_message.clone()
    }

    pub(crate) fn last_history(&self) -> Vec<HistoryEntry> {
        self.script().last_history.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, _text: &str) -> Result<QueryResponse, BackendError> {
        self.script()
            .query
            .clone()
            .unwrap_or_else(|| Err(unreachable_backend()))
    }

    async fn chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        _model: Option<&str>,
    ) -> Result<ChatReply, BackendError> {
        let mut script = self.script();
        script.chat_calls += 1;
        script.last_message = Some(message.to_string());
        script.last_history = history.to_vec();
        script.replies.pop_front().ok_or_else(unreachable_backend)
    }

    async fn stream_chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
        _model: Option<&str>,
    ) -> Result<ByteStream, BackendError> {
        let mut script = self.script();
        script.stream_calls += 1;
        script.last_message = Some(message.to_string());
        script.last_history = history.to_vec();

        let chunks = script.stream.clone().ok_or_else(unreachable_backend)?;
        let body = futures::stream::iter(chunks);
        if script.hang {
            Ok(Box::pin(body.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(body))
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.script()
            .models
            .clone()
            .unwrap_or_else(|| Err(unreachable_backend()))
    }
}

/// Sink that keeps every operation it sees.
#[derive(Default)]
pub(crate) struct RecordingSink {
    ops: Mutex<Vec<MessageOp>>,
}

impl RecordingSink {
    pub(crate) fn ops(&self) -> Vec<MessageOp> {
        self.ops.lock().unwrap().clone()
    }
}

impl ConversationSink for RecordingSink {
    fn on_op(&self, op: &MessageOp, _conversation: &Conversation) {
        self.ops.lock().unwrap().push(op.clone());
    }
}
