//! ChatDB Interface - 交互层
//!
//! 职责：
//! - Backend: 数据库助手 HTTP API
//! - Chat: 对话控制器 (流式组装、取消、重试)
//! - CLI / REPL 命令行工具
//! - Render: 纯文本渲染与终端流式输出

pub mod backend;
pub mod chat;
pub mod cli;
pub mod render;
pub mod repl;
pub mod retry;

#[cfg(test)]
mod test_support;


pub use backend::{BackendError, ByteStream, ChatBackend, ChatReply, HttpBackend, QueryResponse};
pub use chat::{AskOutcome, ChatController, ChatError, ConversationSink, StreamOutcome};
pub use cli::{CliError, run_cli};
pub use render::{TerminalSink, conversation_to_plain_text, message_to_plain_text};
pub use repl::{ReplConfig, run_repl};
pub use retry::{RetryPolicy, chat_with_retry};
