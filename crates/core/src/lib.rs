// ChatDB Core - 流式对话核心
//!
//! 包含：
//! - Message: 对话消息模型与消息列表
//! - Stream: 帧解码与事件分类
//! - Assembler: 流式消息组装状态机
//! - Separator: 思考过程 / 回复内容分离
//! - Presentation: 长消息折叠与预览
//! - Config: YAML 配置与环境变量覆盖

pub mod assembler;
pub mod config;
pub mod message;
pub mod presentation;
pub mod separator;
pub mod stream;

pub use assembler::{AssemblyState, StreamSession};
pub use config::{ChatConfig, ChatConfigLoader, ChatSettings, ConfigError, ServerConfig};
pub use message::{
    Conversation, ConversationMessage, GREETING, HistoryEntry, MessageBody, MessageId,
    MessageOp, MessageRole, MessageType,
};
pub use presentation::{CollapsePolicy, DEFAULT_COLLAPSE_THRESHOLD};
pub use separator::{Separation, separate};
pub use stream::{Frame, FrameDecoder, StreamEvent, classify, decode_frames};
