//! REPL - 交互式对话模式
//!
//! 职责：
//! - 持续对话 (NL2SQL 优先，失败时回退到流式对话)
//! - 斜杠命令
//! - Ctrl-C 取消进行中的请求

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::chat::{AskOutcome, ChatController, ChatError};
use crate::render::conversation_to_plain_text;

/// REPL 配置
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// 提示符
    pub prompt: String,

    /// 启动时加载模型列表
    pub load_models: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "chatdb> ".to_string(),
            load_models: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    /// 清空对话，只保留问候语
    Clear,
    /// 打印完整对话
    Show,
    /// 展开 / 折叠所有长消息
    Expand,
    Models,
    Model(String),
    Unknown(String),
}

/// Parse a slash command. Plain input returns `None`.
pub fn parse_command(input: &str) -> Option<ReplCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }
    let mut parts = input.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next();

    Some(match (cmd, arg) {
        ("/help", _) => ReplCommand::Help,
        ("/exit" | "/quit", _) => ReplCommand::Exit,
        ("/clear", _) => ReplCommand::Clear,
        ("/show", _) => ReplCommand::Show,
        ("/expand" | "/collapse", _) => ReplCommand::Expand,
        ("/models", _) => ReplCommand::Models,
        ("/model", Some(name)) => ReplCommand::Model(name.to_string()),
        (other, _) => ReplCommand::Unknown(other.to_string()),
    })
}

fn show_help() {
    println!(
        r#"
Available commands:
  /help           Show this help
  /models         List available models
  /model <name>   Switch model
  /show           Print the whole conversation
  /expand         Expand or collapse long messages
  /clear          Clear the conversation
  /exit           Exit REPL

Anything else is sent as a question. Press Ctrl-C to cancel a running reply.
"#
    );
}

/// Handle one command. Returns false when the REPL should stop.
async fn handle_command(command: ReplCommand, chat: &ChatController) -> bool {
    match command {
        ReplCommand::Help => show_help(),
        ReplCommand::Exit => {
            println!("再见！");
            return false;
        }
        ReplCommand::Clear => {
            chat.clear();
            println!("对话已清空");
        }
        ReplCommand::Show => {
            println!("{}", chat.with_conversation(conversation_to_plain_text));
        }
        ReplCommand::Expand => chat.toggle_all_long(),
        ReplCommand::Models => {
            let models = chat.load_models().await;
            let selected = chat.model();
            for model in models {
                let mark = if selected.as_deref() == Some(model.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", mark, model);
            }
        }
        ReplCommand::Model(name) => {
            chat.set_model(name.clone());
            println!("已切换模型: {}", name);
        }
        ReplCommand::Unknown(cmd) => println!("Unknown command: {}", cmd),
    }
    true
}

async fn handle_input(input: &str, chat: &ChatController) {
    tokio::select! {
        result = chat.ask(input) => match result {
            Ok(AskOutcome::Ignored) => {}
            Ok(outcome) => {
                println!();
                info!("Request finished: {:?}", outcome);
            }
            Err(ChatError::Busy) => warn!("A request is already running"),
            Err(e) => {
                println!();
                error!("Request failed: {}", e);
            }
        },
        // dropping the request closes its session with a visible notice
        _ = tokio::signal::ctrl_c() => println!(),
    }
}

/// 运行 REPL
pub async fn run_repl(chat: ChatController, config: ReplConfig) {
    if config.load_models {
        chat.load_models().await;
    }

    println!(
        "ChatDB - 数据库对话助手 (model: {})\nType '/help' for commands, '/exit' to quit\n",
        chat.model().unwrap_or_else(|| "default".to_string())
    );
    chat.with_conversation(|c| {
        if let Some(greeting) = c.messages().first() {
            println!("{}\n", greeting.full_text());
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", config.prompt);
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_command(input) {
            Some(command) => {
                if !handle_command(command, &chat).await {
                    break;
                }
            }
            None => handle_input(input, &chat).await,
        }
    }

    info!("REPL exited");
}
