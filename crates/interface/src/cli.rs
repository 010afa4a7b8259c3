//! CLI - Command Line Interface
//!
//! Available Commands:
//! - chatdb chat [-m "question"]  - Ask once, or start the REPL
//! - chatdb query "question"      - Natural language → SQL only
//! - chatdb models                - List backend models

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::info;

use chatdb_core::{ChatConfig, ChatConfigLoader, ConfigError};

use crate::backend::{BackendError, ChatBackend, HttpBackend};
use crate::chat::{AskOutcome, ChatController, ChatError};
use crate::render::{TerminalSink, format_query_error, format_query_result};
use crate::repl::{ReplConfig, run_repl};

/// CLI Errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
}

/// ChatDB CLI
#[derive(Parser, Debug)]
#[command(name = "chatdb")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Config file (default: .chatdb/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Model to use
    #[arg(short = 'M', long, global = true)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Ask a question (one-shot or interactive)
    Chat(ChatArgs),

    /// Translate a question to SQL and run it
    Query(QueryArgs),

    /// List available models
    Models,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ChatArgs {
    /// Question to ask; starts the REPL when omitted
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Args, Debug)]
pub(crate) struct QueryArgs {
    /// Natural-language question
    pub text: String,
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt::init();
    }

    let config = load_config(&cli)?;

    match cli.command {
        Some(Commands::Chat(args)) => cmd_chat(args, config).await,
        Some(Commands::Query(args)) => cmd_query(args, &config).await,
        Some(Commands::Models) => cmd_models(config).await,
        None => cmd_chat(ChatArgs::default(), config).await,
    }
}

fn load_config(cli: &Cli) -> Result<ChatConfig, CliError> {
    let mut loader = ChatConfigLoader::new();
    loader.load(cli.config.as_deref())?;
    let mut config = loader.into_config();

    if let Some(base_url) = &cli.base_url {
        config.server.base_url = base_url.clone();
    }
    if let Some(model) = &cli.model {
        config.chat.model = Some(model.clone());
    }
    config.validate()?;
    Ok(config)
}

fn controller(config: &ChatConfig) -> Result<ChatController, CliError> {
    let backend: Arc<dyn ChatBackend> = Arc::new(HttpBackend::new(&config.server)?);
    Ok(ChatController::new(backend, &config.chat))
}

async fn cmd_chat(args: ChatArgs, mut config: ChatConfig) -> Result<(), CliError> {
    if args.no_stream {
        config.chat.stream = false;
    }
    let sink = Arc::new(TerminalSink::new(io::stdout()));
    let chat = controller(&config)?.with_sink(sink);

    match args.message {
        Some(message) => {
            info!("Running one-shot: {}", message);
            let outcome = chat.ask(&message).await?;
            if outcome != AskOutcome::Ignored {
                println!();
            }
            Ok(())
        }
        None => {
            info!("Starting REPL...");
            run_repl(chat, ReplConfig::default()).await;
            Ok(())
        }
    }
}

async fn cmd_query(args: QueryArgs, config: &ChatConfig) -> Result<(), CliError> {
    let backend = HttpBackend::new(&config.server)?;
    let response = backend.send(&args.text).await?;

    match (response.sql, response.error) {
        (Some(sql), Some(error)) if !sql.trim().is_empty() => {
            println!("{}", format_query_error(&sql, &error));
        }
        (Some(sql), None) if !sql.trim().is_empty() => {
            println!("{}", format_query_result(&sql, response.rows.as_deref()));
        }
        _ => println!("未能为该问题生成 SQL"),
    }
    Ok(())
}

async fn cmd_models(config: ChatConfig) -> Result<(), CliError> {
    let chat = controller(&config)?;
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
    Ok(())
}
