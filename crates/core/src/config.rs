//! ChatDB 配置系统
//!
//! 支持 YAML 配置文件和环境变量

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::presentation::{CollapsePolicy, DEFAULT_COLLAPSE_THRESHOLD};

/// Default project-local config file.
pub const DEFAULT_CONFIG_PATH: &str = ".chatdb/config.yaml";

pub const ENV_BASE_URL: &str = "CHATDB_BASE_URL";
pub const ENV_TOKEN: &str = "CHATDB_TOKEN";
pub const ENV_MODEL: &str = "CHATDB_MODEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// ChatDB 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 后端服务配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 对话配置
    #[serde(default)]
    pub chat: ChatSettings,
}

/// 后端服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API 基础 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 流式对话路径
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Bearer token (可选)
    pub token: Option<String>,

    /// 请求超时 (秒)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:5001/api".to_string()
}

fn default_stream_path() -> String {
    "/chat/stream".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 对话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// 默认模型 (为空时使用模型列表中的第一个)
    pub model: Option<String>,

    /// 长消息折叠阈值 (字符)
    #[serde(default = "default_collapse_threshold")]
    pub collapse_threshold: usize,

    /// 模型加载重试次数
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// 重试间隔 (毫秒)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// 是否使用流式响应
    #[serde(default = "default_true")]
    pub stream: bool,
}

fn default_collapse_threshold() -> usize {
    DEFAULT_COLLAPSE_THRESHOLD
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: None,
            collapse_threshold: default_collapse_threshold(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            stream: true,
        }
    }
}

impl ChatSettings {
    pub fn collapse_policy(&self) -> CollapsePolicy {
        CollapsePolicy::new(self.collapse_threshold)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl ChatConfig {
    /// Validate all numeric fields are within sane ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url is empty".to_string()));
        }
        if !self.server.stream_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.stream_path must start with '/', got {}",
                self.server.stream_path
            )));
        }
        if self.server.timeout_secs == 0 || self.server.timeout_secs > 3600 {
            return Err(ConfigError::Invalid(format!(
                "server.timeout_secs must be 1..=3600, got {}",
                self.server.timeout_secs
            )));
        }
        if self.chat.collapse_threshold == 0 {
            return Err(ConfigError::Invalid(
                "chat.collapse_threshold must be positive".to_string(),
            ));
        }
        if self.chat.retry_attempts == 0 || self.chat.retry_attempts > 10 {
            return Err(ConfigError::Invalid(format!(
                "chat.retry_attempts must be 1..=10, got {}",
                self.chat.retry_attempts
            )));
        }
        Ok(())
    }
}

/// Loads `ChatConfig` from YAML and applies environment overrides.
#[derive(Debug, Default)]
pub struct ChatConfigLoader {
    config: ChatConfig,
}

impl ChatConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn into_config(self) -> ChatConfig {
        self.config
    }

    /// Load from `path`, or from the default location when it exists.
    /// A missing default file is not an error.
    pub fn load(&mut self, path: Option<&Path>) -> Result<&ChatConfig, ConfigError> {
        let config = match path {
            Some(path) => Self::read_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::read_file(default_path)?
                } else {
                    debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
                    ChatConfig::default()
                }
            }
        };
        self.config = config;
        self.apply_env(|key| std::env::var(key).ok());
        self.config.validate()?;
        Ok(&self.config)
    }

    fn read_file(path: &Path) -> Result<ChatConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ChatConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// `load`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.config.server.base_url = base_url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.config.server.token = Some(token);
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.is_empty()) {
            self.config.chat.model = Some(model);
        }
    }
}
