use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Target group chat; Telegram group ids are negative
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// When set, only messages starting with this prefix are relayed,
    /// with the prefix stripped (e.g. "/post")
    #[serde(default)]
    pub command_prefix: Option<String>,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_web_sender")]
    pub web_sender: String,
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_idle_interval_secs() -> u64 {
    1
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("messages.db")
}

fn default_history_limit() -> usize {
    100
}

fn default_web_sender() -> String {
    "Web User".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            command_prefix: None,
            poll_timeout_secs: default_poll_timeout_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            web_sender: default_web_sender(),
        }
    }
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Token and chat, only when both are present
    pub fn credentials(&self) -> Option<(&str, i64)> {
        Some((self.bot_token.as_deref()?, self.chat_id?))
    }
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// Environment wins over the file. `lookup` is `std::env::var` outside tests.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("TELEGRAM_GROUP_CHAT_ID").filter(|s| !s.trim().is_empty()) {
            let parsed = chat_id
                .trim()
                .parse::<i64>()
                .with_context(|| format!("TELEGRAM_GROUP_CHAT_ID is not an integer: {chat_id}"))?;
            self.telegram.chat_id = Some(parsed);
        }
        if let Some(prefix) = lookup("TGRELAY_COMMAND_PREFIX") {
            self.telegram.command_prefix = Some(prefix);
        }
        self.normalize();
        Ok(())
    }

    // Empty strings count as unset
    fn normalize(&mut self) {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&self.telegram.bot_token) {
            self.telegram.bot_token = None;
        }
        if blank(&self.telegram.command_prefix) {
            self.telegram.command_prefix = None;
        }
    }
}
