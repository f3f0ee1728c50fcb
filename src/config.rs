//! Configuration management with YAML support

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub redirect: RedirectConfig,

    #[serde(default)]
    pub attribution: AttributionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Extra attempts for writes that hit a busy/locked database
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Bot API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Usually left empty and supplied through TELEGRAM_BOT_TOKEN
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// HTTP timeout for getUpdates; must exceed poll_timeout_secs
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// HTTP timeout for every other call (sendMessage, answerCallbackQuery)
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

/// How the greeting control leads to the destination bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectMode {
    /// Plain URL button, clicks are never reported back
    Link,
    /// Callback button, answered with an open-url acknowledgement
    OpenUrl,
    /// Callback button, answered and followed by a message with the link
    FollowUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_destination_url")]
    pub destination_url: String,

    #[serde(default = "default_mode")]
    pub mode: RedirectMode,

    #[serde(default = "default_control_token")]
    pub control_token: String,

    #[serde(default = "default_greeting_text")]
    pub greeting_text: String,

    #[serde(default = "default_button_text")]
    pub button_text: String,

    #[serde(default = "default_follow_up_text")]
    pub follow_up_text: String,

    /// Toast shown when acknowledging in follow_up mode; None = silent
    #[serde(default)]
    pub ack_toast: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// 0 disables debouncing: every activation is logged
    #[serde(default)]
    pub debounce_ms: u64,

    #[serde(default)]
    pub allow_list: AllowListConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowListConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default = "default_relabel")]
    pub relabel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/refgate/refgate.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_pool_size() -> u32 {
    4
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    75
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_destination_url() -> String {
    "https://t.me/volgogradVPN_bot".to_string()
}

fn default_mode() -> RedirectMode {
    RedirectMode::Link
}

fn default_control_token() -> String {
    "open_main".to_string()
}

fn default_greeting_text() -> String {
    "🖐️Привет! Высокоскоростное подключение к любым сайтам и бесперебойная работа всего в 1 шаге от тебя!\n\n\
     Запускай основного бота ниже и пользуйся сервисом 5 ДНЕЙ на 3 УСТРОЙСТВАХ без ограничений в скорости и качестве!🤩"
        .to_string()
}

fn default_button_text() -> String {
    "🔥Запустить основного бота".to_string()
}

fn default_follow_up_text() -> String {
    "Основной бот: {url}".to_string()
}

fn default_relabel() -> String {
    "other".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            destination_url: default_destination_url(),
            mode: default_mode(),
            control_token: default_control_token(),
            greeting_text: default_greeting_text(),
            button_text: default_button_text(),
            follow_up_text: default_follow_up_text(),
            ack_toast: None,
        }
    }
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keywords: Vec::new(),
            relabel: default_relabel(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RedirectConfig {
    /// Follow-up text with `{url}` substituted
    pub fn follow_up_message(&self) -> String {
        self.follow_up_text.replace("{url}", &self.destination_url)
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./refgate.yaml (current directory)
    /// 3. ~/.config/refgate/refgate.yaml
    ///
    /// Environment overrides (TELEGRAM_BOT_TOKEN, DATABASE_PATH) are applied last.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "refgate.yaml".to_string(),
            shellexpand::tilde("~/.config/refgate/refgate.yaml").to_string(),
        ];

        let mut config = Config::default();
        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content =
                    std::fs::read_to_string(search_path).map_err(|source| ConfigError::Read {
                        path: search_path.clone(),
                        source,
                    })?;
                config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: search_path.clone(),
                    source,
                })?;
                break;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.token = token.trim().to_string();
        }
        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            self.database.path = path;
        }
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Settings every command needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.redirect.destination_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid("redirect.destination_url is empty".into()));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Invalid(format!(
                "redirect.destination_url must be an http(s) URL, got {url}"
            )));
        }

        let token = &self.redirect.control_token;
        if token.is_empty() {
            return Err(ConfigError::Invalid("redirect.control_token is empty".into()));
        }
        // callback_data is capped at 64 bytes by the Bot API
        if token.len() > 64 {
            return Err(ConfigError::Invalid(
                "redirect.control_token exceeds 64 bytes".into(),
            ));
        }

        if self.telegram.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid("telegram.send_timeout_secs must be at least 1".into()));
        }
        if self.telegram.request_timeout_secs <= self.telegram.poll_timeout_secs {
            return Err(ConfigError::Invalid(
                "telegram.request_timeout_secs must exceed telegram.poll_timeout_secs".into(),
            ));
        }

        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be at least 1".into()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid("database.pool_size must be at least 1".into()));
        }
        if self.attribution.allow_list.enabled && self.attribution.allow_list.relabel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "attribution.allow_list.relabel is empty".into(),
            ));
        }
        Ok(())
    }

    /// Validation for the `run` command, which also needs a bot token
    pub fn validate_for_bot(&self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "TELEGRAM_BOT_TOKEN is empty (set it in the environment or telegram.token)".into(),
            ));
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.redirect.mode, RedirectMode::Link);
        assert_eq!(config.redirect.control_token, "open_main");
        assert_eq!(config.attribution.debounce_ms, 0);
        assert!(!config.attribution.allow_list.enabled);
        assert_eq!(config.attribution.allow_list.relabel, "other");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bot_requires_token() {
        let config = Config::default();
        assert!(matches!(
            config.validate_for_bot(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some(" 123:abc \n".to_string()),
            "DATABASE_PATH" => Some("/tmp/refgate-test.db".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/refgate-test.db"));
        assert!(config.validate_for_bot().is_ok());
    }

    #[test]
    fn test_rejects_bad_destination() {
        let mut config = Config::default();
        config.redirect.destination_url = "t.me/somebot".into();
        assert!(config.validate().is_err());

        config.redirect.destination_url = "https://t.me/somebot".into();
        config.redirect.control_token = "x".repeat(65);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_send_timeout_is_short_and_separate() {
        let config = Config::default();
        assert_eq!(config.telegram.send_timeout_secs, 10);
        assert!(config.telegram.send_timeout_secs < config.telegram.request_timeout_secs);

        let mut config = Config::default();
        config.telegram.send_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.telegram.request_timeout_secs = config.telegram.poll_timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_follow_up_message() {
        let mut config = Config::default();
        config.redirect.destination_url = "https://t.me/main_bot".into();
        config.redirect.follow_up_text = "Go: {url}".into();
        assert_eq!(config.redirect.follow_up_message(), "Go: https://t.me/main_bot");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/refgate/test.db
  retry_attempts: 5

redirect:
  destination_url: https://t.me/main_bot
  mode: follow_up
  ack_toast: "Opening..."

attribution:
  debounce_ms: 1500
  allow_list:
    enabled: true
    keywords: [promo1, vk_ads]

logging:
  format: json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "~/.local/share/refgate/test.db");
        assert_eq!(config.database.retry_attempts, 5);
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.redirect.mode, RedirectMode::FollowUp);
        assert_eq!(config.redirect.ack_toast.as_deref(), Some("Opening..."));
        assert_eq!(config.attribution.debounce_ms, 1500);
        assert_eq!(config.attribution.allow_list.keywords, vec!["promo1", "vk_ads"]);
        assert_eq!(config.attribution.allow_list.relabel, "other");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }
}
