use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::session_id::SessionId;

/// Placeholder substituted with the session id in endpoint paths
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// How the generation endpoint frames its streamed body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Line-oriented `data: <payload>` events (default)
    #[default]
    Sse,
    /// Plain chunked text; every chunk is a frame
    Raw,
}

impl Framing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framing::Sse => "sse",
            Framing::Raw => "raw",
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Framing {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sse" => Ok(Framing::Sse),
            "raw" => Ok(Framing::Raw),
            _ => Err(crate::Error::Config(ConfigError::InvalidFraming(s.to_string()).to_string())),
        }
    }
}

/// Which transport carries requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Real HTTP via reqwest (default)
    #[default]
    Http,
    /// Scripted responses loaded from `responses_file`
    Mock,
}

/// Generation and history endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Scheme + host (+ port) of the backend, e.g. `http://localhost:8000`
    pub base_url: String,

    /// Chat generation path; `{session}` is replaced by the session id
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// History lookup path; `{session}` is replaced by the session id
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// Translation stream path
    #[serde(default = "default_translate_path")]
    pub translate_path: String,

    /// Body framing of the streamed responses
    #[serde(default)]
    pub framing: Framing,
}

fn default_chat_path() -> String {
    "/api/chat/{session}".to_string()
}

fn default_history_path() -> String {
    "/api/history/{session}".to_string()
}

fn default_translate_path() -> String {
    "/api/translate/stream-sse".to_string()
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            chat_path: default_chat_path(),
            history_path: default_history_path(),
            translate_path: default_translate_path(),
            framing: Framing::default(),
        }
    }

    pub fn chat_url(&self, session_id: &SessionId) -> String {
        self.join(&self.chat_path.replace(SESSION_PLACEHOLDER, session_id.as_str()))
    }

    pub fn history_url(&self, session_id: &SessionId) -> String {
        self.join(&self.history_path.replace(SESSION_PLACEHOLDER, session_id.as_str()))
    }

    pub fn translate_url(&self) -> String {
        self.join(&self.translate_path)
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Backoff policy for resilient streams
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Retry dropped chat streams (translation streams always retry)
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total attempts before giving up
    #[serde(default = "default_budget")]
    pub budget: u32,
}

fn default_true() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_budget() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            budget: default_budget(),
        }
    }
}

/// Where transcripts live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file for the durable store; in-memory when absent
    #[serde(default)]
    pub durable_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Durable path with a leading `~/` expanded against `$HOME`
    pub fn resolved_durable_path(&self) -> Option<PathBuf> {
        let path = self.durable_path.as_ref()?;
        if let Ok(rest) = path.strip_prefix("~")
            && let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))
        {
            return Some(Path::new(&home).join(rest));
        }
        Some(path.clone())
    }
}

/// Transport selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// TOML script used when `kind = "mock"`
    #[serde(default)]
    pub responses_file: Option<PathBuf>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default)]
    pub file: FileLoggingConfig,

    #[serde(default)]
    pub privacy: PrivacyLoggingConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: FileLoggingConfig::default(),
            privacy: PrivacyLoggingConfig::default(),
        }
    }
}

/// `[logging.file]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_file_log_level")]
    pub level: String,
}

fn default_file_log_level() -> String {
    "debug".to_string()
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: default_file_log_level() }
    }
}

/// `[logging.privacy]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyLoggingConfig {
    /// `none`, `truncate` or `full`
    #[serde(default = "default_log_content")]
    pub log_content: String,

    #[serde(default = "default_truncate_length")]
    pub truncate_length: usize,
}

fn default_log_content() -> String {
    "truncate".to_string()
}

fn default_truncate_length() -> usize {
    120
}

impl Default for PrivacyLoggingConfig {
    fn default() -> Self {
        Self { log_content: default_log_content(), truncate_length: default_truncate_length() }
    }
}

/// Root configuration structure for murmur.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| crate::Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        use crate::Error;

        let base = &self.endpoint.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::Config(ConfigError::InvalidBaseUrl(base.clone()).to_string()));
        }

        for (name, path) in [
            ("chat_path", &self.endpoint.chat_path),
            ("history_path", &self.endpoint.history_path),
            ("translate_path", &self.endpoint.translate_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(ConfigError::InvalidPath(name.to_string()).to_string()));
            }
        }

        if self.reconnect.budget == 0 {
            return Err(Error::Config(ConfigError::ZeroBudget.to_string()));
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(Error::Config(ConfigError::DelayOrder.to_string()));
        }

        if self.transport.kind == TransportKind::Mock && self.transport.responses_file.is_none() {
            return Err(Error::Config(ConfigError::MissingResponsesFile.to_string()));
        }

        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# murmur configuration

[endpoint]
# Backend serving the generation and history endpoints
base_url = "http://localhost:8000"
# `{session}` is replaced with the conversation id
chat_path = "/api/chat/{session}"
history_path = "/api/history/{session}"
translate_path = "/api/translate/stream-sse"
# "sse" for `data: ...` lines, "raw" for plain chunked text
framing = "sse"

[reconnect]
enabled = true
base_delay_ms = 1000
max_delay_ms = 30000
budget = 5

[storage]
# Remove to keep transcripts in memory only
durable_path = "~/.murmur/transcripts.db"

[transport]
# "http" or "mock"
kind = "http"
# responses_file = "mock_responses.toml"

[logging]
level = "warn"
format = "pretty"

[logging.file]
enabled = false
level = "debug"

[logging.privacy]
# "none", "truncate" or "full"
log_content = "truncate"
truncate_length = 120
"#
    }
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("base_url must start with http:// or https://: {0}")]
    InvalidBaseUrl(String),

    #[error("{0} must start with '/'")]
    InvalidPath(String),

    #[error("invalid framing: {0}")]
    InvalidFraming(String),

    #[error("reconnect budget must be at least 1")]
    ZeroBudget,

    #[error("reconnect max_delay_ms must not be smaller than base_delay_ms")]
    DelayOrder,

    #[error("transport kind \"mock\" requires responses_file")]
    MissingResponsesFile,

    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}
