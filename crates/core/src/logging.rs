//! Logging setup built on the tracing ecosystem.
//!
//! # Environment Variables
//!
//! - `MURMUR_LOG`: Filter directive (like `RUST_LOG`), e.g., `murmur_stream=debug`
//! - `MURMUR_LOG_FORMAT`: Output format for stderr: `pretty`, `json`, `compact`
//! - `MURMUR_LOG_DIR`: Directory for file logs (default `~/.murmur/logs/`)
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! level = "warn"
//! format = "pretty"
//!
//! [logging.file]
//! enabled = false
//! level = "debug"
//!
//! [logging.privacy]
//! log_content = "truncate"
//! truncate_length = 120
//! ```
//!
//! # Example
//!
//! ```no_run
//! use murmur_core::logging;
//!
//! let _guard = logging::init_logging(None)?;
//! # Ok::<(), murmur_core::Error>(())
//! ```

use crate::Error;
use crate::config::{FileLoggingConfig, LoggingConfig as ConfigLoggingConfig};
use std::env;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format for stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Pretty, human-readable output with colors (default for TTY)
    #[default]
    Pretty,
    /// JSON output (one line per event)
    Json,
    /// Compact, single-line output
    Compact,
}

impl LogFormat {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

/// How message text (prompts, deltas, replies) appears in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentLogging {
    /// Replace content with a placeholder
    None,
    /// Keep the first `truncate_length` chars
    #[default]
    Truncate,
    /// Log everything verbatim
    Full,
}

impl ContentLogging {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(ContentLogging::None),
            "truncate" => Some(ContentLogging::Truncate),
            "full" => Some(ContentLogging::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentLogging::None => "none",
            ContentLogging::Truncate => "truncate",
            ContentLogging::Full => "full",
        }
    }
}

impl FromStr for ContentLogging {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentLogging::parse_str(s).ok_or_else(|| format!("invalid content logging: {}", s))
    }
}

/// Resolved logging settings, built from the `[logging]` config section.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// File logging, when enabled
    pub file: Option<FileLoggingConfig>,
    pub privacy: PrivacyConfig,
}

/// Controls how conversation text is rendered into log events.
#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    pub log_content: ContentLogging,
    pub truncate_length: usize,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self { log_content: ContentLogging::default(), truncate_length: 120 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: LogFormat::default(), file: None, privacy: PrivacyConfig::default() }
    }
}

impl From<ConfigLoggingConfig> for LoggingConfig {
    fn from(config: ConfigLoggingConfig) -> Self {
        let format = LogFormat::parse_str(&config.format).unwrap_or_default();
        let log_content = ContentLogging::parse_str(&config.privacy.log_content).unwrap_or_default();

        Self {
            level: config.level,
            format,
            file: if config.file.enabled { Some(config.file) } else { None },
            privacy: PrivacyConfig { log_content, truncate_length: config.privacy.truncate_length },
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_logging(mut self, config: FileLoggingConfig) -> Self {
        self.file = Some(config);
        self
    }

    pub fn with_privacy(mut self, config: PrivacyConfig) -> Self {
        self.privacy = config;
        self
    }

    /// `MURMUR_LOG`, then `RUST_LOG`, then the configured level
    fn build_env_filter(&self) -> EnvFilter {
        let filter = env::var("MURMUR_LOG")
            .ok()
            .or_else(|| env::var("RUST_LOG").ok())
            .unwrap_or_else(|| self.level.clone());

        EnvFilter::new(filter)
    }

    /// File output has its own level, independent of `MURMUR_LOG`
    fn build_file_filter(file: &FileLoggingConfig) -> EnvFilter {
        EnvFilter::new(&file.level)
    }

    fn is_tty() -> bool {
        atty::is(atty::Stream::Stderr)
    }

    fn detect_format(&self) -> LogFormat {
        if let Ok(fmt_str) = env::var("MURMUR_LOG_FORMAT")
            && let Some(fmt) = LogFormat::parse_str(&fmt_str)
        {
            return fmt;
        }

        if Self::is_tty() { self.format } else { LogFormat::Compact }
    }

    fn get_log_dir() -> Result<PathBuf, Error> {
        if let Ok(custom_dir) = env::var("MURMUR_LOG_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;

        Ok(PathBuf::from(home).join(".murmur").join("logs"))
    }
}

/// Install the global tracing subscriber.
///
/// Stderr output uses the detected format and the env/config filter; file output (when enabled)
/// is JSON, rotated daily, and filtered by `[logging.file] level`.
/// The returned guard flushes the file writer on drop and must be held for the process lifetime.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<Option<WorkerGuard>, Error> {
    let config = config.unwrap_or_default();
    let env_filter = config.build_env_filter();
    let format = config.detect_format();

    let stderr_layer = match format {
        LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(io::stderr).boxed(),
    };

    let registry = Registry::default().with(stderr_layer.with_filter(env_filter));

    if let Some(file) = &config.file {
        let log_dir = LoggingConfig::get_log_dir()?;
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;

        let file_appender = tracing_appender::rolling::daily(log_dir, "murmur.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_filter(LoggingConfig::build_file_filter(file)),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
        return Ok(Some(guard));
    }

    registry
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
    Ok(None)
}

/// Render message text for a log event according to privacy settings.
pub fn redact_content(content: &str, privacy: &PrivacyConfig) -> String {
    match privacy.log_content {
        ContentLogging::None => format!("[REDACTED {} chars]", content.chars().count()),
        ContentLogging::Truncate => {
            let total = content.chars().count();
            if total <= privacy.truncate_length {
                return content.to_string();
            }
            let mut truncated = content.chars().take(privacy.truncate_length).collect::<String>();
            truncated.push_str("...");
            truncated.push_str(&format!(" ({} total chars)", total));
            truncated
        }
        ContentLogging::Full => content.to_string(),
    }
}

/// Replace the home directory prefix with `~` for logging.
pub fn sanitize_path(path: &std::path::Path) -> String {
    if let Ok(home) = env::var("HOME")
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        return format!("~/{}", stripped.display());
    }

    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::parse_str("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse_str("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse_str("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse_str("invalid"), None);
    }

    #[test]
    fn test_content_logging_from_str() {
        assert_eq!("none".parse::<ContentLogging>(), Ok(ContentLogging::None));
        assert_eq!("TRUNCATE".parse::<ContentLogging>(), Ok(ContentLogging::Truncate));
        assert_eq!("full".parse::<ContentLogging>(), Ok(ContentLogging::Full));
        assert!("loud".parse::<ContentLogging>().is_err());
    }

    #[test]
    fn test_from_config_section() {
        let mut section = ConfigLoggingConfig::default();
        section.format = "json".to_string();
        section.privacy.log_content = "none".to_string();
        section.file.enabled = true;

        let config = LoggingConfig::from(section);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.privacy.log_content, ContentLogging::None);
        assert!(config.file.is_some());
    }

    #[test]
    fn test_from_config_section_falls_back_on_unknown_values() {
        let mut section = ConfigLoggingConfig::default();
        section.format = "xml".to_string();
        section.privacy.log_content = "everything".to_string();

        let config = LoggingConfig::from(section);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.privacy.log_content, ContentLogging::Truncate);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level("debug")
            .with_format(LogFormat::Compact)
            .with_privacy(PrivacyConfig { log_content: ContentLogging::Full, truncate_length: 10 });

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.privacy.log_content, ContentLogging::Full);
    }

    #[test]
    fn test_redact_content_none() {
        let privacy = PrivacyConfig { log_content: ContentLogging::None, truncate_length: 100 };
        assert_eq!(redact_content("secret", &privacy), "[REDACTED 6 chars]");
    }

    #[test]
    fn test_redact_content_truncate() {
        let privacy = PrivacyConfig { log_content: ContentLogging::Truncate, truncate_length: 10 };

        assert_eq!(redact_content("short", &privacy), "short");

        let redacted = redact_content("abcdefghijklmnopqrstuvwxyz", &privacy);
        assert!(redacted.starts_with("abcdefghij..."));
        assert!(redacted.contains("26 total chars"));
    }

    #[test]
    fn test_redact_content_truncate_counts_chars() {
        let privacy = PrivacyConfig { log_content: ContentLogging::Truncate, truncate_length: 2 };
        assert_eq!(redact_content("안녕하세요", &privacy), "안녕... (5 total chars)");
    }

    #[test]
    fn test_redact_content_full() {
        let privacy = PrivacyConfig { log_content: ContentLogging::Full, truncate_length: 1 };
        let long_content = "a".repeat(200);
        assert_eq!(redact_content(&long_content, &privacy), long_content);
    }

    #[test]
    fn test_file_filter_uses_file_level() {
        let file = FileLoggingConfig { enabled: true, level: "murmur_stream=trace".to_string() };
        let filter = LoggingConfig::build_file_filter(&file);
        assert_eq!(filter.to_string(), "murmur_stream=trace");

        let config = LoggingConfig::default().with_level("error").with_file_logging(file);
        let file = config.file.as_ref().unwrap();
        assert_eq!(config.level, "error");
        assert_eq!(LoggingConfig::build_file_filter(file).to_string(), "murmur_stream=trace");
    }

    #[test]
    fn test_sanitize_path() {
        let abs_path = PathBuf::from("/var/log/test.log");
        assert_eq!(sanitize_path(&abs_path), "/var/log/test.log");

        if let Ok(home) = env::var("HOME")
            && home.starts_with('/')
            && home.len() > 1
        {
            let db = PathBuf::from(&home).join(".murmur").join("murmur.db");
            assert_eq!(sanitize_path(&db), "~/.murmur/murmur.db");
        }
    }
}
