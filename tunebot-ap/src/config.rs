//! Configuration management for tunebot-ap
//!
//! Two tiers:
//! 1. **TOML file**: paths, port, logging, resolver/retry/playback/transport tuning
//! 2. **Command line**: overrides for the bootstrap values (`--port`, `--database`, ...)
//!
//! Every value has a built-in default, so the service also starts without a
//! config file. The resolved `Config` is passed explicitly into the content
//! resolver, artifact cache and coordinator at construction.

use crate::error::{Error, Result};
use crate::resolver::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Raw TOML configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database and the songs directory
    pub data_folder: Option<PathBuf>,

    /// SQLite database file (default: `<data_folder>/tunebot.db`)
    pub database_path: Option<PathBuf>,

    /// Downloaded artifacts (default: `<data_folder>/songs`)
    pub songs_dir: Option<PathBuf>,

    /// HTTP control API port
    pub port: u16,

    pub logging: LoggingConfig,
    pub resolver: ResolverConfig,
    pub retry: RetryConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_folder: None,
            database_path: None,
            songs_dir: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            resolver: ResolverConfig::default(),
            retry: RetryConfig::default(),
            playback: PlaybackConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// yt-dlp invocation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Executable name or path
    pub program: String,

    /// Format selector
    pub format: String,

    /// Output file name template (relative to the songs directory)
    pub output_template: String,

    /// Netscape cookie file passed with `--cookies`
    pub cookie_file: Option<PathBuf>,

    /// Hard limit for one resolve/download
    pub timeout_secs: u64,

    /// Extra arguments appended before the reference
    pub extra_args: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "bestaudio[ext=m4a]/bestaudio/best".to_string(),
            output_template: "%(extractor)s-%(id)s-%(title)s.%(ext)s".to_string(),
            cookie_file: None,
            timeout_secs: 300,
            extra_args: Vec::new(),
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rate-limit retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 5000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            self.multiplier,
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Limit for acquiring a transport handle
    pub connect_timeout_secs: u64,

    /// Idle sessions (empty or disconnected) are dropped after this long
    pub idle_timeout_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            idle_timeout_secs: 300,
        }
    }
}

impl PlaybackConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Local player used by the command transport
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Program and leading arguments; the artifact path is appended
    pub player_command: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            player_command: vec![
                "ffplay".to_string(),
                "-nodisp".to_string(),
                "-autoexit".to_string(),
                "-loglevel".to_string(),
                "quiet".to_string(),
            ],
        }
    }
}

fn default_port() -> u16 {
    5780
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_folder: PathBuf,
    pub database_path: PathBuf,
    pub songs_dir: PathBuf,
    pub port: u16,
    pub logging: LoggingConfig,
    pub resolver: ResolverConfig,
    pub retry: RetryConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub songs_dir: Option<PathBuf>,
    pub port: Option<u16>,
}

impl Config {
    /// Load configuration from an explicit TOML file, the platform default
    /// file if one exists, or built-in defaults, then apply CLI overrides.
    ///
    /// An explicitly named file that cannot be read or parsed is an error.
    pub async fn load(toml_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let (toml_config, source) = match toml_path {
            Some(path) => (read_toml(path).await?, Some(path.to_path_buf())),
            None => match tunebot_common::config::default_config_file() {
                Ok(path) => (read_toml(&path).await?, Some(path)),
                Err(_) => (TomlConfig::default(), None),
            },
        };

        match &source {
            Some(path) => info!("Loaded TOML configuration from {:?}", path),
            None => info!("No configuration file found, using built-in defaults"),
        }

        Ok(Self::resolve(toml_config, overrides))
    }

    /// Merge TOML values, CLI overrides and defaults into final paths
    pub fn resolve(toml_config: TomlConfig, overrides: ConfigOverrides) -> Self {
        let data_folder = tunebot_common::config::resolve_data_folder(
            overrides.data_folder.as_deref(),
            tunebot_common::config::DATA_FOLDER_ENV,
            toml_config.data_folder.as_deref(),
        );

        let database_path = overrides
            .database_path
            .or(toml_config.database_path)
            .unwrap_or_else(|| data_folder.join("tunebot.db"));

        let songs_dir = overrides
            .songs_dir
            .or(toml_config.songs_dir)
            .unwrap_or_else(|| data_folder.join("songs"));

        Self {
            data_folder,
            database_path,
            songs_dir,
            port: overrides.port.unwrap_or(toml_config.port),
            logging: toml_config.logging,
            resolver: toml_config.resolver,
            retry: toml_config.retry,
            playback: toml_config.playback,
            transport: toml_config.transport,
        }
    }
}

async fn read_toml(path: &Path) -> Result<TomlConfig> {
    let toml_str = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

    toml::from_str(&toml_str).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.port, 5780);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.resolver.program, "yt-dlp");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.playback.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.transport.player_command[0], "ffplay");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000

            [retry]
            max_retries = 3

            [resolver]
            cookie_file = "cookies.txt"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff_ms, 5000);
        assert_eq!(config.resolver.cookie_file, Some(PathBuf::from("cookies.txt")));
        assert_eq!(config.resolver.format, "bestaudio[ext=m4a]/bestaudio/best");
    }

    #[test]
    fn test_cli_overrides_win() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            data_folder = "/srv/tunebot"
            database_path = "/srv/other.db"
            port = 6000
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            toml_config,
            ConfigOverrides {
                data_folder: Some(PathBuf::from("/tmp/bot")),
                port: Some(7000),
                ..Default::default()
            },
        );

        assert_eq!(config.port, 7000);
        assert_eq!(config.data_folder, PathBuf::from("/tmp/bot"));
        assert_eq!(config.database_path, PathBuf::from("/srv/other.db"));
        assert_eq!(config.songs_dir, PathBuf::from("/tmp/bot/songs"));
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_error() {
        let result = Config::load(
            Some(Path::new("/nonexistent/tunebot/config.toml")),
            ConfigOverrides::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
