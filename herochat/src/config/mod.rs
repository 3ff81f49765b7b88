//! Configuration system for the `HeroChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/herochat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::net::{ReconnectPolicy, SessionConfig};
use crate::tracker::TrackerConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to open a session was not provided.
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    tracker: TrackerFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    ws_url: Option<String>,
    http_url: Option<String>,
    user_id: Option<u64>,
    peer_id: Option<u64>,
    csrf_token: Option<String>,
    session_cookie: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_secs: Option<u64>,
}

/// `[tracker]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TrackerFileConfig {
    duplicate_window_ms: Option<u64>,
    refresh_delay_ms: Option<u64>,
    presence_refresh_delay_ms: Option<u64>,
    reconcile_interval_secs: Option<u64>,
    stale_after_secs: Option<u64>,
    presence_interval_secs: Option<u64>,
    max_content_len: Option<usize>,
    max_settled: Option<usize>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// WebSocket URL of the push channel. `None` runs fallback-only.
    pub ws_url: Option<String>,
    /// Base URL of the HTTP API.
    pub http_url: Option<String>,
    /// Local user id.
    pub user_id: Option<u64>,
    /// Conversation peer.
    pub peer_id: Option<u64>,
    /// CSRF token for HTTP requests.
    pub csrf_token: Option<String>,
    /// Session cookie for both channels.
    pub session_cookie: Option<String>,
    /// Timeout for establishing the push channel.
    pub connect_timeout: Duration,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// Channel capacity for the push event channel.
    pub channel_capacity: usize,
    /// Backoff between push channel reconnect attempts.
    pub reconnect: ReconnectPolicy,

    // -- Tracker --
    /// Delivery tracker timings and limits.
    pub tracker: TrackerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            http_url: None,
            user_id: None,
            peer_id: None,
            csrf_token: None,
            session_cookie: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/herochat/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve CLI args and env vars alone, as if no config file existed.
    ///
    /// Used when the config file is unreadable so command-line settings
    /// still apply.
    #[must_use]
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self::resolve(cli, &ConfigFile::default())
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let net = &file.network;
        let trk = &file.tracker;
        let dt = &defaults.tracker;

        let user_id = cli.user_id.or(net.user_id);

        Self {
            ws_url: cli.ws_url.clone().or_else(|| net.ws_url.clone()),
            http_url: cli.http_url.clone().or_else(|| net.http_url.clone()),
            user_id,
            peer_id: cli.peer_id.or(net.peer_id),
            csrf_token: cli.csrf_token.clone().or_else(|| net.csrf_token.clone()),
            session_cookie: cli
                .session_cookie
                .clone()
                .or_else(|| net.session_cookie.clone()),
            connect_timeout: net
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: net
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            channel_capacity: net.channel_capacity.unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectPolicy {
                initial_delay: net
                    .reconnect_initial_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: net
                    .reconnect_max_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
            },
            tracker: TrackerConfig {
                duplicate_window: trk
                    .duplicate_window_ms
                    .map_or(dt.duplicate_window, Duration::from_millis),
                refresh_delay: trk
                    .refresh_delay_ms
                    .map_or(dt.refresh_delay, Duration::from_millis),
                presence_refresh_delay: trk
                    .presence_refresh_delay_ms
                    .map_or(dt.presence_refresh_delay, Duration::from_millis),
                reconcile_interval: trk
                    .reconcile_interval_secs
                    .map_or(dt.reconcile_interval, Duration::from_secs),
                stale_after: trk
                    .stale_after_secs
                    .map_or(dt.stale_after, Duration::from_secs),
                presence_interval: trk
                    .presence_interval_secs
                    .map_or(dt.presence_interval, Duration::from_secs),
                max_content_len: trk.max_content_len.unwrap_or(dt.max_content_len),
                max_settled: trk.max_settled.unwrap_or(dt.max_settled),
                event_buffer: trk.event_buffer.unwrap_or(dt.event_buffer),
                local_user_id: user_id,
            },
        }
    }

    /// Build a [`SessionConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] if `http_url` or `peer_id` is
    /// not set.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        let http_url = self
            .http_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingSetting("http_url"))?;
        let peer_id = self.peer_id.ok_or(ConfigError::MissingSetting("peer_id"))?;

        Ok(SessionConfig {
            ws_url: self.ws_url.clone().filter(|u| !u.is_empty()),
            http_url,
            peer_id,
            csrf_token: self.csrf_token.clone(),
            session_cookie: self.session_cookie.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            channel_capacity: self.channel_capacity,
            reconnect: self.reconnect,
            tracker: self.tracker.clone(),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Delivery-status tracking chat client for HabitHero")]
pub struct CliArgs {
    /// WebSocket URL of the push channel (omit for HTTP-only mode).
    #[arg(long, env = "HEROCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL of the chat HTTP API.
    #[arg(long, env = "HEROCHAT_HTTP_URL")]
    pub http_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "HEROCHAT_USER_ID")]
    pub user_id: Option<u64>,

    /// User id of the conversation peer.
    #[arg(long, env = "HEROCHAT_PEER_ID")]
    pub peer_id: Option<u64>,

    /// CSRF token sent with HTTP requests.
    #[arg(long, env = "HEROCHAT_CSRF_TOKEN")]
    pub csrf_token: Option<String>,

    /// Session cookie (`name=value`) identifying you to the server.
    #[arg(long, env = "HEROCHAT_SESSION_COOKIE")]
    pub session_cookie: Option<String>,

    /// Path to config file (default: `~/.config/herochat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HEROCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/herochat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("herochat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
