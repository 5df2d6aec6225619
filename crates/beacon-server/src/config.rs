//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ingestion path settings (storage retry and timeout).
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Per-subscriber delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Subscriber session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Rate limiting settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Demo deployment settings.
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. `:memory:` gives an ephemeral store.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "beacon_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Ingestion path configuration.
///
/// Transient storage failures (write contention, pool exhaustion) are
/// retried with exponential backoff; the overall persistence call is bounded
/// by `op_timeout_ms` so a wedged store surfaces as a storage error instead
/// of hanging the request.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Maximum persistence attempts before surfacing a storage error.
    #[serde(default = "default_ingest_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts, in milliseconds. Doubles per retry.
    #[serde(default = "default_ingest_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single persistence call, in milliseconds.
    #[serde(default = "default_ingest_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

/// Per-subscriber delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Delivery attempts per subscriber before the session is dropped.
    #[serde(default = "default_delivery_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between delivery attempts, in milliseconds.
    #[serde(default = "default_delivery_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single delivery attempt, in milliseconds.
    #[serde(default = "default_delivery_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

/// Subscriber session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Interval between server heartbeat frames, in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Consecutive unanswered heartbeats before the session is disconnected.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,
}

/// Rate limiting configuration. Limits are per client IP per minute.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Default request limit.
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,

    /// Limit for incident report submissions.
    #[serde(default = "default_report_rate_limit")]
    pub report_limit: u32,
}

/// Demo deployment configuration.
///
/// When `seed` is set, a handful of sample incidents are created at startup
/// (only into an empty store). Combined with `database.path = ":memory:"`
/// this yields a fully self-contained demo backend behind the exact same
/// interfaces as a production deployment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoConfig {
    /// Seed sample incidents at startup.
    #[serde(default)]
    pub seed: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "beacon.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ingest_max_attempts() -> u32 {
    3
}

fn default_ingest_retry_backoff_ms() -> u64 {
    50
}

fn default_ingest_op_timeout_ms() -> u64 {
    5_000
}

fn default_delivery_max_attempts() -> u32 {
    3
}

fn default_delivery_retry_backoff_ms() -> u64 {
    25
}

fn default_delivery_attempt_timeout_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

fn default_max_missed_heartbeats() -> u32 {
    3
}

fn default_rate_limit() -> u32 {
    120
}

fn default_report_rate_limit() -> u32 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_ingest_max_attempts(),
            retry_backoff_ms: default_ingest_retry_backoff_ms(),
            op_timeout_ms: default_ingest_op_timeout_ms(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_delivery_max_attempts(),
            retry_backoff_ms: default_delivery_retry_backoff_ms(),
            attempt_timeout_ms: default_delivery_attempt_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: default_rate_limit(),
            report_limit: default_report_rate_limit(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `BEACON_HOST` overrides `server.host`
/// - `BEACON_PORT` overrides `server.port`
/// - `BEACON_DB_PATH` overrides `database.path`
/// - `BEACON_LOG_LEVEL` overrides `logging.level`
/// - `BEACON_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `BEACON_DEMO` overrides `demo.seed` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("BEACON_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("BEACON_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("BEACON_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("BEACON_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("BEACON_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(demo) = std::env::var("BEACON_DEMO") {
        config.demo.seed = demo == "true" || demo == "1";
    }

    Ok(config)
}
