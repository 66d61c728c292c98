//! Server configuration.
//!
//! Mirrors the teacher's `facilitator/src/config.rs`: a `clap::Parser` CLI
//! arg for the config file path, a `serde`-deserialized `Config` whose
//! fields each fall back to an environment variable and then to a hardcoded
//! default, and a `config_defaults` module holding those constants and
//! fallback functions. Unlike the teacher — whose chain RPC endpoints have
//! no sane default and so the file is mandatory — every AEEP field has an
//! ambient default, so a missing config file just means "use the defaults."

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// CLI arguments for the AEEP server.
#[derive(Parser, Debug)]
#[command(name = "aeep-server")]
#[command(about = "Agent-to-Agent Economic Exchange Protocol server")]
struct CliArgs {
    /// Path to the optional JSON configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration. Every field falls back to an environment variable,
/// then to a hardcoded default, in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Replay-protection window for envelope nonces, in seconds (§4.2).
    #[serde(default = "config_defaults::default_nonce_ttl_seconds")]
    nonce_ttl_seconds: i64,
    /// Default queued-message expiry when an envelope carries no `expires`
    /// field (§4.3).
    #[serde(default = "config_defaults::default_message_ttl_seconds")]
    message_ttl_seconds: i64,
    /// Per-agent live push-stream cap (§4.3, §5).
    #[serde(default = "config_defaults::default_max_streams_per_agent")]
    max_streams_per_agent: usize,
    /// Global live push-stream cap across all agents (§4.3, §5).
    #[serde(default = "config_defaults::default_max_streams_global")]
    max_streams_global: usize,
    /// Number of interaction hashes that trigger an immediate batch flush
    /// (§4.4).
    #[serde(default = "config_defaults::default_batch_size_threshold")]
    batch_size_threshold: usize,
    /// Milliseconds since the last flush that trigger a timed batch flush
    /// (§4.4).
    #[serde(default = "config_defaults::default_batch_time_threshold_ms")]
    batch_time_threshold_ms: u64,
    /// Seconds of missed heartbeats before an agent's availability is swept
    /// to `unknown` (§4.6).
    #[serde(default = "config_defaults::default_heartbeat_timeout_seconds")]
    heartbeat_timeout_seconds: i64,
    /// Interval, in milliseconds, between runs of each background sweep
    /// (§3.5, §9).
    #[serde(default = "config_defaults::default_sweep_interval_ms")]
    sweep_interval_ms: u64,
    /// Starting balance reported by the mock relayer, as a decimal string
    /// (§6.3). Only meaningful until a real relayer backend is wired in.
    #[serde(default = "config_defaults::default_relayer_balance")]
    relayer_starting_balance: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            nonce_ttl_seconds: config_defaults::default_nonce_ttl_seconds(),
            message_ttl_seconds: config_defaults::default_message_ttl_seconds(),
            max_streams_per_agent: config_defaults::default_max_streams_per_agent(),
            max_streams_global: config_defaults::default_max_streams_global(),
            batch_size_threshold: config_defaults::default_batch_size_threshold(),
            batch_time_threshold_ms: config_defaults::default_batch_time_threshold_ms(),
            heartbeat_timeout_seconds: config_defaults::default_heartbeat_timeout_seconds(),
            sweep_interval_ms: config_defaults::default_sweep_interval_ms(),
            relayer_starting_balance: config_defaults::default_relayer_balance(),
        }
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_NONCE_TTL_SECONDS: i64 = 24 * 60 * 60;
    pub const DEFAULT_MESSAGE_TTL_SECONDS: i64 = 24 * 60 * 60;
    pub const DEFAULT_MAX_STREAMS_PER_AGENT: usize = 3;
    pub const DEFAULT_MAX_STREAMS_GLOBAL: usize = 100;
    pub const DEFAULT_BATCH_SIZE_THRESHOLD: usize = 100;
    pub const DEFAULT_BATCH_TIME_THRESHOLD_MS: u64 = 5 * 60 * 1000;
    pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: i64 = 300;
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10 * 1000;
    pub const DEFAULT_RELAYER_BALANCE: &str = "1000.000000";

    fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    pub fn default_port() -> u16 {
        env_parsed("PORT", DEFAULT_PORT)
    }

    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    pub fn default_nonce_ttl_seconds() -> i64 {
        env_parsed("AEEP_NONCE_TTL_SECONDS", DEFAULT_NONCE_TTL_SECONDS)
    }

    pub fn default_message_ttl_seconds() -> i64 {
        env_parsed("AEEP_MESSAGE_TTL_SECONDS", DEFAULT_MESSAGE_TTL_SECONDS)
    }

    pub fn default_max_streams_per_agent() -> usize {
        env_parsed("AEEP_MAX_STREAMS_PER_AGENT", DEFAULT_MAX_STREAMS_PER_AGENT)
    }

    pub fn default_max_streams_global() -> usize {
        env_parsed("AEEP_MAX_STREAMS_GLOBAL", DEFAULT_MAX_STREAMS_GLOBAL)
    }

    pub fn default_batch_size_threshold() -> usize {
        env_parsed("AEEP_BATCH_SIZE_THRESHOLD", DEFAULT_BATCH_SIZE_THRESHOLD)
    }

    pub fn default_batch_time_threshold_ms() -> u64 {
        env_parsed("AEEP_BATCH_TIME_THRESHOLD_MS", DEFAULT_BATCH_TIME_THRESHOLD_MS)
    }

    pub fn default_heartbeat_timeout_seconds() -> i64 {
        env_parsed("AEEP_HEARTBEAT_TIMEOUT_SECONDS", DEFAULT_HEARTBEAT_TIMEOUT_SECONDS)
    }

    pub fn default_sweep_interval_ms() -> u64 {
        env_parsed("AEEP_SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS)
    }

    pub fn default_relayer_balance() -> String {
        env::var("AEEP_RELAYER_STARTING_BALANCE").unwrap_or_else(|_| DEFAULT_RELAYER_BALANCE.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn nonce_ttl_seconds(&self) -> i64 {
        self.nonce_ttl_seconds
    }

    pub fn message_ttl_seconds(&self) -> i64 {
        self.message_ttl_seconds
    }

    pub fn max_streams_per_agent(&self) -> usize {
        self.max_streams_per_agent
    }

    pub fn max_streams_global(&self) -> usize {
        self.max_streams_global
    }

    pub fn batching_config(&self) -> aeep_core::BatchingConfig {
        aeep_core::BatchingConfig {
            size_threshold: self.batch_size_threshold,
            time_threshold_ms: self.batch_time_threshold_ms,
        }
    }

    pub fn heartbeat_timeout_seconds(&self) -> i64 {
        self.heartbeat_timeout_seconds
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn relayer_starting_balance(&self) -> &str {
        &self.relayer_starting_balance
    }

    /// Loads configuration from the CLI-selected file, falling back to
    /// every-field-default when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        match Path::new(&cli_args.config).canonicalize() {
            Ok(path) => Self::load_from_path(path),
            Err(_) => Ok(Config::default()),
        }
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs_read_to_string(&path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

fn fs_read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))
}
