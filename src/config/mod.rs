//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::game::ElectionPolicy;
use crate::store::RecordId;
use crate::util::time::{DEFAULT_TICK_RATE, MAX_TICK_RATE};

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Allowed client origins for CORS, any origin when empty
    pub client_origins: Vec<String>,

    /// Participant ticks per second
    pub tick_rate: u32,
    /// One-way delay the sync hub applies to every operation
    pub replication_latency: Duration,
    pub election_policy: ElectionPolicy,

    /// Headless participants started with the server
    pub sim_bots: usize,
    /// Session the bots join; they create one when unset
    pub sim_game_id: Option<RecordId>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        let election_policy = match var("ELECTION_POLICY") {
            Some(policy) => policy
                .parse()
                .map_err(|_| ConfigError::Invalid("ELECTION_POLICY"))?,
            None => ElectionPolicy::default(),
        };

        let tick_rate = parse_or(&var, "TICK_RATE", DEFAULT_TICK_RATE)?;
        if !(1..=MAX_TICK_RATE).contains(&tick_rate) {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }

        let sim_game_id = match var("SIM_GAME_ID") {
            Some(id) => Some(id.parse().map_err(|_| ConfigError::Invalid("SIM_GAME_ID"))?),
            None => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            client_origins: var("CLIENT_ORIGIN")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            tick_rate,
            replication_latency: Duration::from_millis(parse_or(
                &var,
                "REPLICATION_LATENCY_MS",
                50,
            )?),
            election_policy,

            sim_bots: parse_or(&var, "SIM_BOTS", 0)?,
            sim_game_id,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
