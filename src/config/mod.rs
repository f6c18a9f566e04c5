//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::{CombatantConfig, MatchSettings, MatchTimings};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines (`LOG_FORMAT=json`)
    pub log_json: bool,
    /// Allowed client origin for CORS, any origin when unset
    pub client_origin: Option<String>,
    /// Bearer token the hit resolver presents on damage/overlap reports.
    /// Those routes reject every call when unset.
    pub hit_resolver_token: Option<String>,

    /// Phase durations in seconds
    pub warmup_secs: f32,
    pub match_secs: f32,
    pub cooldown_secs: f32,

    pub respawn_delay_secs: f64,
    pub max_health: f32,
    pub max_players: usize,
    /// Hand each new life a random weapon
    pub starting_weapon: bool,
}

impl Default for Config {
    fn default() -> Self {
        let timings = MatchTimings::default();
        let combatant = CombatantConfig::default();
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: None,
            hit_resolver_token: None,
            warmup_secs: timings.warmup,
            match_secs: timings.match_time,
            cooldown_secs: timings.cooldown,
            respawn_delay_secs: combatant.respawn_delay,
            max_health: combatant.max_health,
            max_players: 16,
            starting_weapon: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            (None, Some(addr)) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
            (None, None) => defaults.server_addr,
        };

        let config = Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            client_origin: lookup("CLIENT_ORIGIN").filter(|o| !o.is_empty()),
            hit_resolver_token: lookup("HIT_RESOLVER_TOKEN")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            warmup_secs: parse_or(&lookup, "WARMUP_SECS", defaults.warmup_secs)?,
            match_secs: parse_or(&lookup, "MATCH_SECS", defaults.match_secs)?,
            cooldown_secs: parse_or(&lookup, "COOLDOWN_SECS", defaults.cooldown_secs)?,
            respawn_delay_secs: parse_or(&lookup, "RESPAWN_DELAY_SECS", defaults.respawn_delay_secs)?,
            max_health: parse_or(&lookup, "MAX_HEALTH", defaults.max_health)?,
            max_players: parse_or(&lookup, "MAX_PLAYERS", defaults.max_players)?,
            starting_weapon: parse_or(&lookup, "STARTING_WEAPON", defaults.starting_weapon)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [self.warmup_secs, self.match_secs, self.cooldown_secs];
        if durations.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ConfigError::Invalid("phase durations must be non-negative"));
        }
        if !self.respawn_delay_secs.is_finite() || self.respawn_delay_secs < 0.0 {
            return Err(ConfigError::Invalid("RESPAWN_DELAY_SECS must be non-negative"));
        }
        if !self.max_health.is_finite() || self.max_health <= 0.0 {
            return Err(ConfigError::Invalid("MAX_HEALTH must be positive"));
        }
        if self.max_players == 0 {
            return Err(ConfigError::Invalid("MAX_PLAYERS must be at least 1"));
        }
        Ok(())
    }

    /// Settings handed to every new match
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            timings: MatchTimings {
                warmup: self.warmup_secs,
                match_time: self.match_secs,
                cooldown: self.cooldown_secs,
            },
            combatant: CombatantConfig {
                max_health: self.max_health,
                respawn_delay: self.respawn_delay_secs,
            },
            max_players: self.max_players,
            starting_weapon: self.starting_weapon,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Parse(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
