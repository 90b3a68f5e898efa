//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`, held as `SecretString` so
//! they never land in logs.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub signals: SignalsConfig,
    pub settlement: SettlementConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. "sqlite://linesmith.db".
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Provider sport keys to poll, e.g. ["basketball_nba"].
    pub sports: Vec<String>,
    /// Provider regions parameter.
    pub regions: String,
    pub interval_secs: u64,
    /// Quotes older than this when a batch arrives count as stale;
    /// a majority-stale batch is rejected whole.
    pub staleness_minutes: i64,
    /// Env var holding The Odds API key.
    pub odds_api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalsConfig {
    /// |open − close| line movement that counts as beating the close
    /// on spread/total markets.
    pub clv_points_threshold: f64,
    pub steam_min_bookmakers: usize,
    pub steam_min_points: f64,
    pub steam_min_cents: i32,
    pub steam_window_minutes: i64,
    pub rlm_lookback_minutes: i64,
    pub rlm_min_prob_move: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    pub sweep_interval_secs: u64,
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

impl IngestConfig {
    /// The odds API key, if its env var is set.
    pub fn odds_api_key(&self) -> Option<SecretString> {
        std::env::var(&self.odds_api_key_env)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }
}
