//! Typed configuration.
//!
//! Process-level values come from environment variables and fail fast when a
//! required one is missing; queue tuning comes from an optional TOML file
//! (see [`settings`]). The database URL is wrapped in `SecretString` so it
//! never lands in logs.

pub mod settings;

pub use settings::{MonitorSettings, QueueSettings, RegistrySettings, Settings};

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Path to the queue settings TOML file, if any.
    pub settings_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            settings_path: optional_var("WORKQ_CONFIG").map(PathBuf::from),
        })
    }

    /// Queue settings from `WORKQ_CONFIG`, or the built-in defaults.
    pub fn settings(&self) -> Result<Settings> {
        match self.settings_path {
            Some(ref path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
