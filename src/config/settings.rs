//! Queue tuning loaded from TOML.
//!
//! ```toml
//! [monitor]
//! interval_secs = 15
//! batch_size = 100
//!
//! [registry]
//! grace_secs = 60
//!
//! [[queue]]
//! name = "fetch"
//! lease_secs = 300
//! base_backoff_secs = 30
//! max_attempts = 3
//! ```
//!
//! Every field has a default; a missing file section falls back to it.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::policy::RetryPolicy;

/// Name of the page-fetch queue.
pub const FETCH_QUEUE: &str = "fetch";
/// Name of the LLM derivation job queue.
pub const LLM_JOBS_QUEUE: &str = "llm_jobs";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub registry: RegistrySettings,
    #[serde(rename = "queue")]
    pub queues: Vec<QueueSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            registry: RegistrySettings::default(),
            queues: vec![
                QueueSettings::named(FETCH_QUEUE),
                QueueSettings {
                    name: LLM_JOBS_QUEUE.to_string(),
                    lease_secs: 600,
                    base_backoff_secs: 60,
                    max_attempts: 3,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    /// Upper bound on items reclaimed per statement.
    pub batch_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            batch_size: 100,
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Silence longer than this marks a worker dead.
    pub grace_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { grace_secs: 60 }
    }
}

impl RegistrySettings {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub name: String,
    pub lease_secs: u64,
    pub base_backoff_secs: u64,
    /// Applied to enqueues that don't set their own limit.
    pub max_attempts: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::named("")
    }
}

impl QueueSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lease_secs: 300,
            base_backoff_secs: 30,
            max_attempts: 3,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            lease_duration: Duration::from_secs(self.lease_secs),
            base_backoff: Duration::from_secs(self.base_backoff_secs),
        }
    }
}

impl Settings {
    /// Read and validate a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Parse settings from TOML text.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let settings: Settings = toml::from_str(text).map_err(|e| e.to_string())?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.monitor.interval_secs == 0 {
            return Err("monitor.interval_secs must be positive".into());
        }
        if self.monitor.batch_size == 0 {
            return Err("monitor.batch_size must be positive".into());
        }
        if self.registry.grace_secs == 0 {
            return Err("registry.grace_secs must be positive".into());
        }
        let mut seen = std::collections::HashSet::new();
        for q in &self.queues {
            if q.name.is_empty() {
                return Err("queue name must not be empty".into());
            }
            if !seen.insert(q.name.as_str()) {
                return Err(format!("queue {} is defined twice", q.name));
            }
            if q.lease_secs == 0 {
                return Err(format!("queue {}: lease_secs must be positive", q.name));
            }
            if q.max_attempts == 0 {
                return Err(format!("queue {}: max_attempts must be at least 1", q.name));
            }
        }
        Ok(())
    }

    /// Settings for a named queue; unknown names get the defaults.
    pub fn queue(&self, name: &str) -> QueueSettings {
        self.queues
            .iter()
            .find(|q| q.name == name)
            .cloned()
            .unwrap_or_else(|| QueueSettings::named(name))
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|q| q.name.as_str())
    }
}
