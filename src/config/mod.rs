//! Engine configuration (layered: code > `RESILIENCE_CONFIG` file > default
//! file > built-in presets).
//!
//! ```toml
//! [ledger]
//! retention_hours = 48
//!
//! [policies.cloud_api]
//! max_attempts = 4
//! strategy = "jittered_backoff"
//! base_delay_ms = 500
//! max_delay_ms = 20000
//! retryable = ["network", "rate_limited", "service_unavailable", "timeout"]
//!
//! [breakers]
//! default_failure_threshold = 4
//! default_recovery_timeout_secs = 45
//!
//! [breakers.stripe]
//! failure_threshold = 2
//! recovery_timeout_secs = 10
//! ```
//!
//! A policy or breaker named here replaces the preset of the same name
//! wholesale; fields left out take the type defaults, not the preset's.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::coordinator::DEFAULT_STATISTICS_HOURS;
use crate::error::{ErrorKind, ResilienceError, Result};
use crate::ledger::ErrorLedger;
use crate::policy::{BackoffStrategy, PolicyRegistry, RetryPolicy};

/// Environment variable naming the config file to load.
pub const CONFIG_ENV_VAR: &str = "RESILIENCE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub ledger: LedgerSection,
    pub policies: BTreeMap<String, PolicySection>,
    pub breakers: BreakersSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerSection {
    /// Age after which records may be pruned. Unbounded when absent, and never
    /// shorter than the default statistics window.
    pub retention_hours: Option<u64>,
}

/// One `[policies.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    pub max_attempts: Option<u32>,
    pub strategy: Option<BackoffStrategy>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub retryable: Option<Vec<ErrorKind>>,
}

/// The `[breakers]` table: fallback thresholds plus one sub-table per service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersSection {
    pub default_failure_threshold: Option<u32>,
    pub default_recovery_timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub services: BTreeMap<String, BreakerSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSection {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_secs: Option<u64>,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Load from `RESILIENCE_CONFIG` (after reading `.env`), else from
    /// [`default_path`](Self::default_path) when it exists, else presets only.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            tracing::debug!(path = %path, "loading resilience config from environment");
            return Self::load(path);
        }
        let path = Self::default_path();
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading resilience config");
            return Self::load(&path);
        }
        Ok(Self::default())
    }

    /// `~/.resilience/config.toml`.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".resilience"))
            .unwrap_or_else(|| PathBuf::from(".resilience"))
            .join("config.toml")
    }

    /// Check every section without building anything.
    pub fn validate(&self) -> Result<()> {
        self.ledger()?;
        for (name, section) in &self.policies {
            section.build(name)?;
        }
        self.breakers.default_config()?;
        for (name, section) in &self.breakers.services {
            section.build(name)?;
        }
        Ok(())
    }

    pub fn ledger(&self) -> Result<ErrorLedger> {
        match self.ledger.retention_hours {
            None => Ok(ErrorLedger::new()),
            Some(hours) if hours < u64::from(DEFAULT_STATISTICS_HOURS) => {
                Err(ResilienceError::Configuration(format!(
                    "ledger.retention_hours must be at least {DEFAULT_STATISTICS_HOURS}, got {hours}"
                )))
            }
            Some(hours) => Ok(ErrorLedger::with_retention(Duration::from_secs(
                hours.saturating_mul(3600),
            ))),
        }
    }

    /// Preset policies overlaid with the configured ones.
    pub fn policy_registry(&self) -> Result<PolicyRegistry> {
        let registry = PolicyRegistry::with_presets();
        for (name, section) in &self.policies {
            registry.register(name.clone(), section.build(name)?);
        }
        Ok(registry)
    }

    /// Preset breakers overlaid with the configured ones.
    pub fn breaker_registry(&self) -> Result<BreakerRegistry> {
        let registry =
            BreakerRegistry::with_presets().with_default_config(self.breakers.default_config()?);
        for (name, section) in &self.breakers.services {
            registry.configure(name.clone(), section.build(name)?);
        }
        Ok(registry)
    }
}

impl PolicySection {
    pub fn build(&self, name: &str) -> Result<RetryPolicy> {
        RetryPolicy::builder()
            .maybe_max_attempts(self.max_attempts)
            .maybe_strategy(self.strategy)
            .maybe_base_delay(self.base_delay_ms.map(Duration::from_millis))
            .maybe_max_delay(self.max_delay_ms.map(Duration::from_millis))
            .maybe_backoff_multiplier(self.backoff_multiplier)
            .maybe_jitter(self.jitter)
            .maybe_retryable_kinds(
                self.retryable
                    .as_ref()
                    .map(|kinds| kinds.iter().copied().collect()),
            )
            .build()
            .map_err(|e| scoped(e, "policy", name))
    }
}

impl BreakersSection {
    pub fn default_config(&self) -> Result<BreakerConfig> {
        let fallback = BreakerConfig::default();
        BreakerConfig::new(
            self.default_failure_threshold
                .unwrap_or(fallback.failure_threshold),
            self.default_recovery_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.recovery_timeout),
        )
        .map_err(|e| scoped(e, "breakers", "default"))
    }
}

impl BreakerSection {
    pub fn build(&self, name: &str) -> Result<BreakerConfig> {
        let fallback = BreakerConfig::default();
        BreakerConfig::new(
            self.failure_threshold.unwrap_or(fallback.failure_threshold),
            self.recovery_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.recovery_timeout),
        )
        .map_err(|e| scoped(e, "breaker", name))
    }
}

fn scoped(error: ResilienceError, section: &str, name: &str) -> ResilienceError {
    match error {
        ResilienceError::Configuration(msg) => {
            ResilienceError::Configuration(format!("{section} `{name}`: {msg}"))
        }
        other => other,
    }
}
