//! Named circuit breakers, one per guarded dependency.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{BreakerConfig, BreakerSnapshot, CircuitBreaker, Clock, SystemClock};

/// Cloud provider breakers: 3 failures, 30s cooldown.
pub const CLOUD_PROVIDERS: [&str; 3] = ["aws", "gcp", "azure"];
/// AI provider breakers: 5 failures, 60s cooldown.
pub const AI_PROVIDERS: [&str; 2] = ["openai", "anthropic"];

/// Registry of breakers keyed by dependency name.
///
/// Breakers are created lazily on first lookup using the registry's default
/// config (unless a config was registered up front) and live as long as the
/// registry.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    configs: Arc<RwLock<HashMap<String, BreakerConfig>>>,
    default_config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

impl BreakerRegistry {
    pub fn empty() -> Self {
        Self::empty_with_clock(Arc::new(SystemClock))
    }

    pub fn empty_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            configs: Arc::new(RwLock::new(HashMap::new())),
            default_config: BreakerConfig::default(),
            clock,
        }
    }

    /// Registry pre-configured for `aws`, `gcp`, `azure`, `openai` and `anthropic`.
    pub fn with_presets() -> Self {
        Self::with_presets_and_clock(Arc::new(SystemClock))
    }

    pub fn with_presets_and_clock(clock: Arc<dyn Clock>) -> Self {
        let registry = Self::empty_with_clock(clock);
        let cloud = BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        };
        let ai = BreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        };
        for name in CLOUD_PROVIDERS {
            registry.configure(name, cloud);
        }
        for name in AI_PROVIDERS {
            registry.configure(name, ai);
        }
        registry
    }

    /// Config used for names that were never configured.
    pub fn with_default_config(mut self, config: BreakerConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Set the config for `name`. Takes effect only if its breaker has not
    /// been created yet.
    pub fn configure(&self, name: impl Into<String>, config: BreakerConfig) {
        let name = name.into();
        if self.read_breakers().contains_key(&name) {
            tracing::debug!(service = %name, "breaker already created, config change ignored");
        }
        self.configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, config);
    }

    /// Breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.read_breakers().get(name) {
            return existing.clone();
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.config_for(name);
                tracing::debug!(
                    service = name,
                    failure_threshold = config.failure_threshold,
                    "creating circuit breaker"
                );
                Arc::new(CircuitBreaker::with_clock(name, config, self.clock.clone()))
            })
            .clone()
    }

    /// Breaker for `name` if it has been created.
    pub fn existing(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.read_breakers().get(name).cloned()
    }

    /// Config a breaker named `name` has or would be created with.
    pub fn config_for(&self, name: &str) -> BreakerConfig {
        self.configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .copied()
            .unwrap_or(self.default_config)
    }

    /// Snapshots of every created breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.read_breakers().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    fn read_breakers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
