//! Named retry policies.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::ErrorKind;

use super::{BackoffStrategy, RetryPolicy};

/// Name of the fallback policy.
pub const DEFAULT_POLICY: &str = "default";

/// Registry of retry policies keyed by name (`"database"`, `"cloud_api"`, ...).
///
/// Lookups of unknown names resolve to the `"default"` entry, and to the
/// built-in [`RetryPolicy::default`] if that entry was removed.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: Arc<RwLock<HashMap<String, Arc<RetryPolicy>>>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

impl PolicyRegistry {
    /// Registry with no entries; every lookup resolves to the built-in default.
    pub fn empty() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry holding `default`, `cloud_api`, `database`, `email` and `webhook`.
    pub fn with_presets() -> Self {
        let registry = Self::empty();
        for (name, policy) in presets() {
            registry.register(name, policy);
        }
        registry
    }

    /// Insert or replace a policy.
    pub fn register(&self, name: impl Into<String>, policy: RetryPolicy) {
        self.policies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), Arc::new(policy));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RetryPolicy>> {
        self.policies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Look up `name`, falling back to the default policy.
    pub fn resolve(&self, name: &str) -> Arc<RetryPolicy> {
        let policies = self
            .policies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(policy) = policies.get(name) {
            return policy.clone();
        }
        tracing::debug!(policy = name, "unknown retry policy, using default");
        policies
            .get(DEFAULT_POLICY)
            .cloned()
            .unwrap_or_else(|| Arc::new(RetryPolicy::default()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .policies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Built-in policies. Fields not listed keep the [`RetryPolicy::default`] values.
fn presets() -> Vec<(&'static str, RetryPolicy)> {
    let default = RetryPolicy::default();
    vec![
        (DEFAULT_POLICY, default.clone()),
        (
            "cloud_api",
            RetryPolicy {
                max_attempts: 5,
                strategy: BackoffStrategy::ExponentialBackoff,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                ..default.clone()
            },
        ),
        (
            "database",
            RetryPolicy {
                max_attempts: 3,
                strategy: BackoffStrategy::FixedDelay,
                base_delay: Duration::from_millis(500),
                retryable_kinds: [ErrorKind::Transient, ErrorKind::Network].into(),
                ..default.clone()
            },
        ),
        (
            "email",
            RetryPolicy {
                max_attempts: 3,
                strategy: BackoffStrategy::ExponentialBackoff,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(300),
                ..default.clone()
            },
        ),
        (
            "webhook",
            RetryPolicy {
                max_attempts: 4,
                strategy: BackoffStrategy::JitteredBackoff,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..default
            },
        ),
    ]
}
