//! Name → breaker multiplexer.
//!
//! # Responsibilities
//! - Lazily create breakers on first lookup
//! - Resolve configs: explicit argument, then per-name override, then default
//! - Fan out stats, health, and reset to every breaker
//!
//! # Design Decisions
//! - The first config seen for a name wins; a different config on a later
//!   lookup is ignored and logged
//! - Creation is serialized per key by the concurrent map; breaker calls never
//!   touch registry locks

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::health::report::{BreakerHealth, RegistryHealthReport};
use crate::resilience::circuit_breaker::{BreakerStats, CircuitBreaker};
use crate::resilience::error::CallError;

#[derive(Debug, Default)]
struct BreakerDefaults {
    default: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
}

impl BreakerDefaults {
    fn resolve(&self, name: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Registry of named circuit breakers.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: ArcSwap<BreakerDefaults>,
}

impl CircuitBreakerRegistry {
    pub fn new(default: CircuitBreakerConfig) -> Self {
        Self::with_overrides(default, HashMap::new())
    }

    pub fn with_overrides(
        default: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults: ArcSwap::from_pointee(BreakerDefaults { default, overrides }),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::with_overrides(config.circuit_breaker.clone(), config.breakers.clone())
    }

    /// Replace the configs used for breakers created from now on.
    pub fn set_defaults(
        &self,
        default: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) {
        self.defaults.store(Arc::new(BreakerDefaults { default, overrides }));
        tracing::info!(existing = self.breakers.len(), "Circuit breaker defaults updated");
    }

    /// Existing breaker for `name`, or a new one built from `config` (or the
    /// resolved default when `config` is `None`).
    pub fn get_or_create(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        // Clone out before touching `entry` so no shard guard is held twice.
        let breaker = match self.get(name) {
            Some(existing) => existing,
            None => self
                .breakers
                .entry(name.to_string())
                .or_insert_with(|| {
                    let config = config.clone().unwrap_or_else(|| self.defaults.load().resolve(name));
                    tracing::info!(
                        breaker = %name,
                        failure_threshold = config.failure_threshold,
                        recovery_timeout_ms = config.recovery_timeout_ms,
                        "Circuit breaker created"
                    );
                    Arc::new(CircuitBreaker::new(name, config))
                })
                .value()
                .clone(),
        };

        if let Some(requested) = &config {
            if requested != breaker.config() {
                tracing::warn!(
                    breaker = %name,
                    "Ignoring differing config for existing circuit breaker"
                );
            }
        }

        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Protected call against the breaker named `name`, creating it if needed.
    pub async fn call<F, Fut, T, E>(&self, name: &str, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(name, None);
        breaker.call(operation).await
    }

    pub fn aggregate_stats(&self) -> BTreeMap<String, BreakerStats> {
        self.snapshot()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.stats()))
            .collect()
    }

    pub fn aggregate_health(&self) -> RegistryHealthReport {
        let circuit_breakers: BTreeMap<String, BreakerHealth> = self
            .snapshot()
            .into_iter()
            .map(|breaker| {
                let stats = breaker.stats();
                let health = BreakerHealth {
                    healthy: stats.is_healthy(),
                    stats,
                };
                (breaker.name().to_string(), health)
            })
            .collect();

        RegistryHealthReport::new(circuit_breakers)
    }

    pub fn reset_all(&self) {
        let breakers = self.snapshot();
        for breaker in &breakers {
            breaker.reset();
        }
        tracing::info!(count = breakers.len(), "All circuit breakers reset");
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::report::HealthStatus;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::io;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("stt", None);
        let b = registry.get_or_create("stt", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_first_config_wins() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let first = CircuitBreakerConfig::new().with_failure_threshold(2);
        let second = CircuitBreakerConfig::new().with_failure_threshold(9);

        registry.get_or_create("tts", Some(first));
        let breaker = registry.get_or_create("tts", Some(second));
        assert_eq!(breaker.config().failure_threshold, 2);
    }

    #[test]
    fn test_override_then_default() {
        let mut overrides = HashMap::new();
        overrides.insert("stt".to_string(), CircuitBreakerConfig::new().with_failure_threshold(1));
        let registry = CircuitBreakerRegistry::with_overrides(
            CircuitBreakerConfig::new().with_failure_threshold(4),
            overrides,
        );

        assert_eq!(registry.get_or_create("stt", None).config().failure_threshold, 1);
        assert_eq!(registry.get_or_create("tts", None).config().failure_threshold, 4);
    }

    #[test]
    fn test_set_defaults_only_affects_new_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new().with_failure_threshold(4));
        let existing = registry.get_or_create("stt", None);

        registry.set_defaults(CircuitBreakerConfig::new().with_failure_threshold(8), HashMap::new());
        assert_eq!(existing.config().failure_threshold, 4);
        assert_eq!(registry.get_or_create("stt", None).config().failure_threshold, 4);
        assert_eq!(registry.get_or_create("llm", None).config().failure_threshold, 8);
    }

    #[tokio::test]
    async fn test_call_and_aggregate() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new().with_failure_threshold(1));
        registry
            .call("stt", || async { Ok::<_, io::Error>(()) })
            .await
            .unwrap();
        let _ = registry
            .call("tts", || async { Err::<(), _>(io::Error::other("down")) })
            .await;

        let stats = registry.aggregate_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["stt"].state, CircuitState::Closed);
        assert_eq!(stats["tts"].state, CircuitState::Open);

        let health = registry.aggregate_health();
        assert_eq!(health.total_breakers, 2);
        assert!(health.circuit_breakers["stt"].healthy);
        assert!(!health.circuit_breakers["tts"].healthy);
        assert!(!health.overall_healthy);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        registry.reset_all();
        assert!(registry.aggregate_health().overall_healthy);
        assert_eq!(registry.names(), vec!["stt".to_string(), "tts".to_string()]);
    }

    #[test]
    fn test_empty_registry_is_healthy() {
        let registry = CircuitBreakerRegistry::default();
        let health = registry.aggregate_health();
        assert!(health.overall_healthy);
        assert_eq!(health.total_breakers, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_creation_yields_one_breaker() {
        let registry = Arc::new(CircuitBreakerRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("shared", None))
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
