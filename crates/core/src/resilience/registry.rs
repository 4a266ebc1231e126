//! Named circuit breaker registry
//!
//! Call sites that guard the same dependency look its breaker up by name,
//! so they share fate: once `credit-bureau` trips for one caller it is
//! tripped for all of them. The registry is an explicit value owned by the
//! process composition root and injected where needed, scoped per process.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{BreakerConfig, BreakerConfigError, BreakerStats, CircuitBreaker};

#[derive(Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the breaker for `name`, creating it with `config` on first
    /// use. The first caller's configuration wins; later configs for the
    /// same name are ignored.
    pub fn get_or_create(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, BreakerConfigError> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(existing.clone());
        }
        let breaker = Arc::new(CircuitBreaker::new(name, config)?);
        debug!(breaker = %name, "registered circuit breaker");
        let entry = self.breakers.entry(name.to_string()).or_insert(breaker);
        Ok(entry.value().clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Stats for every registered breaker, for diagnostics endpoints.
    pub fn stats(&self) -> Vec<BreakerStats> {
        self.breakers.iter().map(|e| e.value().stats()).collect()
    }

    /// Force every breaker back to CLOSED.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("bureau timeout")]
    struct BureauError;

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(100),
            ..BreakerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_same_name_shares_one_breaker() {
        let registry = BreakerRegistry::new();

        let a = registry.get_or_create("credit-bureau", config(1)).unwrap();
        let b = registry.get_or_create("credit-bureau", config(99)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // Trip it through one handle, observe through the other
        let _ = a.call(|| async { Err::<(), _>(BureauError) }).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_distinct_names_are_independent() {
        let registry = BreakerRegistry::new();
        registry.get_or_create("credit-bureau", config(1)).unwrap();
        registry.get_or_create("kyc-provider", config(1)).unwrap();

        assert_eq!(registry.len(), 2);
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["credit-bureau", "kyc-provider"]);
        assert!(registry.get("sanction-printer").is_none());
    }

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = BreakerRegistry::new();
        let err = registry.get_or_create(
            "credit-bureau",
            BreakerConfig {
                failure_threshold: 0,
                ..BreakerConfig::default()
            },
        );
        assert!(err.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reset_all_closes_every_breaker() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("credit-bureau", config(1)).unwrap();
        let b = registry.get_or_create("kyc-provider", config(1)).unwrap();
        let _ = a.call(|| async { Err::<(), _>(BureauError) }).await;
        let _ = b.call(|| async { Err::<(), _>(BureauError) }).await;

        registry.reset_all();
        assert!(
            registry
                .stats()
                .iter()
                .all(|s| s.state == CircuitState::Closed && s.failure_count == 0)
        );
    }
}
