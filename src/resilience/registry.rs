//! Process-wide store of circuit breakers, one per downstream service.
//!
//! # Responsibilities
//! - Create breakers lazily on first lookup, seeded from a profile
//! - Guarantee a single live breaker per name under concurrent first access
//! - Aggregate snapshots and bulk reset for the admin endpoints
//!
//! # Design Decisions
//! - Sharded map (DashMap); the shard lock is held only for lookup/insert,
//!   never while a breaker executes or snapshots
//! - Breakers live for the registry's lifetime; no eviction
//! - Constructed once at startup and injected, not a global

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{BreakerConfig, BreakerOverrides, BreakerSettings, ProfileKind};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, StateListener};

/// Keyed collection of breakers.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
    /// Per-service profile pins from the service table; win over `config.service_profiles`.
    pinned: HashMap<String, ProfileKind>,
    /// Attached to every breaker created from here on.
    listener: Option<StateListener>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            pinned: HashMap::new(),
            listener: None,
        }
    }

    /// Observe state changes of every breaker this registry creates.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Pin a service to a profile regardless of the static table.
    pub fn with_profile(mut self, service: impl Into<String>, kind: ProfileKind) -> Self {
        self.pinned.insert(service.into(), kind);
        self
    }

    pub fn profile_for(&self, service: &str) -> ProfileKind {
        self.pinned
            .get(service)
            .or_else(|| self.config.service_profiles.get(service))
            .copied()
            .unwrap_or(ProfileKind::Standard)
    }

    /// Profile defaults for `service`, with `overrides` applied on top.
    pub fn settings_for(&self, service: &str, overrides: Option<&BreakerOverrides>) -> BreakerSettings {
        let base = self.config.profile(self.profile_for(service));
        match overrides {
            Some(overrides) => base.merged(overrides),
            None => base.clone(),
        }
    }

    /// Existing breaker for `service`, or a new one built from its profile.
    ///
    /// Overrides only matter on the lookup that creates the breaker.
    pub fn get(&self, service: &str, overrides: Option<&BreakerOverrides>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.value().clone();
        }

        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let settings = self.settings_for(service, overrides);
                tracing::info!(
                    service = %service,
                    profile = %self.profile_for(service),
                    timeout_ms = settings.timeout_ms,
                    error_threshold = settings.error_threshold_percentage,
                    "Circuit breaker created"
                );
                let breaker = CircuitBreaker::new(service, settings);
                Arc::new(match &self.listener {
                    Some(listener) => breaker.with_listener(listener.clone()),
                    None => breaker,
                })
            })
            .value()
            .clone()
    }

    pub fn get_default(&self, service: &str) -> Arc<CircuitBreaker> {
        self.get(service, None)
    }

    /// Existing breaker only; never creates.
    pub fn lookup(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    // Clone the Arcs out first so no shard lock is held while breakers are locked.
    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Snapshot of every registered breaker, keyed by name.
    pub fn snapshot_all(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.all()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.snapshot()))
            .collect()
    }

    /// Force one breaker closed. `None` if the service was never registered.
    pub fn reset(&self, service: &str) -> Option<BreakerSnapshot> {
        let breaker = self.lookup(service)?;
        breaker.reset();
        tracing::info!(service = %service, "Circuit breaker reset");
        Some(breaker.snapshot())
    }

    /// Force every breaker closed and return the fresh snapshot.
    pub fn reset_all(&self) -> BTreeMap<String, BreakerSnapshot> {
        for breaker in self.all() {
            breaker.reset();
        }
        tracing::info!(count = self.len(), "All circuit breakers reset");
        self.snapshot_all()
    }

    /// Force one breaker open. `None` if the service was never registered.
    pub fn force_open(&self, service: &str) -> Option<BreakerSnapshot> {
        let breaker = self.lookup(service)?;
        breaker.force_open();
        Some(breaker.snapshot())
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("pinned", &self.pinned)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    #[test]
    fn test_profiles_follow_static_table() {
        let registry = BreakerRegistry::default();
        assert_eq!(registry.profile_for("auth-service"), ProfileKind::Critical);
        assert_eq!(registry.profile_for("analytics-service"), ProfileKind::NonCritical);
        assert_eq!(registry.profile_for("flower-recommendations"), ProfileKind::Standard);

        let registry = registry.with_profile("flower-recommendations", ProfileKind::Critical);
        assert_eq!(registry.profile_for("flower-recommendations"), ProfileKind::Critical);
        assert_eq!(
            registry.get_default("flower-recommendations").settings(),
            &BreakerSettings::critical()
        );
    }

    #[test]
    fn test_get_returns_same_instance_and_ignores_late_overrides() {
        let registry = BreakerRegistry::default();
        let overrides = BreakerOverrides {
            volume_threshold: Some(2),
            ..Default::default()
        };

        let first = registry.get("cart-service", Some(&overrides));
        let second = registry.get("cart-service", Some(&BreakerOverrides {
            volume_threshold: Some(99),
            ..Default::default()
        }));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.settings().volume_threshold, 2);
        assert_eq!(first.settings().half_open_requests, BreakerSettings::critical().half_open_requests);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_breaker() {
        let registry = Arc::new(BreakerRegistry::default());
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_default("order-service")
                })
            })
            .collect();
        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
    }

    #[test]
    fn test_lookup_and_reset_unknown() {
        let registry = BreakerRegistry::default();
        assert!(registry.lookup("ghost-service").is_none());
        assert!(registry.reset("ghost-service").is_none());
        assert!(registry.force_open("ghost-service").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all_twice_yields_closed_zeroed_state() {
        let registry = BreakerRegistry::default();
        for name in ["auth-service", "product-service", "i18n-service"] {
            let breaker = registry.get_default(name);
            breaker.try_acquire().unwrap().fail();
            breaker.force_open();
        }

        let first = registry.reset_all();
        let second = registry.reset_all();

        assert_eq!(first.len(), 3);
        for snapshots in [&first, &second] {
            for snap in snapshots.values() {
                assert_eq!(snap.state, CircuitState::Closed);
                assert_eq!((snap.requests, snap.failures, snap.successes), (0, 0, 0));
                assert_eq!(snap.stats.total_failures, 1);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_all_is_keyed_by_name() {
        let registry = BreakerRegistry::default();
        registry.get_default("review-service");
        registry.get_default("auth-service").force_open();

        let snapshots = registry.snapshot_all();
        let names: Vec<_> = snapshots.keys().cloned().collect();
        assert_eq!(names, vec!["auth-service", "review-service"]);
        assert_eq!(snapshots["auth-service"].state, CircuitState::Open);
        assert_eq!(snapshots["auth-service"].retry_after, 60);

        let reopened = registry.reset("auth-service").unwrap();
        assert_eq!(reopened.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_is_shared_by_created_breakers() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let registry = BreakerRegistry::default().with_listener(Arc::new(move |name: &str, from: CircuitState, to: CircuitState| {
            sink.lock().unwrap().push((name.to_string(), from, to));
        }));

        registry.get_default("payment-service").force_open();
        registry.get_default("wishlist-service");
        registry.reset_all();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("payment-service".to_string(), CircuitState::Closed, CircuitState::Open),
                ("payment-service".to_string(), CircuitState::Open, CircuitState::Closed),
            ]
        );
    }
}
