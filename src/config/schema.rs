//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the storefront gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration for the gateway itself.
    pub timeouts: TimeoutConfig,

    /// Downstream services proxied by the gateway.
    pub services: Vec<ServiceConfig>,

    /// Circuit breaker profiles and the service-to-profile table.
    pub breaker: BreakerConfig,

    /// Retry configuration for idempotent proxied requests.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoints configuration.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard ceiling on a whole inbound request in seconds.
    /// Breaker timeouts normally fire well before this.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// A downstream service reachable through the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name; also the circuit breaker key.
    pub name: String,

    /// Service address (e.g., "127.0.0.1:3002").
    pub address: String,

    /// Gateway path prefix routed to this service (e.g., "/api/products").
    pub path_prefix: String,

    /// Explicit breaker profile, overriding the static table.
    #[serde(default)]
    pub profile: Option<ProfileKind>,
}

/// Breaker configuration profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileKind {
    Critical,
    Standard,
    #[serde(alias = "non_critical")]
    NonCritical,
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Critical => f.write_str("critical"),
            ProfileKind::Standard => f.write_str("standard"),
            ProfileKind::NonCritical => f.write_str("nonCritical"),
        }
    }
}

/// Tuning knobs for a single circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSettings {
    /// A protected call running longer than this counts as a failure.
    pub timeout_ms: u64,

    /// Failure percentage (0-100) of the window that trips the breaker.
    pub error_threshold_percentage: u8,

    /// Time the breaker stays OPEN before admitting a probe.
    pub reset_timeout_ms: u64,

    /// Minimum requests in the window before the error rate is evaluated.
    pub volume_threshold: u32,

    /// Trial calls allowed while HALF_OPEN.
    pub half_open_requests: u32,
}

impl BreakerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn critical() -> Self {
        Self {
            timeout_ms: 5_000,
            error_threshold_percentage: 30,
            reset_timeout_ms: 60_000,
            volume_threshold: 5,
            half_open_requests: 1,
        }
    }

    pub fn standard() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 10,
            half_open_requests: 3,
        }
    }

    pub fn non_critical() -> Self {
        Self {
            timeout_ms: 15_000,
            error_threshold_percentage: 70,
            reset_timeout_ms: 15_000,
            volume_threshold: 20,
            half_open_requests: 5,
        }
    }

    /// Apply caller overrides on top of these settings.
    pub fn merged(&self, overrides: &BreakerOverrides) -> Self {
        Self {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            error_threshold_percentage: overrides
                .error_threshold_percentage
                .unwrap_or(self.error_threshold_percentage),
            reset_timeout_ms: overrides.reset_timeout_ms.unwrap_or(self.reset_timeout_ms),
            volume_threshold: overrides.volume_threshold.unwrap_or(self.volume_threshold),
            half_open_requests: overrides.half_open_requests.unwrap_or(self.half_open_requests),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::standard()
    }
}

/// Partial breaker settings supplied by a caller at first lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerOverrides {
    pub timeout_ms: Option<u64>,
    pub error_threshold_percentage: Option<u8>,
    pub reset_timeout_ms: Option<u64>,
    pub volume_threshold: Option<u32>,
    pub half_open_requests: Option<u32>,
}

/// Breaker profiles plus the static name-to-profile table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub critical: BreakerSettings,
    pub standard: BreakerSettings,
    pub non_critical: BreakerSettings,

    /// Known downstream services and their profile. Unlisted names use `standard`.
    pub service_profiles: HashMap<String, ProfileKind>,
}

impl BreakerConfig {
    pub fn profile(&self, kind: ProfileKind) -> &BreakerSettings {
        match kind {
            ProfileKind::Critical => &self.critical,
            ProfileKind::Standard => &self.standard,
            ProfileKind::NonCritical => &self.non_critical,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            critical: BreakerSettings::critical(),
            standard: BreakerSettings::standard(),
            non_critical: BreakerSettings::non_critical(),
            service_profiles: default_service_profiles(),
        }
    }
}

fn default_service_profiles() -> HashMap<String, ProfileKind> {
    use ProfileKind::*;

    [
        ("auth-service", Critical),
        ("cart-service", Critical),
        ("order-service", Critical),
        ("payment-service", Critical),
        ("product-service", Standard),
        ("user-service", Standard),
        ("admin-dashboard-service", Standard),
        ("notification-service", NonCritical),
        ("i18n-service", NonCritical),
        ("analytics-service", NonCritical),
        ("review-service", NonCritical),
        ("wishlist-service", NonCritical),
        ("promotion-service", NonCritical),
    ]
    .into_iter()
    .map(|(name, kind)| (name.to_string(), kind))
    .collect()
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Percentage of requests that can be retries (retry budget).
    /// e.g., 0.1 for 10% budget.
    pub budget_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            budget_ratio: 0.1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoints configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the circuit breaker admin endpoints.
    pub enabled: bool,

    /// Bearer token required by the admin endpoints. Empty disables the check.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lookup_and_merge() {
        let config = BreakerConfig::default();
        assert_eq!(config.profile(ProfileKind::Critical).half_open_requests, 1);
        assert_eq!(config.service_profiles["i18n-service"], ProfileKind::NonCritical);

        let merged = config.standard.merged(&BreakerOverrides {
            volume_threshold: Some(4),
            ..Default::default()
        });
        assert_eq!(merged.volume_threshold, 4);
        assert_eq!(merged.error_threshold_percentage, 50);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:4000"

            [[services]]
            name = "product-service"
            address = "127.0.0.1:3002"
            path_prefix = "/api/products"

            [[services]]
            name = "reviews"
            address = "127.0.0.1:3007"
            path_prefix = "/api/reviews"
            profile = "nonCritical"

            [breaker.standard]
            timeoutMs = 2000
            errorThresholdPercentage = 40
            resetTimeoutMs = 10000
            volumeThreshold = 6
            halfOpenRequests = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[1].profile, Some(ProfileKind::NonCritical));
        assert_eq!(config.breaker.standard.volume_threshold, 6);
        // Untouched profiles keep their defaults.
        assert_eq!(config.breaker.critical, BreakerSettings::critical());
        assert!(config.breaker.service_profiles.contains_key("auth-service"));
    }
}
