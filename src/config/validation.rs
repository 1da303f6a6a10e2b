//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, non-zero timeouts and trial counts)
//! - Detect duplicate service names and conflicting path prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerSettings, GatewayConfig, ProfileKind};

/// Paths the gateway serves itself.
const RESERVED_PREFIXES: [&str; 2] = ["/health", "/circuit-breaker"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{profile} profile: errorThresholdPercentage {value} exceeds 100")]
    ThresholdOutOfRange { profile: ProfileKind, value: u8 },

    #[error("{profile} profile: {field} must be greater than zero")]
    ZeroValue { profile: ProfileKind, field: &'static str },

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("path prefix '{0}' is used by more than one service")]
    DuplicatePrefix(String),

    #[error("service '{name}': path prefix '{prefix}' must start with '/' and contain no '{{' or '}}'")]
    InvalidPrefix { name: String, prefix: String },

    #[error("service '{name}': path prefix '{prefix}' overlaps gateway route '{reserved}'")]
    ReservedPrefix {
        name: String,
        prefix: String,
        reserved: &'static str,
    },

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("{profile} profile: timeoutMs {timeout_ms} must be below the request timeout of {request_ms}ms")]
    TimeoutNotBelowRequestTimeout {
        profile: ProfileKind,
        timeout_ms: u64,
        request_ms: u64,
    },

    #[error("service '{name}': invalid address '{address}'")]
    InvalidAddress { name: String, address: String },

    #[error("admin.api_key is set but blank")]
    BlankAdminKey,
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let request_ms = config.timeouts.request_secs.saturating_mul(1000);
    if request_ms == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    for kind in [ProfileKind::Critical, ProfileKind::Standard, ProfileKind::NonCritical] {
        let settings = config.breaker.profile(kind);
        validate_settings(kind, settings, &mut errors);
        // The outer request timeout must never fire before the breaker's.
        if request_ms > 0 && settings.timeout_ms >= request_ms {
            errors.push(ValidationError::TimeoutNotBelowRequestTimeout {
                profile: kind,
                timeout_ms: settings.timeout_ms,
                request_ms,
            });
        }
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        let prefix = service.path_prefix.trim_end_matches('/');
        if !service.path_prefix.starts_with('/') || prefix.contains(['{', '}']) {
            errors.push(ValidationError::InvalidPrefix {
                name: service.name.clone(),
                prefix: service.path_prefix.clone(),
            });
        } else if let Some(reserved) = reserved_overlap(prefix) {
            errors.push(ValidationError::ReservedPrefix {
                name: service.name.clone(),
                prefix: service.path_prefix.clone(),
                reserved,
            });
        } else if !prefixes.insert(prefix) {
            errors.push(ValidationError::DuplicatePrefix(service.path_prefix.clone()));
        }
        if service.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                name: service.name.clone(),
                address: service.address.clone(),
            });
        }
    }

    // A whitespace-only key cannot be sent as a usable bearer token.
    if !config.admin.api_key.is_empty() && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::BlankAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn reserved_overlap(prefix: &str) -> Option<&'static str> {
    RESERVED_PREFIXES.into_iter().find(|reserved| {
        prefix
            .strip_prefix(reserved)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

fn validate_settings(profile: ProfileKind, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if settings.error_threshold_percentage > 100 {
        errors.push(ValidationError::ThresholdOutOfRange {
            profile,
            value: settings.error_threshold_percentage,
        });
    }
    let zero_checks = [
        ("timeoutMs", settings.timeout_ms == 0),
        ("resetTimeoutMs", settings.reset_timeout_ms == 0),
        ("halfOpenRequests", settings.half_open_requests == 0),
    ];
    for (field, is_zero) in zero_checks {
        if is_zero {
            errors.push(ValidationError::ZeroValue { profile, field });
        }
    }
}
