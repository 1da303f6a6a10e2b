//! Retry logic for proxied calls.
//!
//! # Responsibilities
//! - Determine if request is retryable (idempotent methods only)
//! - Enforce retry budget (max retries relative to request volume)
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Retries sit inside the breaker-protected call: however many attempts
//!   one inbound request makes, the breaker sees one outcome
//! - Connection errors always retryable; only 502/503/504 among 5xx

use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{Method, StatusCode};

/// Whether another attempt is worth making.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, connection_error: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if connection_error {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
    )
}

/// Caps retries at a fraction of observed requests.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u64,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl RetryBudget {
    /// `min_retries` are always allowed so low-traffic services can still retry.
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self {
            ratio: ratio.max(0.0),
            min_retries,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve one retry if the budget allows it.
    pub fn can_retry(&self) -> bool {
        let requests = self.requests.load(Ordering::Relaxed);
        let allowed = self.min_retries + (requests as f64 * f64::from(self.ratio)) as u64;
        self.retries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used < allowed).then_some(used + 1)
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_rules() {
        assert!(is_retryable(&Method::GET, None, true));
        assert!(is_retryable(&Method::GET, Some(StatusCode::SERVICE_UNAVAILABLE), false));
        assert!(!is_retryable(&Method::GET, Some(StatusCode::INTERNAL_SERVER_ERROR), false));
        assert!(!is_retryable(&Method::GET, Some(StatusCode::NOT_FOUND), false));
        assert!(!is_retryable(&Method::POST, None, true));
    }

    #[test]
    fn test_budget_limits_retries() {
        let budget = RetryBudget::new(0.1, 1);
        for _ in 0..20 {
            budget.record_request();
        }
        // 1 guaranteed + 10% of 20.
        assert!(budget.can_retry());
        assert!(budget.can_retry());
        assert!(budget.can_retry());
        assert!(!budget.can_retry());
    }
}
