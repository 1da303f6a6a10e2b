//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: a limited number of trial calls probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= volume_threshold and failure rate >= error_threshold_percentage
//! Open → Half-Open: first call after reset_timeout has elapsed since the trip
//! Half-Open → Closed: half_open_requests trial calls succeed
//! Half-Open → Open: any trial call fails
//! ```
//!
//! # Design Decisions
//! - One mutex per breaker; distinct services never contend
//! - Every admitted call holds a `CallPermit` that settles exactly once
//! - Permits remember the state generation they were issued in; outcomes from an
//!   earlier generation only feed lifetime stats
//! - Dropping an unsettled permit is a cancellation: neither success nor failure
//! - State listeners run after the breaker lock is released, so they may call
//!   back into the breaker

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerSettings;
use crate::observability::metrics;
use crate::resilience::fallback::Fallback;

/// Called with `(service, from, to)` on every state change.
pub type StateListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a protected call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker refused to run the call.
    #[error("circuit for '{service}' is open, retry after {retry_after:?}")]
    Open { service: String, retry_after: Duration },

    /// The call did not settle within the breaker timeout.
    #[error("call to '{service}' timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// The call itself failed.
    #[error("{0}")]
    Operation(E),
}

/// A refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// State at the moment of refusal.
    pub state: CircuitState,
    /// Remaining time until a probe may be admitted.
    pub retry_after: Duration,
}

impl Rejection {
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(self.retry_after)
    }
}

/// Whole seconds, rounded up.
pub fn retry_after_secs(d: Duration) -> u64 {
    d.as_millis().div_ceil(1000) as u64
}

/// Cumulative counters. Never reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeStats {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    pub total_cancellations: u64,
    pub state_changes: u64,
    pub last_state_change: DateTime<Utc>,
}

impl LifetimeStats {
    fn new() -> Self {
        Self {
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_rejections: 0,
            total_cancellations: 0,
            state_changes: 0,
            last_state_change: Utc::now(),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    pub requests: u64,
    /// Failure percentage of the current window, two decimals.
    pub error_rate: f64,
    pub half_open_successes: u32,
    /// Seconds until a probe is admitted; zero unless OPEN.
    pub retry_after: u64,
    pub settings: BreakerSettings,
    pub stats: LifetimeStats,
}

struct Core {
    state: CircuitState,
    generation: u64,
    requests: u64,
    successes: u64,
    failures: u64,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    stats: LifetimeStats,
    /// Transition made in the current critical section, announced on unlock.
    pending: Option<(CircuitState, CircuitState)>,
}

impl Core {
    fn retry_after(&self, reset_timeout: Duration, now: Instant) -> Duration {
        match self.last_failure {
            Some(at) => reset_timeout.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn over_threshold(&self, settings: &BreakerSettings) -> bool {
        self.requests >= u64::from(settings.volume_threshold)
            && u128::from(self.failures) * 100
                >= u128::from(settings.error_threshold_percentage) * u128::from(self.requests)
    }
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    core: Mutex<Core>,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed);
        Self {
            name,
            settings,
            core: Mutex::new(Core {
                state: CircuitState::Closed,
                generation: 0,
                requests: 0,
                successes: 0,
                failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                last_failure: None,
                stats: LifetimeStats::new(),
                pending: None,
            }),
            listener: None,
        }
    }

    /// Notify `listener` of every state change.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout()
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    // Every critical section leaves `Core` consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlock(&self, mut core: MutexGuard<'_, Core>) {
        let transition = core.pending.take();
        drop(core);
        if let (Some((from, to)), Some(listener)) = (transition, &self.listener) {
            listener(&self.name, from, to);
        }
    }

    /// Ask to run one protected call.
    ///
    /// Moves an eligible OPEN breaker to HALF_OPEN and reserves a trial slot
    /// atomically, so concurrent callers can never exceed `half_open_requests`.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, Rejection> {
        let mut core = self.lock();
        let admission = self.admit(&mut core, Instant::now());
        self.unlock(core);

        admission.map(|(generation, trial)| CallPermit {
            breaker: self,
            generation,
            trial,
            settled: false,
        })
    }

    /// Admission decision; returns the permit's generation and trial flag.
    fn admit(&self, core: &mut Core, now: Instant) -> Result<(u64, bool), Rejection> {
        if core.state == CircuitState::Open {
            if core.retry_after(self.settings.reset_timeout(), now).is_zero() {
                self.enter(core, CircuitState::HalfOpen);
            } else {
                return Err(self.reject(core, now));
            }
        }

        let trial = core.state == CircuitState::HalfOpen;
        if trial {
            if core.half_open_successes + core.half_open_in_flight >= self.settings.half_open_requests {
                return Err(self.reject(core, now));
            }
            core.half_open_in_flight += 1;
        }
        Ok((core.generation, trial))
    }

    fn reject(&self, core: &mut Core, now: Instant) -> Rejection {
        core.stats.total_rejections += 1;
        metrics::record_rejection(&self.name);
        tracing::debug!(service = %self.name, state = %core.state, "Call rejected by circuit breaker");
        Rejection {
            state: core.state,
            retry_after: core.retry_after(self.settings.reset_timeout(), now),
        }
    }

    fn record(&self, generation: u64, trial: bool, outcome: Outcome) {
        let mut core = self.lock();
        metrics::record_outcome(&self.name, outcome);

        match outcome {
            Outcome::Success => {
                core.stats.total_requests += 1;
                core.stats.total_successes += 1;
            }
            Outcome::Failure => {
                core.stats.total_requests += 1;
                core.stats.total_failures += 1;
            }
            Outcome::Timeout => {
                core.stats.total_requests += 1;
                core.stats.total_failures += 1;
                core.stats.total_timeouts += 1;
            }
            Outcome::Cancelled => core.stats.total_cancellations += 1,
        }

        if generation != core.generation {
            return;
        }
        if trial {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }

        match (core.state, outcome) {
            (_, Outcome::Cancelled) | (CircuitState::Open, _) => {}
            (CircuitState::Closed, outcome) => {
                core.requests += 1;
                if outcome == Outcome::Success {
                    core.successes += 1;
                } else {
                    core.failures += 1;
                }
                if core.over_threshold(&self.settings) {
                    core.last_failure = Some(Instant::now());
                    self.enter(&mut core, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                core.half_open_successes += 1;
                if core.half_open_successes >= self.settings.half_open_requests {
                    self.enter(&mut core, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, _) => {
                core.last_failure = Some(Instant::now());
                self.enter(&mut core, CircuitState::Open);
            }
        }
        self.unlock(core);
    }

    /// The only place `state` changes.
    fn enter(&self, core: &mut Core, to: CircuitState) {
        let from = core.state;
        core.state = to;
        core.generation += 1;
        core.half_open_successes = 0;
        core.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            core.requests = 0;
            core.successes = 0;
            core.failures = 0;
        }

        if from == to {
            return;
        }
        core.stats.state_changes += 1;
        core.stats.last_state_change = Utc::now();
        core.pending = Some((from, to));
        metrics::record_breaker_state(&self.name, to);

        if to == CircuitState::Open {
            tracing::warn!(
                service = %self.name,
                from = %from,
                failures = core.failures,
                requests = core.requests,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(service = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        }
    }

    /// Run `operation` under breaker protection.
    ///
    /// With a fallback, denials, failures and timeouts all resolve to the
    /// fallback value; the failure is still counted. Without one, the caller
    /// gets `BreakerError`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        fallback: Option<Fallback<T>>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                return match fallback {
                    Some(fallback) => Ok(fallback.resolve()),
                    None => Err(BreakerError::Open {
                        service: self.name.clone(),
                        retry_after: rejection.retry_after,
                    }),
                };
            }
        };

        let timeout = self.timeout();
        let error = match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                permit.succeed();
                return Ok(value);
            }
            Ok(Err(err)) => {
                permit.fail();
                BreakerError::Operation(err)
            }
            Err(_) => {
                permit.time_out();
                BreakerError::Timeout {
                    service: self.name.clone(),
                    after: timeout,
                }
            }
        };

        match fallback {
            Some(fallback) => Ok(fallback.resolve()),
            None => Err(error),
        }
    }

    /// Administrative trip. The reset timeout counts from now.
    pub fn force_open(&self) {
        let mut core = self.lock();
        core.last_failure = Some(Instant::now());
        self.enter(&mut core, CircuitState::Open);
        self.unlock(core);
    }

    /// Administrative close. Clears the rolling window, keeps lifetime stats.
    pub fn force_close(&self) {
        let mut core = self.lock();
        core.last_failure = None;
        self.enter(&mut core, CircuitState::Closed);
        self.unlock(core);
    }

    pub fn reset(&self) {
        self.force_close();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let core = self.lock();
        let error_rate = if core.requests == 0 {
            0.0
        } else {
            let pct = core.failures as f64 / core.requests as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        };
        let retry_after = if core.state == CircuitState::Open {
            retry_after_secs(core.retry_after(self.settings.reset_timeout(), now))
        } else {
            0
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: core.state,
            failures: core.failures,
            successes: core.successes,
            requests: core.requests,
            error_rate,
            half_open_successes: core.half_open_successes,
            retry_after,
            settings: self.settings.clone(),
            stats: core.stats.clone(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission ticket for one protected call.
///
/// Settling consumes the permit; dropping it unsettled records a cancellation.
#[must_use = "dropping a permit records the call as cancelled"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open probe.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settle(Outcome::Success);
    }

    pub fn fail(mut self) {
        self.settle(Outcome::Failure);
    }

    pub fn time_out(mut self) {
        self.settle(Outcome::Timeout);
    }

    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.record(self.generation, self.trial, outcome);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Cancelled);
    }
}
