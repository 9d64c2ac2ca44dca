//! Admission policy hooks.
//!
//! The arrival handler consults two pluggable policies before admitting
//! a request: a rate limiter and a circuit breaker. Both default to
//! permissive no-ops; scenarios can wire the concrete implementations
//! below through their `policies` section.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use maquette_scenario::{PoliciesSpec, RetrySpec};
use maquette_types::SimTime;

use crate::autoscale::{NoAutoscaling, ScalingPolicy, UtilizationAutoscaler};

/// Rate-limit decision hook, consulted once per arrival.
pub trait RateLimitPolicy: Send + Sync {
    /// Returns true if the request may be admitted.
    fn allow(&self, service: &str, endpoint: &str, now: SimTime) -> bool;
}

/// Circuit-breaker decision hook.
///
/// The arrival handler consults `allow`; the lifecycle handlers report
/// outcomes through `record_success` / `record_failure`.
pub trait CircuitBreakerPolicy: Send + Sync {
    /// Returns true if the breaker is closed for this endpoint.
    fn allow(&self, service: &str, endpoint: &str, now: SimTime) -> bool;

    /// Reports a successful completion.
    fn record_success(&self, service: &str, endpoint: &str, now: SimTime);

    /// Reports a failure after admission.
    fn record_failure(&self, service: &str, endpoint: &str, now: SimTime);
}

/// Permissive policy used when a scenario configures nothing.
#[derive(Debug, Default)]
pub struct AllowAll;

impl RateLimitPolicy for AllowAll {
    fn allow(&self, _service: &str, _endpoint: &str, _now: SimTime) -> bool {
        true
    }
}

impl CircuitBreakerPolicy for AllowAll {
    fn allow(&self, _service: &str, _endpoint: &str, _now: SimTime) -> bool {
        true
    }

    fn record_success(&self, _service: &str, _endpoint: &str, _now: SimTime) {}

    fn record_failure(&self, _service: &str, _endpoint: &str, _now: SimTime) {}
}

/// Fixed-window rate limiter over sim time.
///
/// Counts admissions per endpoint per one-second virtual window and
/// denies once the window count reaches the limit.
#[derive(Debug)]
pub struct FixedWindowRateLimit {
    rps_limit: f64,
    windows: Mutex<HashMap<String, (u64, u64)>>,
}

impl FixedWindowRateLimit {
    /// Creates a limiter admitting at most `rps_limit` requests per
    /// endpoint per virtual second.
    pub fn new(rps_limit: f64) -> Self {
        Self {
            rps_limit,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimitPolicy for FixedWindowRateLimit {
    fn allow(&self, service: &str, endpoint: &str, now: SimTime) -> bool {
        let window = now.as_nanos() / 1_000_000_000;
        let key = format!("{service}:{endpoint}");

        let mut windows = self.windows.lock().expect("rate limit mutex poisoned");
        let entry = windows.entry(key).or_insert((window, 0));
        if entry.0 != window {
            *entry = (window, 0);
        }
        if (entry.1 as f64) < self.rps_limit {
            entry.1 += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<SimTime>,
}

/// Breaker that opens after a run of consecutive failures and closes
/// again after a sim-time cool-down.
#[derive(Debug)]
pub struct ConsecutiveFailureBreaker {
    failure_threshold: u32,
    cooldown_ms: f64,
    state: Mutex<HashMap<String, BreakerState>>,
}

impl ConsecutiveFailureBreaker {
    /// Creates a breaker that opens after `failure_threshold` consecutive
    /// failures and stays open for `cooldown_ms` of sim time.
    pub fn new(failure_threshold: u32, cooldown_ms: f64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown_ms,
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl CircuitBreakerPolicy for ConsecutiveFailureBreaker {
    fn allow(&self, service: &str, endpoint: &str, now: SimTime) -> bool {
        let key = format!("{service}:{endpoint}");
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        let entry = state.entry(key).or_default();

        match entry.open_until {
            Some(until) if now < until => false,
            Some(_) => {
                // Cool-down elapsed; close and start fresh.
                *entry = BreakerState::default();
                true
            }
            None => true,
        }
    }

    fn record_success(&self, service: &str, endpoint: &str, _now: SimTime) {
        let key = format!("{service}:{endpoint}");
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if let Some(entry) = state.get_mut(&key) {
            entry.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, service: &str, endpoint: &str, now: SimTime) {
        let key = format!("{service}:{endpoint}");
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        let entry = state.entry(key).or_default();

        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.failure_threshold {
            entry.open_until = Some(now.saturating_add_millis(self.cooldown_ms));
        }
    }
}

/// Retry settings applied to allocation failures after admission.
///
/// Disabled by default: a request gets exactly one attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_ms: f64,
}

impl RetryPolicy {
    /// One attempt, no retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0.0,
        }
    }

    /// Creates a policy from scenario settings.
    pub fn from_spec(spec: &RetrySpec) -> Self {
        Self {
            max_attempts: spec.max_attempts.max(1),
            backoff_ms: spec.backoff_ms.max(0.0),
        }
    }

    /// Returns true if a request on its `attempts`-th try may try again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, in milliseconds.
    pub fn backoff_ms(&self) -> f64 {
        self.backoff_ms
    }
}

/// The policies consulted by the lifecycle handlers.
#[derive(Clone)]
pub struct PolicySet {
    /// Admission rate limit.
    pub rate_limit: Arc<dyn RateLimitPolicy>,
    /// Circuit breaker.
    pub circuit_breaker: Arc<dyn CircuitBreakerPolicy>,
    /// Allocation retry settings.
    pub retry: RetryPolicy,
    /// Autoscaling decisions, offered after completions.
    pub scaling: Arc<dyn ScalingPolicy>,
}

impl PolicySet {
    /// Policies that admit everything, never retry, and never scale.
    pub fn permissive() -> Self {
        Self {
            rate_limit: Arc::new(AllowAll),
            circuit_breaker: Arc::new(AllowAll),
            retry: RetryPolicy::disabled(),
            scaling: Arc::new(NoAutoscaling),
        }
    }

    /// Builds policies from a scenario's `policies` section, defaulting
    /// to permissive hooks for anything unconfigured.
    pub fn from_spec(spec: &PoliciesSpec) -> Self {
        let rate_limit: Arc<dyn RateLimitPolicy> = match &spec.rate_limit {
            Some(limit) => Arc::new(FixedWindowRateLimit::new(limit.rps_limit)),
            None => Arc::new(AllowAll),
        };
        let circuit_breaker: Arc<dyn CircuitBreakerPolicy> = match &spec.circuit_breaker {
            Some(breaker) => Arc::new(ConsecutiveFailureBreaker::new(
                breaker.failure_threshold,
                breaker.cooldown_ms,
            )),
            None => Arc::new(AllowAll),
        };
        let retry = spec
            .retries
            .as_ref()
            .map_or_else(RetryPolicy::disabled, RetryPolicy::from_spec);
        let scaling: Arc<dyn ScalingPolicy> = match &spec.autoscaling {
            Some(autoscaling) if autoscaling.enabled => {
                Arc::new(UtilizationAutoscaler::from_spec(autoscaling))
            }
            _ => Arc::new(NoAutoscaling),
        };
        Self {
            rate_limit,
            circuit_breaker,
            retry,
            scaling,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
