//! Failover state machine (SPEC_FULL §4.E): per-upstream health tracking
//! plus the retry-orchestration helpers the request orchestrator drives.
//!
//! Generalizes the provider crate's cooldown-until-timestamp unavailability
//! tracking and its status-code retry classification into the full
//! three-state (HEALTHY / HALF_OPEN / UNHEALTHY) machine below. One mutex
//! per `RuntimeUpstream` replaces the existing single-field swap; the
//! jittered-exponential-backoff-between-rounds shape already in the
//! dispatch loop is kept verbatim, re-scoped to attempt-queue rounds.

use prism_types::{AttemptClass, BackoffPolicy, FailoverPolicy, Upstream, UpstreamStatus};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct HealthState {
    status: UpstreamStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
    /// Set when a HALF_OPEN success restores health; cleared by the
    /// selector once the slow-start ramp completes.
    slow_start_recovery_time: Option<Instant>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: UpstreamStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            slow_start_recovery_time: None,
        }
    }
}

/// One upstream plus its mutable health state. Selection reads a snapshot
/// through `selector::Candidate`; request outcomes feed back via
/// `on_success`/`on_failure`.
#[derive(Debug)]
pub struct RuntimeUpstream {
    pub upstream: Upstream,
    state: Mutex<HealthState>,
}

impl RuntimeUpstream {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn status(&self) -> UpstreamStatus {
        self.state.lock().unwrap().status
    }

    pub fn slow_start_recovery_time(&self) -> Option<Instant> {
        self.state.lock().unwrap().slow_start_recovery_time
    }

    /// Time since the last recorded failure, used by the retry orchestrator
    /// to decide whether an UNHEALTHY upstream is eligible to try again.
    pub fn time_since_last_failure(&self, now: Instant) -> Option<Duration> {
        self.state
            .lock()
            .unwrap()
            .last_failure_time
            .map(|t| now.saturating_duration_since(t))
    }

    /// Event: this upstream was selected while UNHEALTHY and is eligible
    /// for a recovery probe (caller has already checked
    /// `recoveryIntervalMs`). Transitions UNHEALTHY → HALF_OPEN.
    pub fn mark_half_open(&self) {
        let mut s = self.state.lock().unwrap();
        if s.status == UpstreamStatus::Unhealthy {
            s.status = UpstreamStatus::HalfOpen;
        }
    }

    /// Event: a request against this upstream succeeded. Returns whether
    /// this success restored health from HALF_OPEN (tag the attempt
    /// `recovery` per SPEC_FULL §4.E).
    pub fn on_success(&self, policy: &FailoverPolicy, now: Instant) -> bool {
        let mut s = self.state.lock().unwrap();
        match s.status {
            UpstreamStatus::Healthy => {
                s.consecutive_failures = 0;
                s.consecutive_successes += 1;
                false
            }
            UpstreamStatus::HalfOpen => {
                s.consecutive_successes += 1;
                if s.consecutive_successes >= policy.healthy_threshold {
                    s.status = UpstreamStatus::Healthy;
                    s.last_failure_time = None;
                    s.consecutive_failures = 0;
                    s.slow_start_recovery_time = Some(now);
                    true
                } else {
                    false
                }
            }
            UpstreamStatus::Unhealthy => {
                // A direct success while UNHEALTHY (e.g. a concurrent probe
                // beat this one) is treated like a HALF_OPEN success.
                s.status = UpstreamStatus::HalfOpen;
                s.consecutive_successes = 1;
                if s.consecutive_successes >= policy.healthy_threshold {
                    s.status = UpstreamStatus::Healthy;
                    s.last_failure_time = None;
                    s.consecutive_failures = 0;
                    s.slow_start_recovery_time = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Event: a request against this upstream failed (retryable or not —
    /// the failover machine only cares that the upstream itself errored).
    pub fn on_failure(&self, policy: &FailoverPolicy, now: Instant) {
        let mut s = self.state.lock().unwrap();
        match s.status {
            UpstreamStatus::Healthy => {
                s.consecutive_failures += 1;
                s.consecutive_successes = 0;
                if s.consecutive_failures >= policy.failure_threshold {
                    s.status = UpstreamStatus::Unhealthy;
                    s.last_failure_time = Some(now);
                }
            }
            UpstreamStatus::HalfOpen => {
                s.status = UpstreamStatus::Unhealthy;
                s.last_failure_time = Some(now);
                s.consecutive_successes = 0;
            }
            UpstreamStatus::Unhealthy => {
                s.last_failure_time = Some(now);
            }
        }
    }
}

/// `classify` for the `RequestLog` attempt tag (SPEC_FULL §3/§4.E).
pub fn classify_attempt(is_first_success: bool, restored_health: bool) -> AttemptClass {
    if is_first_success && restored_health {
        AttemptClass::Recovery
    } else if is_first_success {
        AttemptClass::Final
    } else {
        AttemptClass::Retry
    }
}

/// A retryable HTTP status per the upstream's configured `retryableStatusCodes`.
pub fn is_retryable_status(policy: &FailoverPolicy, status: u16) -> bool {
    policy.retryable_status_codes.contains(&status)
}

/// `addJitter(base, factor)`: uniform in `[base - base*factor, base + base*factor]`.
pub fn add_jitter(base_ms: u64, factor: f64) -> Duration {
    let base = base_ms as f64;
    let spread = base * factor;
    let low = (base - spread).max(0.0);
    let high = base + spread;
    let sample = low + rand::random::<f64>() * (high - low);
    Duration::from_millis(sample.round() as u64)
}

/// `exponentialBackoffWithJitter(attempt, base, max, factor)`.
pub fn exponential_backoff_with_jitter(attempt: u32, policy: &BackoffPolicy) -> Duration {
    let scaled = (policy.base_ms as f64) * 2f64.powi(attempt as i32);
    let capped = scaled.min(policy.max_ms as f64).round() as u64;
    add_jitter(capped, policy.factor)
}

/// Timeout to use for a selected upstream: `requestTimeoutMs` for HEALTHY,
/// `recoveryTimeoutMs` for HALF_OPEN/UNHEALTHY probes.
pub fn timeout_for_status(policy: &FailoverPolicy, status: UpstreamStatus) -> Duration {
    match status {
        UpstreamStatus::Healthy => Duration::from_millis(policy.request_timeout_ms),
        UpstreamStatus::HalfOpen | UpstreamStatus::Unhealthy => {
            Duration::from_millis(policy.recovery_timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FailoverPolicy {
        FailoverPolicy {
            failure_threshold: 3,
            healthy_threshold: 2,
            recovery_interval_ms: 5000,
            recovery_timeout_ms: 3000,
            request_timeout_ms: 30000,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_trips_to_unhealthy_at_threshold() {
        let u = RuntimeUpstream::new(Upstream::default());
        let p = policy();
        let now = Instant::now();
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        assert_eq!(u.status(), UpstreamStatus::Healthy);
        u.on_failure(&p, now);
        assert_eq!(u.status(), UpstreamStatus::Unhealthy);
    }

    #[test]
    fn success_resets_failure_count() {
        let u = RuntimeUpstream::new(Upstream::default());
        let p = policy();
        let now = Instant::now();
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        u.on_success(&p, now);
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        assert_eq!(u.status(), UpstreamStatus::Healthy);
    }

    #[test]
    fn half_open_requires_healthy_threshold_successes() {
        let u = RuntimeUpstream::new(Upstream::default());
        let p = policy();
        let now = Instant::now();
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        assert_eq!(u.status(), UpstreamStatus::Unhealthy);
        u.mark_half_open();
        assert_eq!(u.status(), UpstreamStatus::HalfOpen);
        let restored = u.on_success(&p, now);
        assert!(!restored);
        assert_eq!(u.status(), UpstreamStatus::HalfOpen);
        let restored = u.on_success(&p, now);
        assert!(restored);
        assert_eq!(u.status(), UpstreamStatus::Healthy);
    }

    #[test]
    fn half_open_failure_returns_to_unhealthy() {
        let u = RuntimeUpstream::new(Upstream::default());
        let p = policy();
        let now = Instant::now();
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        u.on_failure(&p, now);
        u.mark_half_open();
        u.on_failure(&p, now);
        assert_eq!(u.status(), UpstreamStatus::Unhealthy);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let d = add_jitter(1000, 0.2);
            assert!(d.as_millis() >= 800 && d.as_millis() <= 1200);
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let p = BackoffPolicy {
            base_ms: 1000,
            max_ms: 5000,
            factor: 0.0,
        };
        let d = exponential_backoff_with_jitter(10, &p);
        assert_eq!(d.as_millis(), 5000);
    }

    #[test]
    fn retryable_status_lookup() {
        let p = FailoverPolicy::default();
        assert!(is_retryable_status(&p, 503));
        assert!(!is_retryable_status(&p, 404));
    }

    #[test]
    fn attempt_classification() {
        assert_eq!(classify_attempt(false, false), AttemptClass::Retry);
        assert_eq!(classify_attempt(true, false), AttemptClass::Final);
        assert_eq!(classify_attempt(true, true), AttemptClass::Recovery);
    }
}
