//! Upstream selector (SPEC_FULL §4.D): priority-banded weighted-random
//! selection with a linear slow-start ramp.
//!
//! Generalizes the provider crate's credential router (round-robin and
//! fill-first only) into a priority-banded weighted-random selector. Reuses
//! `rand`, already a workspace dependency used for jittered backoff.

use prism_types::SlowStartPolicy;
use rand::Rng;
use std::time::{Duration, Instant};

/// One selectable upstream: enough of `RuntimeUpstream`'s state to compute
/// an effective weight. `slow_start_recovery_time` is the instant the
/// upstream most recently transitioned back to healthy, if slow-start is in
/// effect for it; `None` means slow-start does not apply (factor 1.0).
#[derive(Debug, Clone, Copy)]
pub struct Candidate<T> {
    pub weight: u32,
    pub priority: u32,
    pub slow_start_recovery_time: Option<Instant>,
    pub handle: T,
}

/// `elapsed = now - recoveryTime`; factor ramps linearly from
/// `initialWeightFactor` to 1.0 over `durationMs`, then clears.
pub fn slow_start_factor(
    recovery_time: Option<Instant>,
    policy: &SlowStartPolicy,
    now: Instant,
) -> f64 {
    let Some(recovery_time) = recovery_time else {
        return 1.0;
    };
    let elapsed = now.saturating_duration_since(recovery_time);
    let duration = Duration::from_millis(policy.duration_ms);
    if elapsed >= duration {
        return 1.0;
    }
    let frac = elapsed.as_secs_f64() / duration.as_secs_f64().max(f64::EPSILON);
    policy.initial_weight_factor + (1.0 - policy.initial_weight_factor) * frac
}

fn effective_weight(weight: u32, factor: f64) -> u32 {
    ((weight as f64 * factor).round() as u32).max(1)
}

/// Select one candidate: group by ascending priority, draw weighted-random
/// within the first group whose total effective weight is nonzero.
pub fn select<'a, T>(
    candidates: &'a [Candidate<T>],
    policy: &SlowStartPolicy,
    now: Instant,
    rng: &mut impl Rng,
) -> Option<&'a Candidate<T>> {
    let mut priorities: Vec<u32> = candidates.iter().map(|c| c.priority).collect();
    priorities.sort_unstable();
    priorities.dedup();

    for priority in priorities {
        let group: Vec<&Candidate<T>> = candidates
            .iter()
            .filter(|c| c.priority == priority)
            .collect();
        let weights: Vec<u32> = group
            .iter()
            .map(|c| effective_weight(c.weight, slow_start_factor(c.slow_start_recovery_time, policy, now)))
            .collect();
        let total: u32 = weights.iter().sum();
        if total == 0 {
            continue;
        }

        let draw = rng.random_range(0..total);
        let mut running = 0u32;
        for (candidate, weight) in group.iter().zip(weights.iter()) {
            running += weight;
            if running > draw {
                return Some(candidate);
            }
        }
        return group.last().copied();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy() -> SlowStartPolicy {
        SlowStartPolicy {
            duration_ms: 30_000,
            initial_weight_factor: 0.1,
        }
    }

    #[test]
    fn no_slow_start_is_full_weight() {
        let now = Instant::now();
        assert_eq!(slow_start_factor(None, &policy(), now), 1.0);
    }

    #[test]
    fn slow_start_ramps_linearly() {
        let p = policy();
        let recovery = Instant::now() - Duration::from_millis(15_000);
        let now = Instant::now();
        let factor = slow_start_factor(Some(recovery), &p, now);
        // Halfway through the ramp: roughly (0.1 + 0.9*0.5) = 0.55
        assert!((factor - 0.55).abs() < 0.05, "factor was {factor}");
    }

    #[test]
    fn slow_start_clears_after_duration() {
        let p = policy();
        let recovery = Instant::now() - Duration::from_millis(40_000);
        let now = Instant::now();
        assert_eq!(slow_start_factor(Some(recovery), &p, now), 1.0);
    }

    #[test]
    fn lower_priority_number_is_tried_first() {
        let candidates = vec![
            Candidate {
                weight: 100,
                priority: 2,
                slow_start_recovery_time: None,
                handle: "low-priority-band",
            },
            Candidate {
                weight: 100,
                priority: 1,
                slow_start_recovery_time: None,
                handle: "high-priority-band",
            },
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let picked = select(&candidates, &policy(), Instant::now(), &mut rng).unwrap();
        assert_eq!(picked.handle, "high-priority-band");
    }

    #[test]
    fn single_candidate_is_always_picked() {
        let candidates = vec![Candidate {
            weight: 1,
            priority: 1,
            slow_start_recovery_time: None,
            handle: "only",
        }];
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select(&candidates, &policy(), Instant::now(), &mut rng).unwrap();
        assert_eq!(picked.handle, "only");
    }
}
