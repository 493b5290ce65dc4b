//! Synthetic workload with injected faults.
//!
//! `GET /slow` runs this to exercise the instrumentation pipeline under
//! the three outcomes a real dependency produces: it suspends, then
//! either resolves with a latency or fails with a canned reason.
//!
//! The randomness source is owned by the simulator and can be seeded,
//! so the distribution of outcomes is reproducible in tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Latencies the simulated task can take, in milliseconds.
pub const LATENCY_CHOICES_MS: [u64; 9] = [100, 150, 200, 300, 500, 600, 1000, 1400, 2500];

/// Canned failure reasons.
pub const FAILURE_REASONS: [&str; 4] = [
    "DB Payment Failure",
    "DB Server is Down",
    "Access Denied",
    "Not Found Error",
];

/// Sides of the failure die; the task fails when it lands on the top face.
pub const FAILURE_DIE_SIDES: u32 = 8;

/// A failure injected by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SimulatedFailure {
    reason: &'static str,
}

impl SimulatedFailure {
    /// The canned reason, also used as the client-facing error message.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// Result of one draw, before any waiting happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The task completes after `duration_ms`.
    Complete { duration_ms: u64 },
    /// The task fails immediately.
    Fail(SimulatedFailure),
}

/// Randomized slow task used by the heavy route.
pub struct WorkloadSimulator {
    rng: Mutex<StdRng>,
}

impl WorkloadSimulator {
    /// Create a simulator driven by the given generator.
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Create a simulator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Create a deterministic simulator.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Decide the outcome of one run without waiting.
    ///
    /// The latency is drawn first and the failure die second, so a seeded
    /// generator yields the same latency sequence whether or not runs fail.
    pub fn draw(&self) -> Outcome {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let duration_ms = LATENCY_CHOICES_MS
            .choose(&mut *rng)
            .copied()
            .unwrap_or(100);
        let roll = rng.gen_range(1..=FAILURE_DIE_SIDES);

        if roll == FAILURE_DIE_SIDES {
            Outcome::Fail(choose_failure(&mut rng))
        } else {
            Outcome::Complete { duration_ms }
        }
    }

    /// Pick one canned failure.
    pub fn pick_failure(&self) -> SimulatedFailure {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        choose_failure(&mut rng)
    }

    /// Run the simulated task.
    ///
    /// Suspends for the drawn latency and resolves with it, or fails
    /// without waiting.
    pub async fn run(&self) -> Result<u64, SimulatedFailure> {
        match self.draw() {
            Outcome::Complete { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                Ok(duration_ms)
            }
            Outcome::Fail(failure) => Err(failure),
        }
    }
}

fn choose_failure(rng: &mut StdRng) -> SimulatedFailure {
    let reason = FAILURE_REASONS
        .choose(rng)
        .copied()
        .unwrap_or("DB Server is Down");
    SimulatedFailure { reason }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_is_reproducible_for_same_seed() {
        let first = WorkloadSimulator::seeded(42);
        let second = WorkloadSimulator::seeded(42);

        for _ in 0..100 {
            assert_eq!(first.draw(), second.draw());
        }
    }

    #[test]
    fn test_draw_only_produces_enumerated_outcomes() {
        let simulator = WorkloadSimulator::seeded(7);

        for _ in 0..2_000 {
            match simulator.draw() {
                Outcome::Complete { duration_ms } => {
                    assert!(LATENCY_CHOICES_MS.contains(&duration_ms));
                }
                Outcome::Fail(failure) => {
                    assert!(FAILURE_REASONS.contains(&failure.reason()));
                }
            }
        }
    }

    #[test]
    fn test_failure_rate_is_one_in_eight() {
        const TRIALS: u32 = 10_000;
        let simulator = WorkloadSimulator::seeded(2024);

        let failures = (0..TRIALS)
            .filter(|_| matches!(simulator.draw(), Outcome::Fail(_)))
            .count();

        let rate = failures as f64 / f64::from(TRIALS);
        // Standard error at p = 0.125 over 10k trials is ~0.0033.
        assert!(
            (rate - 0.125).abs() < 0.02,
            "failure rate {rate} outside expected band"
        );
    }

    #[test]
    fn test_every_latency_and_reason_is_reachable() {
        let simulator = WorkloadSimulator::seeded(99);
        let mut latencies = std::collections::HashSet::new();
        let mut reasons = std::collections::HashSet::new();

        for _ in 0..5_000 {
            match simulator.draw() {
                Outcome::Complete { duration_ms } => {
                    latencies.insert(duration_ms);
                }
                Outcome::Fail(failure) => {
                    reasons.insert(failure.reason());
                }
            }
        }

        assert_eq!(latencies.len(), LATENCY_CHOICES_MS.len());
        assert_eq!(reasons.len(), FAILURE_REASONS.len());
    }

    #[test]
    fn test_pick_failure_returns_canned_reason() {
        let simulator = WorkloadSimulator::from_entropy();

        for _ in 0..50 {
            let failure = simulator.pick_failure();
            assert!(FAILURE_REASONS.contains(&failure.reason()));
            assert_eq!(failure.to_string(), failure.reason());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_drawn_latency() {
        let simulator = WorkloadSimulator::seeded(11);
        let expected = WorkloadSimulator::seeded(11);

        for _ in 0..20 {
            let started = tokio::time::Instant::now();
            let result = simulator.run().await;

            match expected.draw() {
                Outcome::Complete { duration_ms } => {
                    assert_eq!(result, Ok(duration_ms));
                    assert!(started.elapsed() >= Duration::from_millis(duration_ms));
                }
                Outcome::Fail(failure) => {
                    assert_eq!(result, Err(failure));
                    assert_eq!(started.elapsed(), Duration::ZERO);
                }
            }
        }
    }
}
