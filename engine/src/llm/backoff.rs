//! Exponential-jittered backoff for `capacity_exhausted` retries (§4.3).
//!
//! `d_n = min(base * 2^(n-1) * (1 + 0.2*U), cap)` where `U` is uniform in `[-1, 1]`.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(600),
            max_attempts: 20,
        }
    }
}

impl BackoffConfig {
    /// Pure delay computation given the jitter sample `u` in `[-1, 1]`, so tests can
    /// exercise the formula without depending on `rand`'s output.
    pub fn delay_for_attempt(&self, attempt: u32, u: f64) -> Duration {
        debug_assert!(attempt >= 1);
        let base_secs = self.base.as_secs_f64();
        let cap_secs = self.cap.as_secs_f64();
        let exp = base_secs * 2f64.powi(attempt as i32 - 1);
        let jittered = exp * (1.0 + 0.2 * u);
        let bounded = jittered.max(0.0).min(cap_secs);
        Duration::from_secs_f64(bounded)
    }

    /// Draws a fresh jitter sample from the thread RNG and computes the delay.
    pub fn delay_for_attempt_rng(&self, attempt: u32) -> Duration {
        let u = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_for_attempt(attempt, u)
    }
}
