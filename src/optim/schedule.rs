//! Staircase exponential learning-rate decay.

use serde::{Deserialize, Serialize};

/// `rate(step) = base_rate · decay_rate ^ floor(step / decay_interval)`.
///
/// Stateless: the rate is a pure function of the optimizer's global step, so
/// a resumed run follows the same trajectory from its restored step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDecay {
    pub base_rate: f64,
    pub decay_rate: f64,
    pub decay_interval: u64,
}

impl ExponentialDecay {
    pub fn new(base_rate: f64, decay_rate: f64, decay_interval: u64) -> Self {
        Self { base_rate, decay_rate, decay_interval: decay_interval.max(1) }
    }

    pub fn rate(&self, global_step: u64) -> f64 {
        let stairs = global_step / self.decay_interval;
        self.base_rate * self.decay_rate.powf(stairs as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn staircase_boundaries() {
        let s = ExponentialDecay::new(0.02, 0.95, 500);
        assert_eq!(s.rate(0), 0.02);
        assert_eq!(s.rate(499), 0.02);
        assert!((s.rate(500) - 0.02 * 0.95).abs() < 1e-15);
        assert!((s.rate(1000) - 0.02 * 0.95 * 0.95).abs() < 1e-15);
    }

    proptest! {
        #[test]
        fn rate_never_increases(
            base in 1e-5f64..1.0,
            decay in 0.01f64..=1.0,
            interval in 1u64..1000,
            step in 0u64..1_000_000,
        ) {
            let s = ExponentialDecay::new(base, decay, interval);
            prop_assert!(s.rate(step + 1) <= s.rate(step));
            prop_assert_eq!(s.rate(interval - 1), base);
        }

        #[test]
        fn flat_between_decays(interval in 1u64..500, stair in 0u64..50, offset in 0u64..500) {
            let s = ExponentialDecay::new(0.1, 0.5, interval);
            let start = stair * interval;
            let inside = start + offset % interval;
            prop_assert_eq!(s.rate(start), s.rate(inside));
        }
    }
}
