//! Round policy: which operation to perform and how large
//!
//! The validator asks a [`RoundPolicy`] at the start of every round whether
//! to send or receive, and how many samples or bytes to move. The default
//! [`RandomPolicy`] draws from a seeded [`SmallRng`] so a failing run can be
//! reproduced from its seed; tests inject scripted policies instead.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::sample::SAMPLE_WIDTH;

/// Upper bound on the send run-length multiplier
pub const MAX_SEND_MULTIPLIER: usize = 1024;

/// Upper bound on samples moved in a single round, in either direction
pub const MAX_ROUND_SAMPLES: usize = 1 << 20;

/// Operation chosen for a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Transmit a run of consecutive samples
    Send,
    /// Receive and verify whatever the device has ready
    Receive,
}

/// Decides the shape of each validator round
pub trait RoundPolicy {
    /// Pick the operation for the next round
    fn choose_operation(&mut self) -> Operation;

    /// Number of samples to transmit in a send round (at least 1)
    fn choose_send_samples(&mut self) -> usize;

    /// Maximum number of bytes to request in a receive round (at least 1)
    fn choose_recv_bytes(&mut self) -> usize;
}

impl<P: RoundPolicy + ?Sized> RoundPolicy for &mut P {
    fn choose_operation(&mut self) -> Operation {
        (**self).choose_operation()
    }

    fn choose_send_samples(&mut self) -> usize {
        (**self).choose_send_samples()
    }

    fn choose_recv_bytes(&mut self) -> usize {
        (**self).choose_recv_bytes()
    }
}

/// Tunables for [`RandomPolicy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// A send happens with probability `1 / send_one_in`
    pub send_one_in: u32,
    /// Inclusive range for the drawn send run length, before scaling
    pub send_run: (usize, usize),
    /// Multiplier applied to the drawn send run length
    pub send_multiplier: usize,
    /// Inclusive range for the drawn receive size, in whole samples
    pub recv_samples: (usize, usize),
    /// Seed for the generator
    pub seed: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            send_one_in: 10,
            send_run: (1, 512),
            send_multiplier: 4,
            recv_samples: (1, 1024),
            seed: 0,
        }
    }
}

impl PolicyConfig {
    /// Largest send a policy with this config can request, in bytes
    pub fn max_send_bytes(&self) -> usize {
        let multiplier = self.send_multiplier.clamp(1, MAX_SEND_MULTIPLIER);
        self.send_run
            .1
            .saturating_mul(multiplier)
            .min(MAX_ROUND_SAMPLES)
            * SAMPLE_WIDTH
    }

    /// Largest receive a policy with this config can request, in bytes
    pub fn max_recv_bytes(&self) -> usize {
        self.recv_samples.1.min(MAX_ROUND_SAMPLES) * SAMPLE_WIDTH
    }
}

/// Seeded random policy biased toward receives
#[derive(Debug)]
pub struct RandomPolicy {
    config: PolicyConfig,
    rng: SmallRng,
}

impl RandomPolicy {
    /// Create a policy, normalising degenerate ranges so every draw is valid
    pub fn new(mut config: PolicyConfig) -> Self {
        config.send_one_in = config.send_one_in.max(1);
        if config.send_multiplier > MAX_SEND_MULTIPLIER {
            log::warn!(
                "Send multiplier {} too large, clamping to {}",
                config.send_multiplier,
                MAX_SEND_MULTIPLIER
            );
        }
        config.send_multiplier = config.send_multiplier.clamp(1, MAX_SEND_MULTIPLIER);
        config.send_run = normalise_range(config.send_run);
        config.recv_samples = normalise_range(config.recv_samples);

        Self {
            rng: SmallRng::seed_from_u64(config.seed),
            config,
        }
    }

    /// Effective configuration after normalisation
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl RoundPolicy for RandomPolicy {
    fn choose_operation(&mut self) -> Operation {
        if self.rng.gen_range(0..self.config.send_one_in) == 0 {
            Operation::Send
        } else {
            Operation::Receive
        }
    }

    fn choose_send_samples(&mut self) -> usize {
        let (lo, hi) = self.config.send_run;
        self.rng
            .gen_range(lo..=hi)
            .saturating_mul(self.config.send_multiplier)
            .min(MAX_ROUND_SAMPLES)
    }

    fn choose_recv_bytes(&mut self) -> usize {
        let (lo, hi) = self.config.recv_samples;
        self.rng.gen_range(lo..=hi) * SAMPLE_WIDTH
    }
}

/// Clamp a range to `1..=MAX_ROUND_SAMPLES` and order its bounds
fn normalise_range((lo, hi): (usize, usize)) -> (usize, usize) {
    let lo = lo.clamp(1, MAX_ROUND_SAMPLES);
    let hi = hi.clamp(1, MAX_ROUND_SAMPLES);
    if lo <= hi {
        (lo, hi)
    } else {
        log::warn!("Inverted range {}..={}, swapping bounds", lo, hi);
        (hi, lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_shape() {
        let config = PolicyConfig::default();
        assert_eq!(config.send_one_in, 10);
        assert_eq!(config.max_send_bytes(), 512 * 4 * 8);
        assert_eq!(config.max_recv_bytes(), 8192);
    }

    #[test]
    fn test_random_policy_bounds() {
        let mut policy = RandomPolicy::default();
        for _ in 0..2000 {
            let samples = policy.choose_send_samples();
            assert!((4..=2048).contains(&samples));
            assert_eq!(samples % 4, 0);

            let bytes = policy.choose_recv_bytes();
            assert!((8..=8192).contains(&bytes));
            assert_eq!(bytes % SAMPLE_WIDTH, 0);
        }
    }

    #[test]
    fn test_random_policy_biased_toward_receive() {
        let mut policy = RandomPolicy::default();
        let sends = (0..10_000)
            .filter(|_| policy.choose_operation() == Operation::Send)
            .count();
        // Expect roughly 1000; allow generous slack
        assert!(sends > 700 && sends < 1300, "sends = {}", sends);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let config = PolicyConfig {
            seed: 1234,
            ..Default::default()
        };
        let mut a = RandomPolicy::new(config.clone());
        let mut b = RandomPolicy::new(config);
        for _ in 0..100 {
            assert_eq!(a.choose_operation(), b.choose_operation());
            assert_eq!(a.choose_recv_bytes(), b.choose_recv_bytes());
        }
    }

    #[test]
    fn test_always_send_when_one_in_one() {
        let mut policy = RandomPolicy::new(PolicyConfig {
            send_one_in: 1,
            ..Default::default()
        });
        assert!((0..50).all(|_| policy.choose_operation() == Operation::Send));
    }

    #[test]
    fn test_degenerate_config_normalised() {
        let policy = RandomPolicy::new(PolicyConfig {
            send_one_in: 0,
            send_run: (0, 0),
            send_multiplier: 0,
            recv_samples: (16, 2),
            seed: 0,
        });
        let config = policy.config();
        assert_eq!(config.send_one_in, 1);
        assert_eq!(config.send_multiplier, 1);
        assert_eq!(config.send_run, (1, 1));
        assert_eq!(config.recv_samples, (2, 16));
    }

    #[test]
    fn test_oversized_config_clamped() {
        let config = PolicyConfig {
            send_one_in: 1,
            send_run: (usize::MAX - 1, usize::MAX),
            send_multiplier: 1 << 62,
            recv_samples: (1, usize::MAX),
            seed: 5,
        };
        assert_eq!(config.max_send_bytes(), MAX_ROUND_SAMPLES * SAMPLE_WIDTH);
        assert_eq!(config.max_recv_bytes(), MAX_ROUND_SAMPLES * SAMPLE_WIDTH);

        let mut policy = RandomPolicy::new(config);
        assert_eq!(policy.config().send_multiplier, MAX_SEND_MULTIPLIER);
        assert_eq!(policy.config().send_run, (MAX_ROUND_SAMPLES, MAX_ROUND_SAMPLES));
        for _ in 0..20 {
            assert_eq!(policy.choose_send_samples(), MAX_ROUND_SAMPLES);
            assert!(policy.choose_recv_bytes() <= MAX_ROUND_SAMPLES * SAMPLE_WIDTH);
        }
    }
}
