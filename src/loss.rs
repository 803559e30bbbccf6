//! Simulated datagram loss.
//!
//! The server consults a [`LossModel`] for every datagram received on an
//! established connection and silently discards the ones it selects, which
//! is what exercises the Go-Back-N machinery end to end on a loopback link.
//!
//! Two exemptions keep a lossy run from wedging on its control packets:
//! segments whose flags are exactly `SYN` or exactly `FIN` always pass.
//! Everything else is the caller's concern; in particular the model does not
//! know about connection phases, the server simply stops consulting it
//! outside of the established phase.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::flags;

/// Bernoulli drop decision with a per-connection RNG and a drop counter.
#[derive(Debug)]
pub struct LossModel {
    /// Probability in `[0.0, 1.0]` that a non-exempt datagram is dropped.
    rate: f64,
    rng: StdRng,
    dropped: u64,
}

impl LossModel {
    /// Model seeded from the operating system.
    pub fn new(rate: f64) -> Self {
        Self::with_rng(rate, StdRng::from_os_rng())
    }

    /// Model with a fixed seed, for reproducible runs and tests.
    pub fn seeded(rate: f64, seed: u64) -> Self {
        Self::with_rng(rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rate: f64, rng: StdRng) -> Self {
        debug_assert!((0.0..=1.0).contains(&rate), "loss rate out of range");
        Self {
            rate,
            rng,
            dropped: 0,
        }
    }

    /// Decide the fate of one inbound datagram.
    ///
    /// Returns `true` when the datagram should be discarded without
    /// processing.  Exempt flag patterns return `false` without consuming
    /// randomness, so seeded runs stay reproducible regardless of how many
    /// control packets pass through.
    pub fn should_drop(&mut self, packet_flags: u8) -> bool {
        if packet_flags == flags::SYN || packet_flags == flags::FIN {
            return false;
        }
        let drop = self.rng.random::<f64>() < self.rate;
        if drop {
            self.dropped += 1;
        }
        drop
    }

    /// Datagrams discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Configured drop probability.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
