//! Per-second data sampling
//!
//! With a sample factor above one, the first record of every second is
//! always kept, later records of the same second survive with probability
//! `1 / factor`. Actions and all other sampled kinds track their seconds
//! separately; Transactions are never sampled.

use std::collections::HashMap;

use crate::record::RecordKind;

/// Seed of every sampler's random sequence.
pub const SAMPLE_SEED: u64 = 98765111;

#[derive(Debug)]
pub struct Sampler {
    factor: u32,
    limit: f64,
    rng: fastrand::Rng,
    action_seconds: SecondIndex,
    other_seconds: SecondIndex,
}

impl Sampler {
    pub fn new(factor: u32) -> Self {
        let factor = factor.max(1);
        Self {
            factor,
            limit: 1.0 / f64::from(factor),
            rng: fastrand::Rng::with_seed(SAMPLE_SEED),
            action_seconds: SecondIndex::default(),
            other_seconds: SecondIndex::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.factor > 1
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Decide whether a record of `kind` at `time` (epoch ms) is kept.
    pub fn keep(&mut self, kind: RecordKind, time: i64) -> bool {
        if !self.is_enabled() || kind == RecordKind::Transaction {
            return true;
        }

        let index = if kind == RecordKind::Action {
            &mut self.action_seconds
        } else {
            &mut self.other_seconds
        };

        if index.test_and_set(time.div_euclid(1000)) {
            self.rng.f64() <= self.limit
        } else {
            true
        }
    }
}

/// Sparse set of seconds, one bit per second in 64 second words.
#[derive(Debug, Default)]
pub struct SecondIndex {
    words: HashMap<i64, u64>,
}

impl SecondIndex {
    /// Mark `second` and report whether it was marked before.
    pub fn test_and_set(&mut self, second: i64) -> bool {
        let word = self.words.entry(second.div_euclid(64)).or_insert(0);
        let bit = 1u64 << second.rem_euclid(64);
        let was_set = *word & bit != 0;
        *word |= bit;
        was_set
    }

    pub fn contains(&self, second: i64) -> bool {
        self.words
            .get(&second.div_euclid(64))
            .is_some_and(|word| word & (1u64 << second.rem_euclid(64)) != 0)
    }
}
