//! Mixture of "left clean" and an inner corruption model.

use std::marker::PhantomData;

use super::Emission;
use crate::distributions::{BetaBernoulli, Distribution};
use crate::prng::Prng;

/// With unknown probability the dirty value equals the clean value;
/// otherwise it is produced by the inner emission `E`.
///
/// Only dirty pairs (clean ≠ dirty) reach the inner emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Sometimes<T, E> {
    is_dirty: BetaBernoulli,
    inner: E,
    _value: PhantomData<T>,
}

impl<T, E: Emission<T>> Sometimes<T, E> {
    /// Wrap `inner` with a uniform prior on the corruption rate.
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self {
            is_dirty: BetaBernoulli::new(),
            inner,
            _value: PhantomData,
        }
    }

    /// The corruption model used for dirty pairs.
    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<T: PartialEq + Clone, E: Emission<T>> Emission<T> for Sometimes<T, E> {
    fn n(&self) -> f64 {
        self.is_dirty.n()
    }

    fn incorporate_weighted(&mut self, clean: &T, dirty: &T, weight: f64) {
        let changed = clean != dirty;
        self.is_dirty.incorporate_weighted(&changed, weight);
        if changed {
            self.inner.incorporate_weighted(clean, dirty, weight);
        }
    }

    fn unincorporate_weighted(&mut self, clean: &T, dirty: &T, weight: f64) {
        let changed = clean != dirty;
        self.is_dirty.unincorporate_weighted(&changed, weight);
        if changed {
            self.inner.unincorporate_weighted(clean, dirty, weight);
        }
    }

    fn logp(&self, clean: &T, dirty: &T) -> f64 {
        if clean == dirty {
            self.is_dirty.logp(&false)
        } else {
            self.is_dirty.logp(&true) + self.inner.logp(clean, dirty)
        }
    }

    fn logp_score(&self) -> f64 {
        self.is_dirty.logp_score() + self.inner.logp_score()
    }

    fn sample_corrupted(&self, clean: &T, rng: &mut Prng) -> T {
        if self.is_dirty.sample(rng) {
            self.inner.sample_corrupted(clean, rng)
        } else {
            clean.clone()
        }
    }

    /// Most frequent value when one repeats, else the inner proposal.
    fn propose_clean(&self, corrupted: &[T], rng: &mut Prng) -> Option<T> {
        let mut best: Option<(&T, usize)> = None;
        for x in corrupted {
            let count = corrupted.iter().filter(|y| *y == x).count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((x, count));
            }
        }
        match best {
            Some((x, count)) if count > 1 => Some(x.clone()),
            _ => self.inner.propose_clean(corrupted, rng),
        }
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.is_dirty.transition_hyperparameters(rng);
        self.inner.transition_hyperparameters(rng);
    }
}
