//! Boolean corruption by flipping.

use super::Emission;
use crate::distributions::{BetaBernoulli, Distribution};
use crate::prng::Prng;

/// Dirty value is the clean value flipped with an unknown probability.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BitFlip {
    flipped: BetaBernoulli,
}

impl BitFlip {
    /// Uniform prior on the flip probability.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Emission<bool> for BitFlip {
    fn n(&self) -> f64 {
        self.flipped.n()
    }

    fn incorporate_weighted(&mut self, clean: &bool, dirty: &bool, weight: f64) {
        self.flipped.incorporate_weighted(&(clean != dirty), weight);
    }

    fn unincorporate_weighted(&mut self, clean: &bool, dirty: &bool, weight: f64) {
        self.flipped.unincorporate_weighted(&(clean != dirty), weight);
    }

    fn logp(&self, clean: &bool, dirty: &bool) -> f64 {
        self.flipped.logp(&(clean != dirty))
    }

    fn logp_score(&self) -> f64 {
        self.flipped.logp_score()
    }

    fn sample_corrupted(&self, clean: &bool, rng: &mut Prng) -> bool {
        clean ^ self.flipped.sample(rng)
    }

    /// Majority vote; ties go to the first value.
    fn propose_clean(&self, corrupted: &[bool], _rng: &mut Prng) -> Option<bool> {
        let first = *corrupted.first()?;
        let trues = corrupted.iter().filter(|&&b| b).count();
        let falses = corrupted.len() - trues;
        Some(match trues.cmp(&falses) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => first,
        })
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.flipped.transition_hyperparameters(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_is_symmetric() {
        let mut e = BitFlip::new();
        e.incorporate(&true, &false);
        assert!((e.logp(&true, &false) - e.logp(&false, &true)).abs() < 1e-12);
        assert!((e.logp(&true, &false) - (2.0_f64 / 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_propose_clean_majority() {
        let e = BitFlip::new();
        let mut rng = Prng::new(0);
        assert_eq!(e.propose_clean(&[true, false, true], &mut rng), Some(true));
        assert_eq!(e.propose_clean(&[false, true], &mut rng), Some(false));
        assert_eq!(e.propose_clean(&[], &mut rng), None);
    }

    #[test]
    fn test_unincorporate_restores() {
        let mut e = BitFlip::new();
        e.incorporate(&true, &true);
        let score = e.logp_score();
        e.incorporate(&false, &true);
        e.unincorporate(&false, &true);
        assert!((e.logp_score() - score).abs() < 1e-12);
    }
}
