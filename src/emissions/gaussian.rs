//! Additive zero-mean Gaussian noise.

use super::Emission;
use crate::distributions::{Distribution, ZeroMeanNormal};
use crate::prng::Prng;

/// Dirty value is the clean value plus Normal(0, σ²) noise, σ² unknown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gaussian {
    noise: ZeroMeanNormal,
}

impl Gaussian {
    /// InvGamma(1, 1) prior on the noise variance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Emission<f64> for Gaussian {
    fn n(&self) -> f64 {
        self.noise.n()
    }

    fn incorporate_weighted(&mut self, clean: &f64, dirty: &f64, weight: f64) {
        self.noise.incorporate_weighted(&(dirty - clean), weight);
    }

    fn unincorporate_weighted(&mut self, clean: &f64, dirty: &f64, weight: f64) {
        self.noise.unincorporate_weighted(&(dirty - clean), weight);
    }

    fn logp(&self, clean: &f64, dirty: &f64) -> f64 {
        self.noise.logp(&(dirty - clean))
    }

    fn logp_score(&self) -> f64 {
        self.noise.logp_score()
    }

    fn sample_corrupted(&self, clean: &f64, rng: &mut Prng) -> f64 {
        clean + self.noise.sample(rng)
    }

    /// Mean of the corrupted values.
    fn propose_clean(&self, corrupted: &[f64], _rng: &mut Prng) -> Option<f64> {
        if corrupted.is_empty() {
            return None;
        }
        Some(corrupted.iter().sum::<f64>() / corrupted.len() as f64)
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.noise.transition_hyperparameters(rng);
    }
}
