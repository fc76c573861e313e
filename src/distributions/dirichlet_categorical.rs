//! Symmetric Dirichlet-Categorical conjugate model.

use super::Distribution;
use crate::math::{choice, ln_gamma, log_choice, HYPERPARAMETER_GRID};
use crate::prng::Prng;

/// Categorical likelihood over `0..k` with the category probabilities
/// integrated out under a symmetric Dirichlet(alpha) prior.
///
/// Values outside `0..k` have probability zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletCategorical {
    alpha: f64,
    counts: Vec<f64>,
    n: f64,
}

impl DirichletCategorical {
    /// `k` categories with `alpha = 1`.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            alpha: 1.0,
            counts: vec![0.0; k],
            n: 0.0,
        }
    }

    /// Number of categories.
    #[must_use]
    pub fn k(&self) -> usize {
        self.counts.len()
    }

    /// Dirichlet concentration.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Set the concentration directly. Used when several models share one.
    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    /// Incorporated weight of each category.
    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    fn index(&self, x: i64) -> Option<usize> {
        usize::try_from(x).ok().filter(|&i| i < self.counts.len())
    }

    /// Log marginal likelihood under an arbitrary concentration.
    #[must_use]
    pub fn logp_score_with(&self, alpha: f64) -> f64 {
        let k = self.counts.len() as f64;
        let per_category: f64 = self
            .counts
            .iter()
            .map(|&c| ln_gamma(c + alpha) - ln_gamma(alpha))
            .sum();
        ln_gamma(k * alpha) - ln_gamma(k * alpha + self.n) + per_category
    }
}

impl Distribution<i64> for DirichletCategorical {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, x: &i64, weight: f64) {
        if let Some(i) = self.index(*x) {
            self.counts[i] += weight;
            self.n += weight;
        }
    }

    fn unincorporate_weighted(&mut self, x: &i64, weight: f64) {
        if let Some(i) = self.index(*x) {
            self.counts[i] = (self.counts[i] - weight).max(0.0);
            self.n -= weight;
            if self.n <= 0.0 {
                self.n = 0.0;
            }
        }
    }

    fn logp(&self, x: &i64) -> f64 {
        match self.index(*x) {
            Some(i) => {
                let k = self.counts.len() as f64;
                ((self.counts[i] + self.alpha) / (self.n + k * self.alpha)).ln()
            }
            None => f64::NEG_INFINITY,
        }
    }

    fn logp_score(&self) -> f64 {
        self.logp_score_with(self.alpha)
    }

    fn sample(&self, rng: &mut Prng) -> i64 {
        let weights: Vec<f64> = self.counts.iter().map(|c| c + self.alpha).collect();
        choice(&weights, rng) as i64
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        let scores: Vec<f64> = HYPERPARAMETER_GRID
            .iter()
            .map(|&a| self.logp_score_with(a))
            .collect();
        self.alpha = HYPERPARAMETER_GRID[log_choice(&scores, rng)];
    }

    fn nearest(&self, x: &i64) -> i64 {
        (*x).clamp(0, self.counts.len().saturating_sub(1) as i64)
    }
}
