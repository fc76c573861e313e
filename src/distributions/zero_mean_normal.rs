//! Zero-mean Normal with an Inverse-Gamma prior on the variance.

use super::{student_t_logpdf, Distribution};
use crate::math::{ln_gamma, log_choice, HYPERPARAMETER_GRID};
use crate::prng::Prng;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Normal observations with known mean zero and unknown variance.
///
/// **Prior**: σ² ~ InvGamma(α, β), default α = β = 1
/// **Sufficient statistics**: weight `n` and `var`, the weighted mean of squares
///
/// Mostly used to model additive noise, where the mean is zero by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroMeanNormal {
    alpha: f64,
    beta: f64,
    n: f64,
    var: f64,
}

impl Default for ZeroMeanNormal {
    fn default() -> Self {
        Self::new()
    }
}

impl ZeroMeanNormal {
    /// InvGamma(1, 1) prior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            n: 0.0,
            var: 0.0,
        }
    }

    /// Weighted mean of squared observations.
    #[must_use]
    pub fn var(&self) -> f64 {
        self.var
    }

    fn posterior(&self, alpha: f64, beta: f64) -> (f64, f64) {
        (alpha + self.n / 2.0, beta + 0.5 * self.n * self.var)
    }

    fn score_with(&self, alpha: f64, beta: f64) -> f64 {
        let (alpha_n, beta_n) = self.posterior(alpha, beta);
        ln_gamma(alpha_n) - ln_gamma(alpha) + alpha * beta.ln() - alpha_n * beta_n.ln()
            - self.n / 2.0 * LN_2PI
    }
}

impl Distribution<f64> for ZeroMeanNormal {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, x: &f64, weight: f64) {
        let n = self.n + weight;
        self.var = (self.n * self.var + weight * x * x) / n;
        self.n = n;
    }

    fn unincorporate_weighted(&mut self, x: &f64, weight: f64) {
        let n = self.n - weight;
        if n <= 1e-12 {
            self.n = 0.0;
            self.var = 0.0;
            return;
        }
        self.var = ((self.n * self.var - weight * x * x) / n).max(0.0);
        self.n = n;
    }

    fn logp(&self, x: &f64) -> f64 {
        let (alpha_n, beta_n) = self.posterior(self.alpha, self.beta);
        student_t_logpdf(*x, 2.0 * alpha_n, 0.0, beta_n / alpha_n)
    }

    fn logp_score(&self) -> f64 {
        self.score_with(self.alpha, self.beta)
    }

    fn sample(&self, rng: &mut Prng) -> f64 {
        let (alpha_n, beta_n) = self.posterior(self.alpha, self.beta);
        let variance = 1.0 / rng.gamma(alpha_n, 1.0 / beta_n);
        rng.normal(0.0, variance.sqrt())
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        let mut grid = Vec::with_capacity(HYPERPARAMETER_GRID.len().pow(2));
        let mut scores = Vec::with_capacity(grid.capacity());
        for &a in &HYPERPARAMETER_GRID {
            for &b in &HYPERPARAMETER_GRID {
                grid.push((a, b));
                scores.push(self.score_with(a, b));
            }
        }
        let (alpha, beta) = grid[log_choice(&scores, rng)];
        self.alpha = alpha;
        self.beta = beta;
    }
}
