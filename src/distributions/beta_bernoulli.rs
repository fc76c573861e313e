//! Beta-Bernoulli conjugate model for boolean observations.

use super::Distribution;
use crate::math::{lbeta, log_choice, HYPERPARAMETER_GRID};
use crate::prng::Prng;

/// Bernoulli likelihood with the success probability integrated out under a
/// Beta(alpha, beta) prior.
///
/// **Prior**: Beta(α, β)
/// **Sufficient statistics**: total weight `n`, success weight `s`
/// **Marginal**: B(s + α, n − s + β) / B(α, β)
///
/// # Example
///
/// ```
/// use hirm::distributions::{BetaBernoulli, Distribution};
///
/// let mut d = BetaBernoulli::new();
/// d.incorporate(&true);
/// d.incorporate(&true);
/// d.incorporate(&false);
/// // Sequential predictive: 1/2 * 2/3 * 1/4
/// assert!((d.logp_score() - (1.0_f64 / 12.0).ln()).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BetaBernoulli {
    alpha: f64,
    beta: f64,
    s: f64,
    n: f64,
}

impl Default for BetaBernoulli {
    fn default() -> Self {
        Self::new()
    }
}

impl BetaBernoulli {
    /// Uniform Beta(1, 1) prior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            s: 0.0,
            n: 0.0,
        }
    }

    /// Prior pseudo-count of successes.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Prior pseudo-count of failures.
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Incorporated weight of `true` observations.
    #[must_use]
    pub fn successes(&self) -> f64 {
        self.s
    }

    fn p_true(&self) -> f64 {
        (self.s + self.alpha) / (self.n + self.alpha + self.beta)
    }

    fn score_with(&self, alpha: f64, beta: f64) -> f64 {
        lbeta(self.s + alpha, self.n - self.s + beta) - lbeta(alpha, beta)
    }
}

impl Distribution<bool> for BetaBernoulli {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, x: &bool, weight: f64) {
        self.n += weight;
        if *x {
            self.s += weight;
        }
    }

    fn unincorporate_weighted(&mut self, x: &bool, weight: f64) {
        self.n -= weight;
        if *x {
            self.s -= weight;
        }
        if self.n <= 0.0 {
            self.n = 0.0;
            self.s = 0.0;
        }
    }

    fn logp(&self, x: &bool) -> f64 {
        let denom = self.n + self.alpha + self.beta;
        if *x {
            ((self.s + self.alpha) / denom).ln()
        } else {
            ((self.n - self.s + self.beta) / denom).ln()
        }
    }

    fn logp_score(&self) -> f64 {
        self.score_with(self.alpha, self.beta)
    }

    fn sample(&self, rng: &mut Prng) -> bool {
        rng.bernoulli(self.p_true())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_predictive_is_half() {
        let d = BetaBernoulli::new();
        assert!((d.logp(&true) - 0.5_f64.ln()).abs() < 1e-12);
        assert!((d.logp(&false) - 0.5_f64.ln()).abs() < 1e-12);
        assert_eq!(d.logp_score(), 0.0);
    }

    #[test]
    fn test_posterior_predictive() {
        let mut d = BetaBernoulli::new();
        for x in [true, true, true, false] {
            d.incorporate(&x);
        }
        assert_eq!(d.n(), 4.0);
        assert!((d.logp(&true) - (4.0_f64 / 6.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_unincorporate_restores_score() {
        let mut d = BetaBernoulli::new();
        d.incorporate(&true);
        d.incorporate(&false);
        let score = d.logp_score();
        d.incorporate_weighted(&true, 0.3);
        d.unincorporate_weighted(&true, 0.3);
        assert!((d.logp_score() - score).abs() < 1e-12);
        d.unincorporate(&true);
        d.unincorporate(&false);
        assert_eq!(d.n(), 0.0);
        assert_eq!(d.logp_score(), 0.0);
    }

    #[test]
    fn test_sample_does_not_mutate() {
        let mut d = BetaBernoulli::new();
        d.incorporate(&true);
        let mut rng = Prng::new(4);
        let trues = (0..1000).filter(|_| d.sample(&mut rng)).count();
        assert_eq!(d.n(), 1.0);
        // p(true) = 2/3
        assert!((trues as f64 / 1000.0 - 2.0 / 3.0).abs() < 0.06);
    }

    #[test]
    fn test_transition_hyperparameters_on_grid() {
        let mut d = BetaBernoulli::new();
        for _ in 0..20 {
            d.incorporate(&true);
        }
        let mut rng = Prng::new(8);
        d.transition_hyperparameters(&mut rng);
        assert!(HYPERPARAMETER_GRID.contains(&d.alpha()));
        assert!(HYPERPARAMETER_GRID.contains(&d.beta()));
    }
}
