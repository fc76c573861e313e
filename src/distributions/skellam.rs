//! Skellam distribution over integers: the difference of two Poissons.

use super::nonconjugate::{metropolis_step, normal_logpdf, Observations};
use super::Distribution;
use crate::math::{log_bessel_i, log_choice};
use crate::prng::Prng;

const LOG_MEAN_GRID: [f64; 7] = [-2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0];
const LOG_STD_GRID: [f64; 4] = [0.5, 1.0, 2.0, 4.0];
const PROPOSAL_STEP: f64 = 0.3;

/// Skellam(μ₁, μ₂) with log-normal priors on both rates.
///
/// Non-conjugate: the rates are explicit latent parameters. `logp_score` is
/// the data log-likelihood at the current rates, recomputed from the stored
/// observations after every rate change.
#[derive(Debug, Clone, PartialEq)]
pub struct Skellam {
    log_mean1: f64,
    log_std1: f64,
    log_mean2: f64,
    log_std2: f64,
    mu1: f64,
    mu2: f64,
    observations: Observations<i64>,
    cumulative_logp: f64,
}

impl Default for Skellam {
    fn default() -> Self {
        Self::new()
    }
}

impl Skellam {
    /// Unit rates under a log-normal(0, 2) prior. Call
    /// [`Distribution::init_theta`] to draw the rates from the prior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log_mean1: 0.0,
            log_std1: 2.0,
            log_mean2: 0.0,
            log_std2: 2.0,
            mu1: 1.0,
            mu2: 1.0,
            observations: Observations::new(),
            cumulative_logp: 0.0,
        }
    }

    /// Current rates `(mu1, mu2)`.
    #[must_use]
    pub fn theta(&self) -> (f64, f64) {
        (self.mu1, self.mu2)
    }

    /// Replace the rates and recompute the running log-likelihood.
    pub fn set_theta(&mut self, mu1: f64, mu2: f64) {
        self.mu1 = mu1;
        self.mu2 = mu2;
        self.recompute();
    }

    fn logp_at(mu1: f64, mu2: f64, x: i64) -> f64 {
        -(mu1 + mu2)
            + (x as f64 / 2.0) * (mu1 / mu2).ln()
            + log_bessel_i(x.unsigned_abs(), 2.0 * (mu1 * mu2).sqrt())
    }

    fn data_logp_at(&self, mu1: f64, mu2: f64) -> f64 {
        self.observations
            .weighted_logp(|x| Self::logp_at(mu1, mu2, *x))
    }

    fn recompute(&mut self) {
        self.cumulative_logp = self.data_logp_at(self.mu1, self.mu2);
    }
}

impl Distribution<i64> for Skellam {
    fn n(&self) -> f64 {
        self.observations.total()
    }

    fn incorporate_weighted(&mut self, x: &i64, weight: f64) {
        self.observations.add(x, weight);
        self.cumulative_logp += weight * self.logp(x);
    }

    fn unincorporate_weighted(&mut self, x: &i64, weight: f64) {
        self.observations.remove(x, weight);
        if self.observations.total() <= 0.0 {
            self.cumulative_logp = 0.0;
        } else {
            self.cumulative_logp -= weight * self.logp(x);
        }
    }

    fn logp(&self, x: &i64) -> f64 {
        Self::logp_at(self.mu1, self.mu2, *x)
    }

    fn logp_score(&self) -> f64 {
        self.cumulative_logp
    }

    fn sample(&self, rng: &mut Prng) -> i64 {
        rng.poisson(self.mu1) as i64 - rng.poisson(self.mu2) as i64
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        let mut grid = Vec::with_capacity(LOG_MEAN_GRID.len() * LOG_STD_GRID.len());
        for &m in &LOG_MEAN_GRID {
            for &s in &LOG_STD_GRID {
                grid.push((m, s));
            }
        }
        let (ln1, ln2) = (self.mu1.ln(), self.mu2.ln());
        let scores1: Vec<f64> = grid.iter().map(|&(m, s)| normal_logpdf(ln1, m, s)).collect();
        let scores2: Vec<f64> = grid.iter().map(|&(m, s)| normal_logpdf(ln2, m, s)).collect();
        (self.log_mean1, self.log_std1) = grid[log_choice(&scores1, rng)];
        (self.log_mean2, self.log_std2) = grid[log_choice(&scores2, rng)];
    }

    fn is_conjugate(&self) -> bool {
        false
    }

    fn init_theta(&mut self, rng: &mut Prng) {
        self.mu1 = rng.normal(self.log_mean1, self.log_std1).exp();
        self.mu2 = rng.normal(self.log_mean2, self.log_std2).exp();
        self.recompute();
    }

    fn transition_theta(&mut self, rng: &mut Prng) {
        let current = [self.mu1.ln(), self.mu2.ln()];
        let next = metropolis_step(rng, &current, PROPOSAL_STEP, |t| {
            normal_logpdf(t[0], self.log_mean1, self.log_std1)
                + normal_logpdf(t[1], self.log_mean2, self.log_std2)
                + self.data_logp_at(t[0].exp(), t[1].exp())
        });
        self.mu1 = next[0].exp();
        self.mu2 = next[1].exp();
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmf_sums_to_one() {
        let mut d = Skellam::new();
        d.set_theta(2.5, 1.5);
        let total: f64 = (-60..=60).map(|x| d.logp(&x).exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pmf_sums_to_one_at_large_rates() {
        let mut d = Skellam::new();
        d.set_theta(15_000.0, 15_000.0);
        // Standard deviation is sqrt(30000), about 173.
        let total: f64 = (-1000..=1000).map(|x| d.logp(&x).exp()).sum();
        assert!((total - 1.0).abs() < 1e-4, "mass {total}");
    }

    #[test]
    fn test_symmetric_rates_symmetric_pmf() {
        let mut d = Skellam::new();
        d.set_theta(3.0, 3.0);
        assert!((d.logp(&4) - d.logp(&-4)).abs() < 1e-10);
    }

    #[test]
    fn test_logp_score_tracks_observations() {
        let mut d = Skellam::new();
        d.set_theta(2.0, 1.0);
        for x in [1, 0, 3, -2] {
            d.incorporate(&x);
        }
        let expected: f64 = [1, 0, 3, -2].iter().map(|x| d.logp(x)).sum();
        assert!((d.logp_score() - expected).abs() < 1e-10);
        d.unincorporate(&3);
        let expected: f64 = [1, 0, -2].iter().map(|x| d.logp(x)).sum();
        assert!((d.logp_score() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_transition_theta_recomputes_score() {
        let mut d = Skellam::new();
        let mut rng = Prng::new(17);
        d.set_theta(1.0, 1.0);
        for x in [5, 7, 6, 4, 8, 5] {
            d.incorporate(&x);
        }
        for _ in 0..200 {
            d.transition_theta(&mut rng);
            let expected: f64 = [5, 7, 6, 4, 8, 5].iter().map(|x| d.logp(x)).sum();
            assert!((d.logp_score() - expected).abs() < 1e-8);
        }
        let (mu1, mu2) = d.theta();
        assert!(mu1 > mu2);
    }

    #[test]
    fn test_empty_score_is_zero() {
        let mut d = Skellam::new();
        d.incorporate(&2);
        d.unincorporate(&2);
        assert_eq!(d.logp_score(), 0.0);
        assert_eq!(d.n(), 0.0);
    }
}
