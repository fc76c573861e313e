//! Shared machinery for models with an explicit latent parameter vector.
//!
//! A non-conjugate model keeps its raw observations so that the data
//! log-likelihood can be recomputed whenever theta moves. Between theta moves
//! the running sum is maintained incrementally.

use std::collections::BTreeMap;

use crate::prng::Prng;

/// Multiset of incorporated values with fractional weights.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observations<T: Ord> {
    weights: BTreeMap<T, f64>,
    total: f64,
}

impl<T: Ord + Clone> Observations<T> {
    /// Empty multiset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            weights: BTreeMap::new(),
            total: 0.0,
        }
    }

    /// Total incorporated weight.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Add `weight` copies of `x`.
    pub fn add(&mut self, x: &T, weight: f64) {
        *self.weights.entry(x.clone()).or_insert(0.0) += weight;
        self.total += weight;
    }

    /// Remove `weight` copies of `x`; entries at zero weight are dropped.
    pub fn remove(&mut self, x: &T, weight: f64) {
        if let Some(w) = self.weights.get_mut(x) {
            *w -= weight;
            if *w <= 1e-12 {
                self.weights.remove(x);
            }
        }
        self.total -= weight;
        if self.weights.is_empty() {
            self.total = 0.0;
        }
    }

    /// Distinct values with their weights.
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.weights.iter().map(|(x, &w)| (x, w))
    }

    /// Weighted sum of `logp` over the stored values.
    pub fn weighted_logp<F: Fn(&T) -> f64>(&self, logp: F) -> f64 {
        self.weights.iter().map(|(x, &w)| w * logp(x)).sum()
    }
}

/// Log-density of `N(mean, std^2)` at `x`.
#[must_use]
pub fn normal_logpdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    -0.5 * z * z - std.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
}

/// One random-walk Metropolis step with isotropic Gaussian proposals.
///
/// `target` is the unnormalized log posterior. Returns the accepted state,
/// which is `current` itself on rejection.
pub fn metropolis_step<F>(rng: &mut Prng, current: &[f64], step: f64, target: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let proposal: Vec<f64> = current.iter().map(|&x| rng.normal(x, step)).collect();
    let log_ratio = target(&proposal) - target(current);
    if log_ratio.is_nan() {
        return current.to_vec();
    }
    if log_ratio >= 0.0 || rng.uniform().ln() < log_ratio {
        proposal
    } else {
        current.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observations_add_remove() {
        let mut obs = Observations::new();
        obs.add(&3_i64, 1.0);
        obs.add(&3_i64, 0.5);
        obs.add(&-1_i64, 1.0);
        assert!((obs.total() - 2.5).abs() < 1e-12);
        obs.remove(&3, 1.5);
        assert_eq!(obs.iter().count(), 1);
        obs.remove(&-1, 1.0);
        assert_eq!(obs.total(), 0.0);
    }

    #[test]
    fn test_weighted_logp() {
        let mut obs = Observations::new();
        obs.add(&1_i64, 2.0);
        obs.add(&2_i64, 1.0);
        let total = obs.weighted_logp(|x| *x as f64);
        assert!((total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_metropolis_concentrates_on_mode() {
        let mut rng = Prng::new(21);
        let mut state = vec![5.0];
        let mut sum = 0.0;
        for i in 0..4000 {
            state = metropolis_step(&mut rng, &state, 0.8, |t| normal_logpdf(t[0], 0.0, 1.0));
            if i >= 1000 {
                sum += state[0];
            }
        }
        assert!((sum / 3000.0).abs() < 0.3);
    }

    #[test]
    fn test_normal_logpdf_at_mean() {
        let v = normal_logpdf(0.0, 0.0, 1.0);
        assert!((v + 0.5 * (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
    }
}
