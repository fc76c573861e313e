//! Normal likelihood with a Normal-Inverse-Gamma prior.

use super::{student_t_logpdf, Distribution};
use crate::math::{ln_gamma, log_choice, HYPERPARAMETER_GRID};
use crate::prng::Prng;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Normal observations with unknown mean and variance integrated out.
///
/// **Prior**: σ² ~ InvGamma(α, β), μ | σ² ~ N(μ₀, σ²/λ)
/// **Sufficient statistics**: weight `n`, running `mean`, and `m2` (sum of
/// weighted squared deviations), maintained by a weighted Welford update
///
/// The posterior predictive is a Student-t with `2αₙ` degrees of freedom.
///
/// # Example
///
/// ```
/// use hirm::distributions::{Distribution, Normal};
///
/// let mut d = Normal::new();
/// d.incorporate(&1.0);
/// d.incorporate(&3.0);
/// assert!((d.mean() - 2.0).abs() < 1e-12);
/// assert!(d.logp(&2.0) > d.logp(&20.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Normal {
    mu: f64,
    lambda: f64,
    alpha: f64,
    beta: f64,
    n: f64,
    mean: f64,
    m2: f64,
}

impl Default for Normal {
    fn default() -> Self {
        Self::new()
    }
}

/// Posterior parameters (μₙ, λₙ, αₙ, βₙ).
struct Posterior {
    mu: f64,
    lambda: f64,
    alpha: f64,
    beta: f64,
}

impl Normal {
    /// Prior with μ₀ = 0, λ = 1, α = 1, β = 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mu: 0.0,
            lambda: 1.0,
            alpha: 1.0,
            beta: 1.0,
            n: 0.0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Weighted mean of the incorporated values.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Weighted sum of squared deviations from the mean.
    #[must_use]
    pub fn m2(&self) -> f64 {
        self.m2
    }

    /// Prior shape of the variance.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Prior scale of the variance.
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn posterior(&self, alpha: f64, beta: f64) -> Posterior {
        let lambda_n = self.lambda + self.n;
        let dev = self.mean - self.mu;
        Posterior {
            mu: (self.lambda * self.mu + self.n * self.mean) / lambda_n,
            lambda: lambda_n,
            alpha: alpha + self.n / 2.0,
            beta: beta + 0.5 * self.m2 + 0.5 * self.lambda * self.n * dev * dev / lambda_n,
        }
    }

    fn score_with(&self, alpha: f64, beta: f64) -> f64 {
        let post = self.posterior(alpha, beta);
        ln_gamma(post.alpha) - ln_gamma(alpha) + alpha * beta.ln()
            - post.alpha * post.beta.ln()
            + 0.5 * (self.lambda.ln() - post.lambda.ln())
            - self.n / 2.0 * LN_2PI
    }
}

impl Distribution<f64> for Normal {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, x: &f64, weight: f64) {
        let n = self.n + weight;
        let delta = x - self.mean;
        self.mean += weight * delta / n;
        self.m2 += weight * delta * (x - self.mean);
        self.n = n;
    }

    fn unincorporate_weighted(&mut self, x: &f64, weight: f64) {
        let n = self.n - weight;
        if n <= 1e-12 {
            self.n = 0.0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let old_mean = (self.n * self.mean - weight * x) / n;
        self.m2 = (self.m2 - weight * (x - old_mean) * (x - self.mean)).max(0.0);
        self.mean = old_mean;
        self.n = n;
    }

    fn logp(&self, x: &f64) -> f64 {
        let post = self.posterior(self.alpha, self.beta);
        let scale2 = post.beta * (post.lambda + 1.0) / (post.alpha * post.lambda);
        student_t_logpdf(*x, 2.0 * post.alpha, post.mu, scale2)
    }

    fn logp_score(&self) -> f64 {
        self.score_with(self.alpha, self.beta)
    }

    fn sample(&self, rng: &mut Prng) -> f64 {
        let post = self.posterior(self.alpha, self.beta);
        let variance = 1.0 / rng.gamma(post.alpha, 1.0 / post.beta);
        let mean = rng.normal(post.mu, (variance / post.lambda).sqrt());
        rng.normal(mean, variance.sqrt())
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
