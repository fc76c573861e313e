//! Observation models attached to each relation cluster.
//!
//! Every model accumulates incorporated values and answers predictive and
//! marginal log-probabilities. Two families are provided:
//!
//! - **Conjugate** models ([`BetaBernoulli`], [`DirichletCategorical`],
//!   [`Normal`], [`ZeroMeanNormal`], [`Bigram`], [`StringCat`], [`StringNat`])
//!   integrate their parameters out and keep closed-form sufficient statistics.
//! - **Non-conjugate** models ([`Skellam`]) carry an explicit latent parameter
//!   vector that is moved by [`Distribution::transition_theta`].
//!
//! Models are selected at runtime from a [`DistributionSpec`] and stored in
//! closed sum types, one per observation type.

pub mod adapter;
pub mod beta_bernoulli;
pub mod bigram;
pub mod dirichlet_categorical;
pub mod nonconjugate;
pub mod normal;
pub mod skellam;
pub mod spec;
pub mod string_cat;
pub mod string_nat;
pub mod zero_mean_normal;

pub use adapter::DistributionAdapter;
pub use beta_bernoulli::BetaBernoulli;
pub use bigram::Bigram;
pub use dirichlet_categorical::DirichletCategorical;
pub use normal::Normal;
pub use skellam::Skellam;
pub use spec::{DistributionKind, DistributionSpec};
pub use string_cat::StringCat;
pub use string_nat::StringNat;
pub use zero_mean_normal::ZeroMeanNormal;

use crate::math::ln_gamma;
use crate::prng::Prng;

/// A model over values of type `T` that can absorb and release observations.
///
/// `unincorporate` must exactly undo a matching `incorporate`, including for
/// fractional weights. `logp` and `sample` never mutate.
pub trait Distribution<T> {
    /// Total incorporated weight.
    fn n(&self) -> f64;

    /// Absorb `x` with the given weight.
    fn incorporate_weighted(&mut self, x: &T, weight: f64);

    /// Release `x` with the given weight.
    fn unincorporate_weighted(&mut self, x: &T, weight: f64);

    /// Absorb one copy of `x`.
    fn incorporate(&mut self, x: &T) {
        self.incorporate_weighted(x, 1.0);
    }

    /// Release one copy of `x`.
    fn unincorporate(&mut self, x: &T) {
        self.unincorporate_weighted(x, 1.0);
    }

    /// Predictive log-probability of `x` given the incorporated data.
    fn logp(&self, x: &T) -> f64;

    /// Log-likelihood of all incorporated data.
    fn logp_score(&self) -> f64;

    /// Draw from the predictive distribution.
    fn sample(&self, rng: &mut Prng) -> T;

    /// Resample fixed hyperparameters given the incorporated data.
    fn transition_hyperparameters(&mut self, rng: &mut Prng);

    /// `false` for models with an explicit latent parameter vector.
    fn is_conjugate(&self) -> bool {
        true
    }

    /// Draw the latent parameters from their prior. No-op when conjugate.
    fn init_theta(&mut self, _rng: &mut Prng) {}

    /// One MCMC move on the latent parameters. No-op when conjugate.
    fn transition_theta(&mut self, _rng: &mut Prng) {}

    /// Closest value inside the support.
    fn nearest(&self, x: &T) -> T
    where
        T: Clone,
    {
        x.clone()
    }
}

/// Log-density of a location-scale Student-t with `df` degrees of freedom and
/// squared scale `scale2`.
pub(crate) fn student_t_logpdf(x: f64, df: f64, loc: f64, scale2: f64) -> f64 {
    let z2 = (x - loc) * (x - loc) / (df * scale2);
    ln_gamma((df + 1.0) / 2.0)
        - ln_gamma(df / 2.0)
        - 0.5 * (df * std::f64::consts::PI * scale2).ln()
        - (df + 1.0) / 2.0 * z2.ln_1p()
}

/// Implement [`Distribution`] for a sum type by forwarding to each variant.
macro_rules! dispatch_distribution {
    ($name:ident, $value:ty, [$($variant:ident),+ $(,)?]) => {
        impl Distribution<$value> for $name {
            fn n(&self) -> f64 {
                match self {
                    $(Self::$variant(d) => d.n(),)+
                }
            }

            fn incorporate_weighted(&mut self, x: &$value, weight: f64) {
                match self {
                    $(Self::$variant(d) => d.incorporate_weighted(x, weight),)+
                }
            }

            fn unincorporate_weighted(&mut self, x: &$value, weight: f64) {
                match self {
                    $(Self::$variant(d) => d.unincorporate_weighted(x, weight),)+
                }
            }

            fn logp(&self, x: &$value) -> f64 {
                match self {
                    $(Self::$variant(d) => d.logp(x),)+
                }
            }

            fn logp_score(&self) -> f64 {
                match self {
                    $(Self::$variant(d) => d.logp_score(),)+
                }
            }

            fn sample(&self, rng: &mut Prng) -> $value {
                match self {
                    $(Self::$variant(d) => d.sample(rng),)+
                }
            }

            fn transition_hyperparameters(&mut self, rng: &mut Prng) {
                match self {
                    $(Self::$variant(d) => d.transition_hyperparameters(rng),)+
                }
            }

            fn is_conjugate(&self) -> bool {
                match self {
                    $(Self::$variant(d) => d.is_conjugate(),)+
                }
            }

            fn init_theta(&mut self, rng: &mut Prng) {
                match self {
                    $(Self::$variant(d) => d.init_theta(rng),)+
                }
            }

            fn transition_theta(&mut self, rng: &mut Prng) {
                match self {
                    $(Self::$variant(d) => d.transition_theta(rng),)+
                }
            }

            fn nearest(&self, x: &$value) -> $value {
                match self {
                    $(Self::$variant(d) => d.nearest(x),)+
                }
            }
        }
    };
}

/// Models over booleans.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolDistribution {
    /// `bernoulli`
    BetaBernoulli(BetaBernoulli),
}

/// Models over integers.
#[derive(Debug, Clone, PartialEq)]
pub enum IntDistribution {
    /// `categorical(k=..)`
    Categorical(DirichletCategorical),
    /// `skellam`
    Skellam(Skellam),
}

/// Models over reals.
#[derive(Debug, Clone, PartialEq)]
pub enum RealDistribution {
    /// `normal`
    Normal(Normal),
}

/// Models over strings.
#[derive(Debug, Clone, PartialEq)]
pub enum TextDistribution {
    /// `bigram(maxlength=..)`
    Bigram(Bigram),
    /// `stringcat(strings=..,delim=..)`
    StringCat(StringCat),
    /// `string_nat(maxlength=..)`
    StringNat(StringNat),
    /// `string_normal`
    StringNormal(DistributionAdapter<f64, Normal>),
    /// `string_skellam`
    StringSkellam(DistributionAdapter<i64, Skellam>),
}

dispatch_distribution!(BoolDistribution, bool, [BetaBernoulli]);
dispatch_distribution!(IntDistribution, i64, [Categorical, Skellam]);
dispatch_distribution!(RealDistribution, f64, [Normal]);
dispatch_distribution!(
    TextDistribution,
    String,
    [Bigram, StringCat, StringNat, StringNormal, StringSkellam]
);

/// A freshly constructed model of any observation type.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributionVariant {
    /// Boolean model.
    Bool(BoolDistribution),
    /// Integer model.
    Int(IntDistribution),
    /// Real model.
    Real(RealDistribution),
    /// String model.
    Text(TextDistribution),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_t_cauchy_special_case() {
        // df = 1 is the Cauchy distribution: 1 / (pi (1 + x^2))
        let v = student_t_logpdf(2.0, 1.0, 0.0, 1.0);
        let expected = (1.0 / (std::f64::consts::PI * 5.0)).ln();
        assert!((v - expected).abs() < 1e-12);
    }

    #[test]
    fn test_enum_dispatch_forwards() {
        let mut d = IntDistribution::Categorical(DirichletCategorical::new(3));
        d.incorporate(&1);
        assert_eq!(d.n(), 1.0);
        assert!(d.is_conjugate());
        assert!((d.logp(&1) - 0.5_f64.ln()).abs() < 1e-12);
        let s = IntDistribution::Skellam(Skellam::new());
        assert!(!s.is_conjugate());
    }

    #[test]
    fn test_text_enum_nearest() {
        let d = TextDistribution::StringNat(StringNat::default());
        assert_eq!(d.nearest(&"a1b2".to_string()), "12");
    }
}
