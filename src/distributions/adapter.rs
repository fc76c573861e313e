//! String-typed view of a typed distribution.

use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use super::Distribution;
use crate::prng::Prng;

/// Wraps a `Distribution<S>` and presents it as a `Distribution<String>`.
///
/// Strings are parsed into `S` at the boundary and samples are formatted with
/// `Display`. Strings that do not parse have probability zero and are ignored
/// by incorporate/unincorporate.
///
/// # Example
///
/// ```
/// use hirm::distributions::{Distribution, DistributionAdapter, Normal};
///
/// let mut d = DistributionAdapter::new(Normal::new());
/// d.incorporate(&"2.5".to_string());
/// assert_eq!(d.inner().n(), 1.0);
/// assert_eq!(d.logp(&"abc".to_string()), f64::NEG_INFINITY);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionAdapter<S, D> {
    inner: D,
    _value: PhantomData<S>,
}

impl<S, D> DistributionAdapter<S, D>
where
    S: FromStr + Display + Clone,
    D: Distribution<S>,
{
    /// Take ownership of `inner`.
    #[must_use]
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            _value: PhantomData,
        }
    }

    /// The wrapped distribution.
    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Mutable access to the wrapped distribution.
    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Parse a string into the wrapped value type.
    #[must_use]
    pub fn from_string(x: &str) -> Option<S> {
        x.trim().parse().ok()
    }

    /// Canonical string form of a wrapped value.
    #[must_use]
    pub fn format_value(x: &S) -> String {
        x.to_string()
    }
}

impl<S, D> Distribution<String> for DistributionAdapter<S, D>
where
    S: FromStr + Display + Clone,
    D: Distribution<S>,
{
    fn n(&self) -> f64 {
        self.inner.n()
    }

    fn incorporate_weighted(&mut self, x: &String, weight: f64) {
        if let Some(v) = Self::from_string(x) {
            self.inner.incorporate_weighted(&v, weight);
        }
    }

    fn unincorporate_weighted(&mut self, x: &String, weight: f64) {
        if let Some(v) = Self::from_string(x) {
            self.inner.unincorporate_weighted(&v, weight);
        }
    }

    fn logp(&self, x: &String) -> f64 {
        Self::from_string(x).map_or(f64::NEG_INFINITY, |v| self.inner.logp(&v))
    }

    fn logp_score(&self) -> f64 {
        self.inner.logp_score()
    }

    fn sample(&self, rng: &mut Prng) -> String {
        Self::format_value(&self.inner.sample(rng))
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.inner.transition_hyperparameters(rng);
    }

    fn is_conjugate(&self) -> bool {
        self.inner.is_conjugate()
    }

    fn init_theta(&mut self, rng: &mut Prng) {
        self.inner.init_theta(rng);
    }

    fn transition_theta(&mut self, rng: &mut Prng) {
        self.inner.transition_theta(rng);
    }

    fn nearest(&self, x: &String) -> String {
        match Self::from_string(x) {
            Some(v) => Self::format_value(&self.inner.nearest(&v)),
            None => x.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Normal, Skellam};

    #[test]
    fn test_matches_wrapped_normal() {
        let mut plain = Normal::new();
        let mut wrapped = DistributionAdapter::new(Normal::new());
        for x in [1.5, -0.25, 3.0] {
            plain.incorporate(&x);
            wrapped.incorporate(&x.to_string());
        }
        assert!((plain.logp_score() - wrapped.logp_score()).abs() < 1e-12);
        assert!((plain.logp(&0.7) - wrapped.logp(&"0.7".to_string())).abs() < 1e-12);
    }

    #[test]
    fn test_sample_round_trips() {
        let mut wrapped = DistributionAdapter::new(Skellam::new());
        let mut rng = Prng::new(12);
        wrapped.init_theta(&mut rng);
        for _ in 0..20 {
            let x = wrapped.sample(&mut rng);
            let parsed: i64 = x.parse().unwrap();
            assert_eq!(parsed.to_string(), x);
            assert!(wrapped.logp(&x).is_finite());
        }
    }

    #[test]
    fn test_float_formatting_round_trips() {
        let x = 0.1 + 0.2;
        let s = DistributionAdapter::<f64, Normal>::format_value(&x);
        assert_eq!(DistributionAdapter::<f64, Normal>::from_string(&s), Some(x));
    }

    #[test]
    fn test_unparseable_is_ignored() {
        let mut wrapped = DistributionAdapter::new(Normal::new());
        wrapped.incorporate(&"not a number".to_string());
        assert_eq!(wrapped.n(), 0.0);
    }
}
