//! Natural numbers written as digit strings.

use super::bigram::Bigram;
use super::Distribution;
use crate::prng::Prng;

/// Default cap on sampled digit count.
pub const DEFAULT_MAX_LENGTH: usize = 20;

/// Bigram over `'0'..='9'`.
///
/// Leading zeros are significant, which suits identifiers such as postal
/// codes, and the model stays stable across values spanning many orders of
/// magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct StringNat {
    bigram: Bigram,
}

impl Default for StringNat {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl StringNat {
    /// Digit strings of at most `max_length` characters when sampled.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            bigram: Bigram::with_range(max_length, '0', '9'),
        }
    }

    /// Cap on sampled string length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.bigram.max_length()
    }
}

impl Distribution<String> for StringNat {
    fn n(&self) -> f64 {
        self.bigram.n()
    }

    fn incorporate_weighted(&mut self, x: &String, weight: f64) {
        self.bigram.incorporate_weighted(x, weight);
    }

    fn unincorporate_weighted(&mut self, x: &String, weight: f64) {
        self.bigram.unincorporate_weighted(x, weight);
    }

    fn logp(&self, x: &String) -> f64 {
        self.bigram.logp(x)
    }

    fn logp_score(&self) -> f64 {
        self.bigram.logp_score()
    }

    fn sample(&self, rng: &mut Prng) -> String {
        self.bigram.sample(rng)
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.bigram.transition_hyperparameters(rng);
    }

    /// Keep only the digits.
    fn nearest(&self, x: &String) -> String {
        x.chars().filter(char::is_ascii_digit).collect()
    }
}
