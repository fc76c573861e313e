//! Categorical distribution over a fixed list of strings.

use super::dirichlet_categorical::DirichletCategorical;
use super::Distribution;
use crate::prng::Prng;

/// Dirichlet-Categorical whose categories are named by strings.
#[derive(Debug, Clone, PartialEq)]
pub struct StringCat {
    strings: Vec<String>,
    categorical: DirichletCategorical,
}

impl StringCat {
    /// One category per listed string.
    #[must_use]
    pub fn new(strings: Vec<String>) -> Self {
        let categorical = DirichletCategorical::new(strings.len());
        Self {
            strings,
            categorical,
        }
    }

    /// The category names.
    #[must_use]
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    fn index(&self, x: &str) -> Option<i64> {
        self.strings.iter().position(|s| s == x).map(|i| i as i64)
    }
}

impl Distribution<String> for StringCat {
    fn n(&self) -> f64 {
        self.categorical.n()
    }

    fn incorporate_weighted(&mut self, x: &String, weight: f64) {
        if let Some(i) = self.index(x) {
            self.categorical.incorporate_weighted(&i, weight);
        }
    }

    fn unincorporate_weighted(&mut self, x: &String, weight: f64) {
        if let Some(i) = self.index(x) {
            self.categorical.unincorporate_weighted(&i, weight);
        }
    }

    fn logp(&self, x: &String) -> f64 {
        self.index(x)
            .map_or(f64::NEG_INFINITY, |i| self.categorical.logp(&i))
    }

    fn logp_score(&self) -> f64 {
        self.categorical.logp_score()
    }

    fn sample(&self, rng: &mut Prng) -> String {
        let i = self.categorical.sample(rng);
        usize::try_from(i)
            .ok()
            .and_then(|i| self.strings.get(i))
            .cloned()
            .unwrap_or_default()
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.categorical.transition_hyperparameters(rng);
    }

    /// Closest listed string by edit distance; ties go to the earlier entry.
    fn nearest(&self, x: &String) -> String {
        self.strings
            .iter()
            .min_by_key(|s| strsim::levenshtein(s, x))
            .cloned()
            .unwrap_or_else(|| x.clone())
    }
}
