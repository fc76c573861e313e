//! Character bigram model over strings.

use std::collections::BTreeMap;

use super::dirichlet_categorical::DirichletCategorical;
use super::Distribution;
use crate::math::{choice, log_choice, HYPERPARAMETER_GRID};
use crate::prng::Prng;

/// Default cap on sampled string length.
pub const DEFAULT_MAX_LENGTH: usize = 80;

/// Markov chain over characters in a contiguous range, with one
/// Dirichlet-Categorical transition model per preceding symbol.
///
/// Every string is framed by a shared start/stop symbol, so `"ab"` contributes
/// the transitions `^a`, `ab` and `b$`. All transition models share one
/// concentration `alpha`.
///
/// # Example
///
/// ```
/// use hirm::distributions::{Bigram, Distribution};
///
/// let mut d = Bigram::new();
/// d.incorporate(&"hello".to_string());
/// d.incorporate(&"world".to_string());
/// assert_eq!(d.n(), 2.0);
/// assert!((d.logp(&"test".to_string()) - -22.863_085_818_613_01).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Bigram {
    max_length: usize,
    min_char: char,
    max_char: char,
    n: f64,
    transitions: Vec<DirichletCategorical>,
}

impl Default for Bigram {
    fn default() -> Self {
        Self::new()
    }
}

impl Bigram {
    /// Printable ASCII (`' '..='~'`) with the default length cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_range(DEFAULT_MAX_LENGTH, ' ', '~')
    }

    /// Printable ASCII with a custom length cap; `0` means unbounded.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self::with_range(max_length, ' ', '~')
    }

    /// Characters `min_char..=max_char`.
    #[must_use]
    pub fn with_range(max_length: usize, min_char: char, max_char: char) -> Self {
        let symbols = (max_char as usize).saturating_sub(min_char as usize) + 2;
        Self {
            max_length,
            min_char,
            max_char,
            n: 0.0,
            transitions: vec![DirichletCategorical::new(symbols); symbols],
        }
    }

    /// Cap on sampled string length, `0` when unbounded.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Shared Dirichlet concentration.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.transitions.first().map_or(1.0, DirichletCategorical::alpha)
    }

    /// Set the concentration of every transition model.
    pub fn set_alpha(&mut self, alpha: f64) {
        for t in &mut self.transitions {
            t.set_alpha(alpha);
        }
    }

    fn stop(&self) -> usize {
        self.transitions.len() - 1
    }

    fn in_range(&self, c: char) -> bool {
        (self.min_char..=self.max_char).contains(&c)
    }

    /// Symbol sequence framed by the start/stop symbol, `None` if any
    /// character falls outside the range.
    fn indices(&self, x: &str) -> Option<Vec<usize>> {
        let stop = self.stop();
        let mut out = Vec::with_capacity(x.len() + 2);
        out.push(stop);
        for c in x.chars() {
            if !self.in_range(c) {
                return None;
            }
            out.push(c as usize - self.min_char as usize);
        }
        out.push(stop);
        Some(out)
    }

    fn score_with(&self, alpha: f64) -> f64 {
        self.transitions.iter().map(|t| t.logp_score_with(alpha)).sum()
    }
}

impl Distribution<String> for Bigram {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, x: &String, weight: f64) {
        let Some(indices) = self.indices(x) else {
            return;
        };
        self.n += weight;
        for pair in indices.windows(2) {
            self.transitions[pair[0]].incorporate_weighted(&(pair[1] as i64), weight);
        }
    }

    fn unincorporate_weighted(&mut self, x: &String, weight: f64) {
        let Some(indices) = self.indices(x) else {
            return;
        };
        self.n = (self.n - weight).max(0.0);
        for pair in indices.windows(2) {
            self.transitions[pair[0]].unincorporate_weighted(&(pair[1] as i64), weight);
        }
    }

    /// Sequential predictive: transitions earlier in `x` count towards the
    /// ones that follow.
    fn logp(&self, x: &String) -> f64 {
        let Some(indices) = self.indices(x) else {
            return f64::NEG_INFINITY;
        };
        let k = self.transitions.len() as f64;
        let mut seen_pairs: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut seen_rows: BTreeMap<usize, f64> = BTreeMap::new();
        let mut total = 0.0;
        for pair in indices.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let model = &self.transitions[from];
            let extra_pair = seen_pairs.get(&(from, to)).copied().unwrap_or(0.0);
            let extra_row = seen_rows.get(&from).copied().unwrap_or(0.0);
            let numer = model.counts()[to] + extra_pair + model.alpha();
            let denom = model.n() + extra_row + k * model.alpha();
            total += (numer / denom).ln();
            *seen_pairs.entry((from, to)).or_insert(0.0) += 1.0;
            *seen_rows.entry(from).or_insert(0.0) += 1.0;
        }
        total
    }

    fn logp_score(&self) -> f64 {
        self.transitions.iter().map(|t| t.logp_score()).sum()
    }

    fn sample(&self, rng: &mut Prng) -> String {
        let stop = self.stop();
        let mut out = String::new();
        let mut current = stop;
        let mut length = 0;
        loop {
            let model = &self.transitions[current];
            let weights: Vec<f64> = model.counts().iter().map(|c| c + model.alpha()).collect();
            let next = choice(&weights, rng);
            if next == stop {
                break;
            }
            if let Some(c) = char::from_u32(self.min_char as u32 + next as u32) {
                out.push(c);
            }
            length += 1;
            if self.max_length > 0 && length >= self.max_length {
                break;
            }
            current = next;
        }
        out
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        let scores: Vec<f64> = HYPERPARAMETER_GRID
            .iter()
            .map(|&a| self.score_with(a))
            .collect();
        let alpha = HYPERPARAMETER_GRID[log_choice(&scores, rng)];
        self.set_alpha(alpha);
        tracing::trace!(alpha, "resampled bigram alpha");
    }

    fn nearest(&self, x: &String) -> String {
        let kept = x.chars().filter(|&c| self.in_range(c));
        if self.max_length > 0 {
            kept.take(self.max_length).collect()
        } else {
            kept.collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: &str) -> String {
        x.to_string()
    }

    #[test]
    fn test_reference_values_single_string() {
        let mut d = Bigram::new();
        d.incorporate(&s("train"));
        assert!((d.logp(&s("test")) - -22.169_938_638_053_06).abs() < 1e-6);
        assert!((d.logp_score() - -27.386_089_148_807_4).abs() < 1e-6);
    }

    #[test]
    fn test_reference_values_two_strings() {
        let mut d = Bigram::new();
        d.incorporate(&s("hello"));
        d.incorporate(&s("world"));
        assert_eq!(d.n(), 2.0);
        assert!((d.logp(&s("test")) - -22.863_085_818_613_01).abs() < 1e-6);
        assert!((d.logp_score() - -54.823_885_945_923_96).abs() < 1e-6);
    }

    #[test]
    fn test_logp_is_increment_of_score() {
        let mut d = Bigram::new();
        d.incorporate(&s("abcab"));
        let before = d.logp_score();
        let lp = d.logp(&s("abba"));
        d.incorporate(&s("abba"));
        assert!((d.logp_score() - before - lp).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_character() {
        let d = Bigram::new();
        assert_eq!(d.logp(&s("caf\u{e9}")), f64::NEG_INFINITY);
        assert_eq!(d.nearest(&s("caf\u{e9}")), "caf");
    }

    #[test]
    fn test_sample_respects_max_length_and_does_not_mutate() {
        let mut d = Bigram::with_max_length(3);
        d.incorporate(&s("aaaaaaaa"));
        let mut rng = Prng::new(3);
        for _ in 0..50 {
            let x = d.sample(&mut rng);
            assert!(x.chars().count() <= 3);
            assert!(d.logp(&x).is_finite());
        }
        assert_eq!(d.n(), 1.0);
    }

    #[test]
    fn test_unincorporate_restores_score() {
        let mut d = Bigram::new();
        d.incorporate(&s("hello"));
        let score = d.logp_score();
        d.incorporate(&s("world"));
        d.unincorporate(&s("world"));
        assert!((d.logp_score() - score).abs() < 1e-9);
    }

    #[test]
    fn test_set_alpha_shared() {
        let mut d = Bigram::new();
        d.set_alpha(0.5);
        assert_eq!(d.alpha(), 0.5);
        let mut rng = Prng::new(1);
        d.incorporate(&s("xyz"));
        d.transition_hyperparameters(&mut rng);
        assert!(HYPERPARAMETER_GRID.contains(&d.alpha()));
    }
}
