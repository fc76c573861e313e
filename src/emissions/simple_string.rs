//! String corruption by character edits.

use super::Emission;
use crate::distributions::{DirichletCategorical, Distribution};
use crate::math::{levenshtein_ops, EditOp};
use crate::prng::Prng;

const KEEP: i64 = 0;
const SUBSTITUTE: i64 = 1;
const DELETE: i64 = 2;
const INSERT: i64 = 3;

/// Number of printable ASCII characters a replacement is drawn from.
const ALPHABET: u32 = 95;

fn op_index(op: EditOp) -> i64 {
    match op {
        EditOp::Keep => KEEP,
        EditOp::Substitute(_) => SUBSTITUTE,
        EditOp::Delete => DELETE,
        EditOp::Insert(_) => INSERT,
    }
}

fn new_chars(ops: &[EditOp]) -> f64 {
    ops.iter()
        .filter(|op| matches!(op, EditOp::Substitute(_) | EditOp::Insert(_)))
        .count() as f64
}

fn random_char(rng: &mut Prng) -> char {
    char::from_u32(' ' as u32 + rng.index(ALPHABET as usize) as u32).unwrap_or(' ')
}

/// Dirty string produced from the clean one by a run of edit operations.
///
/// The minimum edit alignment is scored as a sequence of keep / substitute /
/// delete / insert draws from a Dirichlet-Categorical, and every substituted
/// or inserted character is uniform over printable ASCII.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleString {
    ops: DirichletCategorical,
    n: f64,
    char_logp: f64,
}

impl Default for SimpleString {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleString {
    /// Uniform Dirichlet over the four edit operations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: DirichletCategorical::new(4),
            n: 0.0,
            char_logp: 0.0,
        }
    }

    fn log_char() -> f64 {
        -f64::from(ALPHABET).ln()
    }
}

impl Emission<String> for SimpleString {
    fn n(&self) -> f64 {
        self.n
    }

    fn incorporate_weighted(&mut self, clean: &String, dirty: &String, weight: f64) {
        let ops = levenshtein_ops(clean, dirty);
        for &op in &ops {
            self.ops.incorporate_weighted(&op_index(op), weight);
        }
        self.char_logp += weight * new_chars(&ops) * Self::log_char();
        self.n += weight;
    }

    fn unincorporate_weighted(&mut self, clean: &String, dirty: &String, weight: f64) {
        let ops = levenshtein_ops(clean, dirty);
        for &op in &ops {
            self.ops.unincorporate_weighted(&op_index(op), weight);
        }
        self.n -= weight;
        if self.n <= 0.0 {
            self.n = 0.0;
            self.char_logp = 0.0;
        } else {
            self.char_logp -= weight * new_chars(&ops) * Self::log_char();
        }
    }

    /// Sequential predictive over the alignment's operations.
    fn logp(&self, clean: &String, dirty: &String) -> f64 {
        let ops = levenshtein_ops(clean, dirty);
        let mut scratch = self.ops.clone();
        let mut total = new_chars(&ops) * Self::log_char();
        for &op in &ops {
            let idx = op_index(op);
            total += scratch.logp(&idx);
            scratch.incorporate(&idx);
        }
        total
    }

    fn logp_score(&self) -> f64 {
        self.ops.logp_score() + self.char_logp
    }

    fn sample_corrupted(&self, clean: &String, rng: &mut Prng) -> String {
        let mut out = String::with_capacity(clean.len());
        for c in clean.chars() {
            loop {
                match self.ops.sample(rng) {
                    INSERT => out.push(random_char(rng)),
                    SUBSTITUTE => {
                        out.push(random_char(rng));
                        break;
                    }
                    DELETE => break,
                    _ => {
                        out.push(c);
                        break;
                    }
                }
            }
        }
        out
    }

    /// The corrupted value with the least total edit distance to the rest.
    fn propose_clean(&self, corrupted: &[String], _rng: &mut Prng) -> Option<String> {
        corrupted
            .iter()
            .min_by_key(|x| corrupted.iter().map(|y| strsim::levenshtein(x, y)).sum::<usize>())
            .cloned()
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        self.ops.transition_hyperparameters(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: &str) -> String {
        x.to_string()
    }

    #[test]
    fn test_identical_strings_more_likely() {
        let e = SimpleString::new();
        assert!(e.logp(&s("hello"), &s("hello")) > e.logp(&s("hello"), &s("hxllo")));
        assert!(e.logp(&s("hello"), &s("hxllo")) > e.logp(&s("hello"), &s("xxxxx")));
    }

    #[test]
    fn test_logp_is_increment_of_score() {
        let mut e = SimpleString::new();
        e.incorporate(&s("kitten"), &s("sitten"));
        let before = e.logp_score();
        let lp = e.logp(&s("cat"), &s("cart"));
        e.incorporate(&s("cat"), &s("cart"));
        assert!((e.logp_score() - before - lp).abs() < 1e-9);
    }

    #[test]
    fn test_unincorporate_restores() {
        let mut e = SimpleString::new();
        e.incorporate(&s("abc"), &s("abd"));
        let score = e.logp_score();
        e.incorporate(&s("xyz"), &s("xz"));
        e.unincorporate(&s("xyz"), &s("xz"));
        assert!((e.logp_score() - score).abs() < 1e-9);
        e.unincorporate(&s("abc"), &s("abd"));
        assert_eq!(e.n(), 0.0);
        assert!(e.logp_score().abs() < 1e-12);
    }

    #[test]
    fn test_propose_clean_medoid() {
        let e = SimpleString::new();
        let mut rng = Prng::new(0);
        let corrupted = [s("jonh"), s("john"), s("johm")];
        assert_eq!(e.propose_clean(&corrupted, &mut rng), Some(s("john")));
    }

    #[test]
    fn test_sample_corrupted_mostly_keeps() {
        let mut e = SimpleString::new();
        for _ in 0..200 {
            e.incorporate(&s("abcdefgh"), &s("abcdefgh"));
        }
        let mut rng = Prng::new(5);
        let dirty = e.sample_corrupted(&s("abcdefgh"), &mut rng);
        assert!(strsim::levenshtein(&dirty, "abcdefgh") <= 2);
    }
}
