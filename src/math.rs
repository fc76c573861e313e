//! Numeric helpers shared by the priors and samplers.
//!
//! Log-space arithmetic, grid construction, categorical draws, and the few
//! special functions the distribution family needs.

use crate::prng::Prng;

/// Hyperparameter grid shared by the conjugate kinds: decades `1e-4 ..= 1e4`.
pub const HYPERPARAMETER_GRID: [f64; 9] = [1e-4, 1e-3, 1e-2, 1e-1, 1.0, 10.0, 100.0, 1000.0, 1e4];

/// Natural log of the gamma function.
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    statrs::function::gamma::ln_gamma(x)
}

/// Natural log of the beta function B(a, b).
#[must_use]
pub fn lbeta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Numerically stable `log(sum(exp(x)))`. Empty input gives `-inf`.
#[must_use]
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Shift log-weights so that they exponentiate to a probability vector.
#[must_use]
pub fn log_normalize(values: &[f64]) -> Vec<f64> {
    let total = logsumexp(values);
    values.iter().map(|v| v - total).collect()
}

/// `num` evenly spaced points from `start` to `stop`.
#[must_use]
pub fn linspace(start: f64, stop: f64, num: usize, endpoint: bool) -> Vec<f64> {
    if num == 0 {
        return Vec::new();
    }
    let divisor = if endpoint { num.saturating_sub(1).max(1) } else { num };
    let step = (stop - start) / divisor as f64;
    (0..num).map(|i| start + step * i as f64).collect()
}

/// `num` points from `start` to `stop`, evenly spaced in log space.
#[must_use]
pub fn log_linspace(start: f64, stop: f64, num: usize, endpoint: bool) -> Vec<f64> {
    linspace(start.ln(), stop.ln(), num, endpoint)
        .into_iter()
        .map(f64::exp)
        .collect()
}

/// Draw an index proportionally to non-negative `weights`.
///
/// Degenerate weights (empty mass, NaN) fall back to a uniform draw.
pub fn choice(weights: &[f64], rng: &mut Prng) -> usize {
    if weights.is_empty() {
        return 0;
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        tracing::warn!(n = weights.len(), "categorical with no mass, drawing uniformly");
        return rng.index(weights.len());
    }
    let target = rng.uniform() * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if target < cumulative {
            return i;
        }
    }
    // Rounding can leave target a hair above the final cumulative sum.
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(weights.len() - 1)
}

/// Draw an index from unnormalized log-weights.
///
/// The maximum is subtracted before exponentiating.
pub fn log_choice(log_weights: &[f64], rng: &mut Prng) -> usize {
    let max = log_weights
        .iter()
        .copied()
        .filter(|w| !w.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        tracing::warn!(n = log_weights.len(), "all log-weights are -inf, drawing uniformly");
        return rng.index(log_weights.len().max(1));
    }
    let weights: Vec<f64> = log_weights
        .iter()
        .map(|w| if w.is_nan() { 0.0 } else { (w - max).exp() })
        .collect();
    choice(&weights, rng)
}

/// Log of the modified Bessel function of the first kind, `ln I_nu(x)`.
///
/// Sums the power series in log space outward from its largest term until
/// both tails fall below `e^-40` of it, which stays finite and accurate for
/// the large arguments where `I_nu` itself overflows.
#[must_use]
pub fn log_bessel_i(nu: u64, x: f64) -> f64 {
    if x <= 0.0 {
        return if nu == 0 { 0.0 } else { f64::NEG_INFINITY };
    }
    let nu = nu as f64;
    let log_half_x = (x / 2.0).ln();
    let term = |k: f64| (2.0 * k + nu) * log_half_x - ln_gamma(k + 1.0) - ln_gamma(k + nu + 1.0);
    // Terms grow while (x/2)^2 > (k+1)(k+nu+1).
    let peak = ((nu * nu + x * x).sqrt() - nu) / 2.0;
    let start = peak.floor().max(0.0);
    let best = term(start);

    let mut terms = vec![best];
    let mut k = start;
    while k > 0.0 {
        k -= 1.0;
        let t = term(k);
        terms.push(t);
        if t < best - 40.0 {
            break;
        }
    }
    let mut k = start;
    loop {
        k += 1.0;
        let t = term(k);
        terms.push(t);
        if t < best - 40.0 {
            break;
        }
    }
    logsumexp(&terms)
}

/// One step of a minimum edit alignment from a clean to a dirty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Clean character copied unchanged.
    Keep,
    /// Clean character replaced by another.
    Substitute(char),
    /// Clean character dropped.
    Delete,
    /// Extra character inserted.
    Insert(char),
}

/// Minimum edit alignment turning `clean` into `dirty`.
///
/// Ties prefer keep/substitute, then delete, then insert, so the alignment
/// is a deterministic function of the two strings.
#[must_use]
pub fn levenshtein_ops(clean: &str, dirty: &str) -> Vec<EditOp> {
    let a: Vec<char> = clean.chars().collect();
    let b: Vec<char> = dirty.chars().collect();
    let (n, m) = (a.len(), b.len());
    let mut dist = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dist.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dist[0][j] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            let sub = dist[i - 1][j - 1] + usize::from(a[i - 1] != b[j - 1]);
            dist[i][j] = sub.min(dist[i - 1][j] + 1).min(dist[i][j - 1] + 1);
        }
    }

    let mut ops = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && dist[i][j] == dist[i - 1][j - 1] + usize::from(a[i - 1] != b[j - 1]) {
            ops.push(if a[i - 1] == b[j - 1] {
                EditOp::Keep
            } else {
                EditOp::Substitute(b[j - 1])
            });
            i -= 1;
            j -= 1;
        } else if i > 0 && dist[i][j] == dist[i - 1][j] + 1 {
            ops.push(EditOp::Delete);
            i -= 1;
        } else {
            ops.push(EditOp::Insert(b[j - 1]));
            j -= 1;
        }
    }
    ops.reverse();
    ops
}
