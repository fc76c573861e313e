//! Chinese Restaurant Process prior over partitions of items.
//!
//! A CRP assigns each incorporated item to exactly one table. The next item
//! joins an existing table with probability proportional to its occupancy, or
//! opens a new table with probability proportional to the concentration
//! `alpha`.
//!
//! # Mathematical Foundation
//!
//! For a partition of `N` items into tables of sizes `n_1 .. n_K`, the Ewens
//! sampling formula gives
//!
//! ```text
//! log p = sum_k [log(alpha) + lgamma(n_k)] + lgamma(alpha) - lgamma(alpha + N)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{HirmError, Result};
use crate::math::{ln_gamma, log_choice, log_linspace};
use crate::prng::Prng;

/// Opaque entity identifier within one domain.
pub type Item = usize;

/// Cluster identifier within one CRP.
pub type Table = usize;

/// Number of grid points used when resampling `alpha`.
const ALPHA_GRID_SIZE: usize = 20;

/// Chinese Restaurant Process with ordered tables.
///
/// # Example
///
/// ```
/// use hirm::crp::Crp;
///
/// let mut crp = Crp::new();
/// crp.incorporate(1, 0).unwrap();
/// crp.incorporate(2, 0).unwrap();
/// crp.incorporate(3, 1).unwrap();
///
/// let weights = crp.tables_weights();
/// assert_eq!(weights[&0], 2.0);
/// assert_eq!(weights[&1], 1.0);
/// assert_eq!(weights[&2], 1.0); // new table, weight alpha
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Crp {
    alpha: f64,
    n: usize,
    tables: BTreeMap<Table, BTreeSet<Item>>,
    assignments: BTreeMap<Item, Table>,
}

impl Default for Crp {
    fn default() -> Self {
        Self::new()
    }
}

impl Crp {
    /// Empty CRP with `alpha = 1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            n: 0,
            tables: BTreeMap::new(),
            assignments: BTreeMap::new(),
        }
    }

    /// Empty CRP with the given concentration.
    ///
    /// # Errors
    ///
    /// Returns an error if `alpha` is not a positive finite number.
    pub fn with_alpha(alpha: f64) -> Result<Self> {
        let mut crp = Self::new();
        crp.set_alpha(alpha)?;
        Ok(crp)
    }

    /// Concentration parameter.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Replace the concentration parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if `alpha` is not a positive finite number.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(HirmError::InvalidHyperparameter {
                param: "alpha".to_string(),
                value: alpha.to_string(),
                constraint: "> 0".to_string(),
            });
        }
        self.alpha = alpha;
        Ok(())
    }

    /// Number of incorporated items.
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Table id to member set, ordered by table id.
    #[must_use]
    pub fn tables(&self) -> &BTreeMap<Table, BTreeSet<Item>> {
        &self.tables
    }

    /// Item to table id.
    #[must_use]
    pub fn assignments(&self) -> &BTreeMap<Item, Table> {
        &self.assignments
    }

    /// Table currently holding `item`.
    #[must_use]
    pub fn table_of(&self, item: Item) -> Option<Table> {
        self.assignments.get(&item).copied()
    }

    /// Whether `item` is incorporated.
    #[must_use]
    pub fn contains(&self, item: Item) -> bool {
        self.assignments.contains_key(&item)
    }

    /// Number of items at `table` (zero for an absent table).
    #[must_use]
    pub fn table_size(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, BTreeSet::len)
    }

    /// Highest table id present, `None` when empty.
    #[must_use]
    pub fn max_table(&self) -> Option<Table> {
        self.tables.keys().next_back().copied()
    }

    /// Id a newly opened table receives: `max_table() + 1`, or 0 when empty.
    #[must_use]
    pub fn new_table(&self) -> Table {
        self.max_table().map_or(0, |t| t + 1)
    }

    /// Seat `item` at `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if `item` is already seated.
    pub fn incorporate(&mut self, item: Item, table: Table) -> Result<()> {
        if let Some(&current) = self.assignments.get(&item) {
            return Err(HirmError::DuplicateItem {
                item,
                table: current,
            });
        }
        self.tables.entry(table).or_default().insert(item);
        self.assignments.insert(item, table);
        self.n += 1;
        Ok(())
    }

    /// Remove `item`, deleting its table if it becomes empty.
    ///
    /// Returns the table the item was removed from.
    ///
    /// # Errors
    ///
    /// Returns an error if `item` is not seated.
    pub fn unincorporate(&mut self, item: Item) -> Result<Table> {
        let table = self
            .assignments
            .remove(&item)
            .ok_or(HirmError::MissingItem(item))?;
        if let Some(members) = self.tables.get_mut(&table) {
            members.remove(&item);
            if members.is_empty() {
                self.tables.remove(&table);
            }
        }
        self.n -= 1;
        Ok(table)
    }

    /// Draw a table for the next item from the predictive distribution.
    pub fn sample(&self, rng: &mut Prng) -> Table {
        let weights = self.tables_weights();
        let tables: Vec<Table> = weights.keys().copied().collect();
        let w: Vec<f64> = weights.values().copied().collect();
        tables[crate::math::choice(&w, rng)]
    }

    /// `log(alpha) - log(alpha + N)`.
    #[must_use]
    pub fn logp_new_table(&self) -> f64 {
        self.alpha.ln() - (self.n as f64 + self.alpha).ln()
    }

    /// Log-probability that the next item joins `table`.
    ///
    /// Any id not currently present is treated as a fresh table.
    #[must_use]
    pub fn logp(&self, table: Table) -> f64 {
        match self.tables.get(&table) {
            Some(members) => (members.len() as f64).ln() - (self.n as f64 + self.alpha).ln(),
            None => self.logp_new_table(),
        }
    }

    /// Log-probability of the whole partition (Ewens sampling formula).
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        let table_terms: f64 = self
            .tables
            .values()
            .map(|members| self.alpha.ln() + ln_gamma(members.len() as f64))
            .sum();
        table_terms + ln_gamma(self.alpha) - ln_gamma(self.alpha + self.n as f64)
    }

    /// Unnormalized predictive weight of each table plus a new-table entry.
    ///
    /// Existing tables weigh their occupancy; the entry keyed by
    /// [`Crp::new_table`] weighs `alpha`. The weights sum to `N + alpha`.
    #[must_use]
    pub fn tables_weights(&self) -> BTreeMap<Table, f64> {
        let mut weights: BTreeMap<Table, f64> = self
            .tables
            .iter()
            .map(|(&t, members)| (t, members.len() as f64))
            .collect();
        weights.insert(self.new_table(), self.alpha);
        weights
    }

    /// Predictive weights with one occupant of `table` removed.
    ///
    /// If that occupant is alone, `table` itself stands in for the new table
    /// (weight `alpha`) and no extra new-table entry is added.
    ///
    /// # Errors
    ///
    /// Returns an error if `table` does not exist.
    pub fn tables_weights_gibbs(&self, table: Table) -> Result<BTreeMap<Table, f64>> {
        let size = self.table_size(table);
        if size == 0 {
            return Err(HirmError::MissingTable(table));
        }
        let mut weights = self.tables_weights();
        if size == 1 {
            weights.remove(&self.new_table());
            weights.insert(table, self.alpha);
        } else {
            weights.insert(table, (size - 1) as f64);
        }
        Ok(weights)
    }

    /// Resample `alpha` on a log-spaced grid scored by [`Crp::logp_score`].
    pub fn transition_alpha(&mut self, rng: &mut Prng) {
        if self.n == 0 {
            return;
        }
        let n = self.n as f64;
        let grid = log_linspace(1.0 / n, n + 1.0, ALPHA_GRID_SIZE, true);
        let original = self.alpha;
        let scores: Vec<f64> = grid
            .iter()
            .map(|&alpha| {
                self.alpha = alpha;
                self.logp_score()
            })
            .collect();
        self.alpha = grid.get(log_choice(&scores, rng)).copied().unwrap_or(original);
        tracing::trace!(alpha = self.alpha, n = self.n, "resampled CRP alpha");
    }

    /// Drop every item and table, keeping `alpha`.
    pub fn clear(&mut self) {
        self.n = 0;
        self.tables.clear();
        self.assignments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_items() -> Crp {
        let mut crp = Crp::new();
        crp.incorporate(1, 0).unwrap();
        crp.incorporate(2, 0).unwrap();
        crp.incorporate(3, 1).unwrap();
        crp
    }

    #[test]
    fn test_scenario_tables_weights() {
        let crp = three_items();
        assert_eq!(crp.n(), 3);
        let weights = crp.tables_weights();
        let expected: BTreeMap<Table, f64> = [(0, 2.0), (1, 1.0), (2, 1.0)].into_iter().collect();
        assert_eq!(weights, expected);
    }

    #[test]
    fn test_empty_weights() {
        let crp = Crp::new();
        let weights = crp.tables_weights();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[&0], 1.0);
        assert_eq!(crp.max_table(), None);
        assert_eq!(crp.logp_score(), 0.0);
    }

    #[test]
    fn test_logp_score_ewens() {
        let crp = three_items();
        assert!((crp.logp_score() - (1.0_f64 / 6.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_logp_matches_normalized_weights() {
        let crp = three_items();
        let weights = crp.tables_weights();
        let total: f64 = weights.values().sum();
        assert!((total - (crp.n() as f64 + crp.alpha())).abs() < 1e-12);
        for (&t, &w) in &weights {
            assert!((crp.logp(t) - (w / total).ln()).abs() < 1e-12);
        }
        assert!((crp.logp(99) - crp.logp_new_table()).abs() < 1e-12);
    }

    #[test]
    fn test_tables_weights_gibbs_shared_table() {
        let crp = three_items();
        let weights = crp.tables_weights_gibbs(0).unwrap();
        assert_eq!(weights[&0], 1.0);
        assert_eq!(weights[&1], 1.0);
        assert_eq!(weights[&2], 1.0);
    }

    #[test]
    fn test_tables_weights_gibbs_singleton() {
        let crp = three_items();
        let weights = crp.tables_weights_gibbs(1).unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[&0], 2.0);
        assert_eq!(weights[&1], 1.0);
        assert!(!weights.contains_key(&2));
    }

    #[test]
    fn test_tables_weights_gibbs_missing_table() {
        let crp = three_items();
        assert!(matches!(
            crp.tables_weights_gibbs(5),
            Err(HirmError::MissingTable(5))
        ));
    }

    #[test]
    fn test_incorporate_twice_fails() {
        let mut crp = three_items();
        assert!(matches!(
            crp.incorporate(1, 3),
            Err(HirmError::DuplicateItem { item: 1, table: 0 })
        ));
        assert_eq!(crp.n(), 3);
    }

    #[test]
    fn test_unincorporate_removes_empty_table() {
        let mut crp = three_items();
        assert_eq!(crp.unincorporate(3).unwrap(), 1);
        assert!(!crp.tables().contains_key(&1));
        assert_eq!(crp.n(), 2);
        assert!(matches!(crp.unincorporate(3), Err(HirmError::MissingItem(3))));
    }

    #[test]
    fn test_incorporate_unincorporate_restores() {
        let mut crp = three_items();
        let before = crp.clone();
        let score = crp.logp_score();
        crp.incorporate(10, 4).unwrap();
        crp.unincorporate(10).unwrap();
        assert_eq!(crp, before);
        assert!((crp.logp_score() - score).abs() < 1e-9);
    }

    #[test]
    fn test_sample_does_not_mutate() {
        let crp = three_items();
        let mut rng = Prng::new(1);
        for _ in 0..100 {
            let t = crp.sample(&mut rng);
            assert!(t <= 2);
        }
        assert_eq!(crp.n(), 3);
    }

    #[test]
    fn test_transition_alpha_noop_when_empty() {
        let mut crp = Crp::new();
        let mut rng = Prng::new(1);
        crp.transition_alpha(&mut rng);
        assert_eq!(crp.alpha(), 1.0);
    }

    #[test]
    fn test_transition_alpha_stays_on_grid() {
        let mut crp = three_items();
        let mut rng = Prng::new(2);
        crp.transition_alpha(&mut rng);
        let grid = log_linspace(1.0 / 3.0, 4.0, ALPHA_GRID_SIZE, true);
        assert!(grid.iter().any(|g| (g - crp.alpha()).abs() < 1e-12));
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        assert!(Crp::with_alpha(0.0).is_err());
        assert!(Crp::with_alpha(f64::NAN).is_err());
        assert!(Crp::with_alpha(2.5).is_ok());
    }
}
