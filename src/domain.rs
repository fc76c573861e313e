//! Entity types: one CRP per domain.

use crate::crp::{Crp, Item, Table};
use crate::error::{HirmError, Result};
use crate::prng::Prng;

/// A named entity type whose items are partitioned by a CRP.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    name: String,
    crp: Crp,
}

impl Domain {
    /// Empty domain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crp: Crp::new(),
        }
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The clustering of the domain's items.
    #[must_use]
    pub fn crp(&self) -> &Crp {
        &self.crp
    }

    /// Whether `item` is incorporated.
    #[must_use]
    pub fn contains(&self, item: Item) -> bool {
        self.crp.contains(item)
    }

    /// Incorporated items in ascending order.
    pub fn items(&self) -> impl Iterator<Item = Item> + '_ {
        self.crp.assignments().keys().copied()
    }

    /// Number of incorporated items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.crp.n()
    }

    /// Whether the domain holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.crp.n() == 0
    }

    /// Table of `item`.
    ///
    /// # Errors
    ///
    /// Returns an error if `item` is not incorporated.
    pub fn table_of(&self, item: Item) -> Result<Table> {
        self.crp.table_of(item).ok_or(HirmError::MissingItem(item))
    }

    /// Seat `item`, returning its table.
    ///
    /// A known item keeps its table. A new item goes to `table` if given,
    /// otherwise to a table drawn from the CRP predictive.
    ///
    /// # Errors
    ///
    /// Returns an error if a known item is asked to sit at a different table.
    pub fn incorporate(&mut self, rng: &mut Prng, item: Item, table: Option<Table>) -> Result<Table> {
        if let Some(current) = self.crp.table_of(item) {
            return match table {
                Some(t) if t != current => Err(HirmError::DuplicateItem {
                    item,
                    table: current,
                }),
                _ => Ok(current),
            };
        }
        let table = table.unwrap_or_else(|| self.crp.sample(rng));
        self.crp.incorporate(item, table)?;
        Ok(table)
    }

    /// Remove `item`, returning the table it sat at.
    ///
    /// # Errors
    ///
    /// Returns an error if `item` is not incorporated.
    pub fn unincorporate(&mut self, item: Item) -> Result<Table> {
        self.crp.unincorporate(item)
    }

    /// Move `item` to `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if `item` is not incorporated.
    pub fn set_cluster_assignment_gibbs(&mut self, item: Item, table: Table) -> Result<()> {
        let current = self.table_of(item)?;
        if current != table {
            self.crp.unincorporate(item)?;
            self.crp.incorporate(item, table)?;
            tracing::trace!(domain = %self.name, item, from = current, to = table, "moved item");
        }
        Ok(())
    }

    /// Smallest id greater than every incorporated item.
    #[must_use]
    pub fn fresh_item(&self) -> Item {
        self.crp.assignments().keys().next_back().map_or(0, |i| i + 1)
    }

    /// Ewens log-probability of the domain's partition.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        self.crp.logp_score()
    }

    /// Resample the CRP concentration.
    pub fn transition_crp_alpha(&mut self, rng: &mut Prng) {
        self.crp.transition_alpha(rng);
    }

    /// Drop all items, keeping the concentration.
    pub(crate) fn clear(&mut self) {
        self.crp.clear();
    }
}
