//! Cluster-assignment snapshots.
//!
//! A snapshot records which table every item (and, for an HIRM, every
//! relation) sits at, so a model can be dumped and later reloaded into the
//! same partition without resampling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crp::{Item, Table};

/// Per-domain partition of an IRM's items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrmAssignment {
    /// Domain name to table to the items at that table.
    pub domains: BTreeMap<String, BTreeMap<Table, Vec<Item>>>,
}

impl IrmAssignment {
    /// Table of `item` in `domain`.
    #[must_use]
    pub fn table_of(&self, domain: &str, item: Item) -> Option<Table> {
        self.domains
            .get(domain)?
            .iter()
            .find(|(_, items)| items.contains(&item))
            .map(|(table, _)| *table)
    }

    /// Number of items listed for `domain`.
    #[must_use]
    pub fn num_items(&self, domain: &str) -> usize {
        self.domains
            .get(domain)
            .map_or(0, |tables| tables.values().map(Vec::len).sum())
    }
}

/// Partition of an HIRM's relations plus each relation cluster's IRM
/// partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HirmAssignment {
    /// Outer table to the relations at that table.
    pub relations: BTreeMap<Table, Vec<String>>,
    /// Outer table to the IRM snapshot of that table.
    pub irms: BTreeMap<Table, IrmAssignment>,
}

impl HirmAssignment {
    /// Outer table of `relation`.
    #[must_use]
    pub fn table_of(&self, relation: &str) -> Option<Table> {
        self.relations
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == relation))
            .map(|(table, _)| *table)
    }
}
