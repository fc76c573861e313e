//! Relations: observed values keyed by item tuples, scored per cluster tuple.
//!
//! Each relation owns one model ("cell") per combination of the clusters its
//! items sit in. Moving an item between clusters relocates every value keyed
//! by a tuple containing that item, always as unincorporate-then-incorporate.

pub(crate) mod latent;

use std::collections::{BTreeMap, BTreeSet};

use crate::crp::{Item, Table};
use crate::distributions::Distribution;
use crate::domain::Domain;
use crate::emissions::Emission;
use crate::error::{HirmError, Result};
use crate::observation::{ObservationType, Value, ValueKind};
use crate::prng::Prng;
use crate::schema::RelationDef;

/// One item per domain of a relation.
pub type Items = Vec<Item>;

/// Domain name to domain, as owned by an IRM.
pub type Domains = BTreeMap<String, Domain>;

/// The model backing one cluster tuple.
#[derive(Debug, Clone)]
pub enum Cell<T: ObservationType> {
    /// Distribution over values.
    Clean(T::Dist),
    /// Emission over (base value, value) pairs.
    Noisy(T::Emit),
}

impl<T: ObservationType> Cell<T> {
    /// Total incorporated weight.
    #[must_use]
    pub fn n(&self) -> f64 {
        match self {
            Self::Clean(d) => d.n(),
            Self::Noisy(e) => e.n(),
        }
    }

    /// Predictive log-probability. Noisy cells without a base give `-inf`.
    #[must_use]
    pub fn logp(&self, value: &T, base: Option<&T>) -> f64 {
        match (self, base) {
            (Self::Clean(d), _) => d.logp(value),
            (Self::Noisy(e), Some(b)) => e.logp(b, value),
            (Self::Noisy(_), None) => f64::NEG_INFINITY,
        }
    }

    fn incorporate(&mut self, value: &T, base: Option<&T>) {
        match (self, base) {
            (Self::Clean(d), _) => d.incorporate(value),
            (Self::Noisy(e), Some(b)) => e.incorporate(b, value),
            (Self::Noisy(_), None) => {}
        }
    }

    fn unincorporate(&mut self, value: &T, base: Option<&T>) {
        match (self, base) {
            (Self::Clean(d), _) => d.unincorporate(value),
            (Self::Noisy(e), Some(b)) => e.unincorporate(b, value),
            (Self::Noisy(_), None) => {}
        }
    }

    /// Log-likelihood of everything incorporated.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        match self {
            Self::Clean(d) => d.logp_score(),
            Self::Noisy(e) => e.logp_score(),
        }
    }

    fn sample(&self, rng: &mut Prng, base: Option<&T>) -> Option<T> {
        match (self, base) {
            (Self::Clean(d), _) => Some(d.sample(rng)),
            (Self::Noisy(e), Some(b)) => Some(e.sample_corrupted(b, rng)),
            (Self::Noisy(_), None) => None,
        }
    }

    fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        match self {
            Self::Clean(d) => d.transition_hyperparameters(rng),
            Self::Noisy(e) => e.transition_hyperparameters(rng),
        }
    }

    fn transition_theta(&mut self, rng: &mut Prng, steps: usize) {
        if let Self::Clean(d) = self {
            if !d.is_conjugate() {
                for _ in 0..steps {
                    d.transition_theta(rng);
                }
            }
        }
    }
}

/// A stored value and, for noisy relations, the base value it was scored
/// against.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    /// The relation's value.
    pub value: T,
    /// Base relation's value at the leading items.
    pub base: Option<T>,
}

/// A relation over values of type `T`.
#[derive(Debug, Clone)]
pub struct Relation<T: ObservationType> {
    name: String,
    def: RelationDef,
    cells: BTreeMap<Vec<Table>, Cell<T>>,
    // Cells drawn for unseen cluster tuples during the last Gibbs scoring.
    fresh: BTreeMap<Vec<Table>, Cell<T>>,
    data: BTreeMap<Items, Entry<T>>,
    item_index: BTreeMap<String, BTreeMap<Item, BTreeSet<Items>>>,
}

impl<T: ObservationType> Relation<T> {
    /// Empty relation.
    ///
    /// # Errors
    ///
    /// Returns an error if `def` models values of another type.
    pub fn new(name: impl Into<String>, def: RelationDef) -> Result<Self> {
        let name = name.into();
        if def.value_kind() != T::KIND {
            return Err(HirmError::TypeMismatch {
                relation: name,
                expected: def.value_kind(),
                actual: T::KIND,
            });
        }
        Ok(Self {
            name,
            def,
            cells: BTreeMap::new(),
            fresh: BTreeMap::new(),
            data: BTreeMap::new(),
            item_index: BTreeMap::new(),
        })
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relation definition.
    #[must_use]
    pub fn def(&self) -> &RelationDef {
        &self.def
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no value is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at `items`.
    #[must_use]
    pub fn get(&self, items: &[Item]) -> Option<&T> {
        self.data.get(items).map(|e| &e.value)
    }

    /// Stored entry at `items`.
    #[must_use]
    pub fn entry(&self, items: &[Item]) -> Option<&Entry<T>> {
        self.data.get(items)
    }

    /// All stored entries in item-tuple order.
    pub fn entries(&self) -> impl Iterator<Item = (&Items, &Entry<T>)> {
        self.data.iter()
    }

    /// Per-cluster-tuple models.
    #[must_use]
    pub fn cells(&self) -> &BTreeMap<Vec<Table>, Cell<T>> {
        &self.cells
    }

    /// Sum of every cell's log-likelihood.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        self.cells.values().map(Cell::logp_score).sum()
    }

    fn fresh_cell(&self, rng: &mut Prng) -> Result<Cell<T>> {
        let mismatch = || HirmError::TypeMismatch {
            relation: self.name.clone(),
            expected: self.def.value_kind(),
            actual: T::KIND,
        };
        match &self.def {
            RelationDef::Clean { distribution, .. } => {
                T::distribution(distribution.prior(rng)?).map(Cell::Clean).ok_or_else(mismatch)
            }
            RelationDef::Noisy { emission, .. } => {
                T::emission(emission.prior()).map(Cell::Noisy).ok_or_else(mismatch)
            }
        }
    }

    fn check_arity(&self, items: &[Item]) -> Result<()> {
        let expected = self.def.domains().len();
        if items.len() != expected {
            return Err(HirmError::ArityMismatch {
                relation: self.name.clone(),
                expected,
                actual: items.len(),
            });
        }
        Ok(())
    }

    fn check_base(&self, items: &[Item], base: Option<T>) -> Result<Option<T>> {
        match self.def.base() {
            None => Ok(None),
            Some(name) => base.map(Some).ok_or_else(|| HirmError::MissingBaseValue {
                base: name.to_string(),
                items: items.to_vec(),
            }),
        }
    }

    /// Cluster tuple the items currently map to.
    ///
    /// # Errors
    ///
    /// Returns an error if a domain or item is unknown.
    pub fn cell_key(&self, domains: &Domains, items: &[Item]) -> Result<Vec<Table>> {
        self.check_arity(items)?;
        self.def
            .domains()
            .iter()
            .zip(items)
            .map(|(d, &item)| {
                domains
                    .get(d)
                    .ok_or_else(|| HirmError::UnknownDomain(d.clone()))?
                    .table_of(item)
            })
            .collect()
    }

    /// Store `value` at `items` and add it to its cell.
    ///
    /// Every item must already sit in its domain. Noisy relations need the
    /// base value the observation is conditioned on.
    ///
    /// # Errors
    ///
    /// Returns an error on arity mismatch, a duplicate tuple, a missing base
    /// value, or a value with zero probability.
    pub fn incorporate(
        &mut self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        value: T,
        base: Option<T>,
    ) -> Result<()> {
        self.check_arity(items)?;
        if self.data.contains_key(items) {
            return Err(HirmError::DuplicateObservation {
                relation: self.name.clone(),
                items: items.to_vec(),
            });
        }
        let base = self.check_base(items, base)?;
        let key = self.cell_key(domains, items)?;
        let existing = self.cells.remove(&key);
        let existed = existing.is_some();
        let mut cell = match existing {
            Some(c) => c,
            None => self.fresh_cell(rng)?,
        };
        let lp = cell.logp(&value, base.as_ref());
        if lp == f64::NEG_INFINITY || lp.is_nan() {
            if existed {
                self.cells.insert(key, cell);
            }
            return Err(HirmError::UnsupportedValue {
                relation: self.name.clone(),
                value: value.to_string(),
            });
        }
        cell.incorporate(&value, base.as_ref());
        self.cells.insert(key, cell);
        self.index_insert(items);
        self.data.insert(items.to_vec(), Entry { value, base });
        Ok(())
    }

    /// Remove the value at `items` from its cell and from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is stored at `items`.
    pub fn unincorporate(&mut self, domains: &Domains, items: &[Item]) -> Result<Entry<T>> {
        if !self.data.contains_key(items) {
            return Err(HirmError::MissingObservation {
                relation: self.name.clone(),
                items: items.to_vec(),
            });
        }
        self.detach(domains, items, true)?;
        self.index_remove(items);
        self.data.remove(items).ok_or_else(|| HirmError::MissingObservation {
            relation: self.name.clone(),
            items: items.to_vec(),
        })
    }

    /// Predictive log-probability of `value` at `items` without mutating.
    ///
    /// Tuples mapping to a cluster tuple with no cell are scored under a fresh
    /// prior.
    ///
    /// # Errors
    ///
    /// Returns an error if an item is not seated in its domain.
    pub fn logp(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        value: &T,
        base: Option<&T>,
    ) -> Result<f64> {
        let key = self.cell_key(domains, items)?;
        Ok(match self.cells.get(&key) {
            Some(cell) => cell.logp(value, base),
            None => self.fresh_cell(rng)?.logp(value, base),
        })
    }

    /// Draw a value at `items` from its cell's predictive.
    ///
    /// Tuples with unseated items, or whose cluster tuple has no cell, draw
    /// from a fresh prior.
    ///
    /// # Errors
    ///
    /// Returns an error on arity mismatch, or if a noisy relation is given no
    /// base value.
    pub fn sample_value(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        base: Option<&T>,
    ) -> Result<T> {
        self.check_arity(items)?;
        let existing = self
            .cell_key(domains, items)
            .ok()
            .and_then(|key| self.cells.get(&key));
        let fresh;
        let cell = match existing {
            Some(cell) => cell,
            None => {
                fresh = self.fresh_cell(rng)?;
                &fresh
            }
        };
        cell.sample(rng, base).ok_or_else(|| HirmError::MissingBaseValue {
            base: self.def.base().unwrap_or_default().to_string(),
            items: items.to_vec(),
        })
    }

    /// Log-probability of every observation touching `item` of `domain` if
    /// that item sat at each candidate table.
    ///
    /// Observations sharing a cell are scored sequentially, so each candidate
    /// gets the exact joint predictive of the relocated data. Cells drawn for
    /// unseen cluster tuples are kept and adopted by the next [`attach`] that
    /// lands there, so a moved item lives under the parameters it was scored
    /// with.
    ///
    /// [`attach`]: Relation::attach
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data references unseated items.
    pub fn logp_gibbs_exact(
        &mut self,
        rng: &mut Prng,
        domains: &Domains,
        domain: &str,
        item: Item,
        candidates: &[Table],
    ) -> Result<Vec<f64>> {
        self.fresh.clear();
        let tuples = self.tuples_touching(domain, item);
        if tuples.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }
        for items in &tuples {
            self.detach(domains, items, false)?;
        }
        let mut fresh = BTreeMap::new();
        let scores: Result<Vec<f64>> = candidates
            .iter()
            .map(|&table| {
                self.score_relocated(rng, domains, domain, item, &tuples, table, &mut fresh)
            })
            .collect();
        for items in &tuples {
            self.attach(rng, domains, items)?;
        }
        self.fresh = fresh;
        scores
    }

    #[allow(clippy::too_many_arguments)]
    fn score_relocated(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        domain: &str,
        item: Item,
        tuples: &[Items],
        table: Table,
        fresh: &mut BTreeMap<Vec<Table>, Cell<T>>,
    ) -> Result<f64> {
        let mut groups: BTreeMap<Vec<Table>, Vec<&Items>> = BTreeMap::new();
        for items in tuples {
            let mut key = self.cell_key(domains, items)?;
            for (pos, d) in self.def.domains().iter().enumerate() {
                if d == domain && items[pos] == item {
                    key[pos] = table;
                }
            }
            groups.entry(key).or_default().push(items);
        }
        let mut total = 0.0;
        for (key, group) in groups {
            match (self.cells.get(&key), group.as_slice()) {
                (Some(cell), [only]) => {
                    let entry = self.stored(only)?;
                    total += cell.logp(&entry.value, entry.base.as_ref());
                }
                (existing, _) => {
                    let mut scratch = match existing {
                        Some(cell) => cell.clone(),
                        None => match fresh.get(&key) {
                            Some(cell) => cell.clone(),
                            None => {
                                let cell = self.fresh_cell(rng)?;
                                fresh.insert(key.clone(), cell.clone());
                                cell
                            }
                        },
                    };
                    for items in group {
                        let entry = self.stored(items)?;
                        total += scratch.logp(&entry.value, entry.base.as_ref());
                        scratch.incorporate(&entry.value, entry.base.as_ref());
                    }
                }
            }
        }
        Ok(total)
    }

    fn stored(&self, items: &[Item]) -> Result<&Entry<T>> {
        self.data.get(items).ok_or_else(|| HirmError::MissingObservation {
            relation: self.name.clone(),
            items: items.to_vec(),
        })
    }

    /// Remove the stored value at `items` from its cell, keeping the value.
    pub(crate) fn detach(&mut self, domains: &Domains, items: &[Item], drop_empty: bool) -> Result<()> {
        let key = self.cell_key(domains, items)?;
        let entry = self.stored(items)?.clone();
        let cell = self
            .cells
            .get_mut(&key)
            .ok_or_else(|| HirmError::MissingObservation {
                relation: self.name.clone(),
                items: items.to_vec(),
            })?;
        cell.unincorporate(&entry.value, entry.base.as_ref());
        if drop_empty && cell.n() <= 0.0 {
            self.cells.remove(&key);
        }
        Ok(())
    }

    /// Add the stored value at `items` to the cell its items now map to.
    pub(crate) fn attach(&mut self, rng: &mut Prng, domains: &Domains, items: &[Item]) -> Result<()> {
        let key = self.cell_key(domains, items)?;
        let entry = self.stored(items)?.clone();
        if !self.cells.contains_key(&key) {
            let cell = match self.fresh.remove(&key) {
                Some(cell) => cell,
                None => self.fresh_cell(rng)?,
            };
            self.cells.insert(key.clone(), cell);
        }
        if let Some(cell) = self.cells.get_mut(&key) {
            cell.incorporate(&entry.value, entry.base.as_ref());
        }
        Ok(())
    }

    /// Forget the cells kept from the last Gibbs scoring.
    pub(crate) fn discard_fresh(&mut self) {
        self.fresh.clear();
    }

    /// Drop every cell; stored values are kept.
    pub(crate) fn reset_cells(&mut self) {
        self.cells.clear();
        self.fresh.clear();
    }

    /// Replace the stored value at `items`. The caller keeps cells in sync.
    pub(crate) fn set_value(&mut self, items: &[Item], value: T) {
        if let Some(entry) = self.data.get_mut(items) {
            entry.value = value;
        }
    }

    /// Replace the stored base value at `items`. The caller keeps cells in sync.
    pub(crate) fn set_base(&mut self, items: &[Item], base: T) {
        if let Some(entry) = self.data.get_mut(items) {
            entry.base = Some(base);
        }
    }

    /// Joint log-probability of the values stored at `tuples` were their base
    /// value `clean`. The tuples must be detached.
    pub(crate) fn dependents_logp(
        &self,
        domains: &Domains,
        tuples: &[Items],
        clean: &T,
    ) -> Result<f64> {
        let mut groups: BTreeMap<Vec<Table>, Vec<&Items>> = BTreeMap::new();
        for items in tuples {
            groups.entry(self.cell_key(domains, items)?).or_default().push(items);
        }
        let mut total = 0.0;
        for (key, group) in groups {
            let Some(Cell::Noisy(cell)) = self.cells.get(&key) else {
                continue;
            };
            let mut scratch = cell.clone();
            for items in group {
                let dirty = &self.stored(items)?.value;
                total += scratch.logp(clean, dirty);
                scratch.incorporate(clean, dirty);
            }
        }
        Ok(total)
    }

    /// Clean value suggested by the emissions of the values at `tuples`.
    pub(crate) fn propose_clean(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        tuples: &[Items],
    ) -> Result<Option<T>> {
        let Some(first) = tuples.first() else {
            return Ok(None);
        };
        let key = self.cell_key(domains, first)?;
        let corrupted: Vec<T> = tuples
            .iter()
            .filter_map(|items| self.get(items).cloned())
            .collect();
        Ok(match self.cells.get(&key) {
            Some(Cell::Noisy(e)) => e.propose_clean(&corrupted, rng),
            _ => None,
        })
    }

    fn index_insert(&mut self, items: &[Item]) {
        for (d, &item) in self.def.domains().iter().zip(items) {
            self.item_index
                .entry(d.clone())
                .or_default()
                .entry(item)
                .or_default()
                .insert(items.to_vec());
        }
    }

    fn index_remove(&mut self, items: &[Item]) {
        for (d, &item) in self.def.domains().iter().zip(items) {
            if let Some(by_item) = self.item_index.get_mut(d) {
                if let Some(tuples) = by_item.get_mut(&item) {
                    tuples.remove(items);
                    if tuples.is_empty() {
                        by_item.remove(&item);
                    }
                }
            }
        }
    }

    /// Stored tuples containing `item` at a position of `domain`.
    #[must_use]
    pub fn tuples_touching(&self, domain: &str, item: Item) -> Vec<Items> {
        self.item_index
            .get(domain)
            .and_then(|by_item| by_item.get(&item))
            .map(|tuples| tuples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any stored tuple contains `item` at a position of `domain`.
    #[must_use]
    pub fn references(&self, domain: &str, item: Item) -> bool {
        self.item_index
            .get(domain)
            .is_some_and(|by_item| by_item.contains_key(&item))
    }

    /// Stored tuples starting with `prefix`.
    #[must_use]
    pub fn tuples_with_prefix(&self, prefix: &[Item]) -> Vec<Items> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(items, _)| items.starts_with(prefix))
            .map(|(items, _)| items.clone())
            .collect()
    }

    /// Resample every cell's hyperparameters.
    pub fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        for cell in self.cells.values_mut() {
            cell.transition_hyperparameters(rng);
        }
    }

    /// Run `steps` latent-parameter moves on every non-conjugate cell.
    pub fn transition_thetas(&mut self, rng: &mut Prng, steps: usize) {
        for cell in self.cells.values_mut() {
            cell.transition_theta(rng, steps);
        }
    }
}

fn typed<T: ObservationType>(relation: &str, value: &Value) -> Result<T> {
    T::from_value(value).ok_or_else(|| HirmError::TypeMismatch {
        relation: relation.to_string(),
        expected: T::KIND,
        actual: value.kind(),
    })
}

fn typed_opt<T: ObservationType>(relation: &str, value: Option<&Value>) -> Result<Option<T>> {
    value.map(|v| typed(relation, v)).transpose()
}

macro_rules! each_relation {
    ($variant:expr, $r:ident => $body:expr) => {
        match $variant {
            RelationVariant::Bool($r) => $body,
            RelationVariant::Int($r) => $body,
            RelationVariant::Real($r) => $body,
            RelationVariant::Text($r) => $body,
        }
    };
}

/// A relation over any value type.
#[derive(Debug, Clone)]
pub enum RelationVariant {
    /// Boolean values.
    Bool(Relation<bool>),
    /// Integer values.
    Int(Relation<i64>),
    /// Real values.
    Real(Relation<f64>),
    /// String values.
    Text(Relation<String>),
}

impl RelationVariant {
    /// Empty relation of the type `def` models.
    ///
    /// # Errors
    ///
    /// Never fails for a definition built from valid specs.
    pub fn new(name: &str, def: RelationDef) -> Result<Self> {
        Ok(match def.value_kind() {
            ValueKind::Bool => Self::Bool(Relation::new(name, def)?),
            ValueKind::Int => Self::Int(Relation::new(name, def)?),
            ValueKind::Real => Self::Real(Relation::new(name, def)?),
            ValueKind::Text => Self::Text(Relation::new(name, def)?),
        })
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        each_relation!(self, r => r.name())
    }

    /// Relation definition.
    #[must_use]
    pub fn def(&self) -> &RelationDef {
        each_relation!(self, r => r.def())
    }

    /// Domain of each item position.
    #[must_use]
    pub fn domains(&self) -> &[String] {
        self.def().domains()
    }

    /// Whether values come from data.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.def().is_observed()
    }

    /// Base relation of a noisy relation.
    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.def().base()
    }

    /// Type of the stored values.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.def().value_kind()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        each_relation!(self, r => r.len())
    }

    /// Whether no value is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every cell's log-likelihood.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        each_relation!(self, r => r.logp_score())
    }

    /// Number of cells.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        each_relation!(self, r => r.cells().len())
    }

    /// Value at `items`.
    #[must_use]
    pub fn get(&self, items: &[Item]) -> Option<Value> {
        each_relation!(self, r => r.get(items).cloned().map(ObservationType::into_value))
    }

    /// Value and base value at `items`.
    #[must_use]
    pub fn entry(&self, items: &[Item]) -> Option<(Value, Option<Value>)> {
        each_relation!(self, r => r.entry(items).map(|e| (
            e.value.clone().into_value(),
            e.base.clone().map(ObservationType::into_value),
        )))
    }

    /// Every stored `(items, value, base)` in item-tuple order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Items, Value, Option<Value>)> {
        each_relation!(self, r => r
            .entries()
            .map(|(items, e)| (
                items.clone(),
                e.value.clone().into_value(),
                e.base.clone().map(ObservationType::into_value),
            ))
            .collect())
    }

    /// See [`Relation::incorporate`].
    ///
    /// # Errors
    ///
    /// Also fails when `value` or `base` has the wrong type.
    pub fn incorporate(
        &mut self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        value: &Value,
        base: Option<&Value>,
    ) -> Result<()> {
        each_relation!(self, r => {
            let v = typed(r.name(), value)?;
            let b = typed_opt(r.name(), base)?;
            r.incorporate(rng, domains, items, v, b)
        })
    }

    /// See [`Relation::unincorporate`]. Returns the value and base value.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is stored at `items`.
    pub fn unincorporate(
        &mut self,
        domains: &Domains,
        items: &[Item],
    ) -> Result<(Value, Option<Value>)> {
        each_relation!(self, r => {
            let e = r.unincorporate(domains, items)?;
            Ok((e.value.into_value(), e.base.map(ObservationType::into_value)))
        })
    }

    /// See [`Relation::logp`].
    ///
    /// # Errors
    ///
    /// Also fails when `value` or `base` has the wrong type.
    pub fn logp(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        value: &Value,
        base: Option<&Value>,
    ) -> Result<f64> {
        each_relation!(self, r => {
            let v = typed(r.name(), value)?;
            let b = typed_opt(r.name(), base)?;
            r.logp(rng, domains, items, &v, b.as_ref())
        })
    }

    /// See [`Relation::sample_value`].
    ///
    /// # Errors
    ///
    /// Also fails when `base` has the wrong type.
    pub fn sample_value(
        &self,
        rng: &mut Prng,
        domains: &Domains,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        each_relation!(self, r => {
            let b = typed_opt(r.name(), base)?;
            r.sample_value(rng, domains, items, b.as_ref()).map(ObservationType::into_value)
        })
    }

    /// See [`Relation::logp_gibbs_exact`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data references unseated items.
    pub fn logp_gibbs_exact(
        &mut self,
        rng: &mut Prng,
        domains: &Domains,
        domain: &str,
        item: Item,
        candidates: &[Table],
    ) -> Result<Vec<f64>> {
        each_relation!(self, r => r.logp_gibbs_exact(rng, domains, domain, item, candidates))
    }

    /// See [`Relation::tuples_touching`].
    #[must_use]
    pub fn tuples_touching(&self, domain: &str, item: Item) -> Vec<Items> {
        each_relation!(self, r => r.tuples_touching(domain, item))
    }

    /// See [`Relation::references`].
    #[must_use]
    pub fn references(&self, domain: &str, item: Item) -> bool {
        each_relation!(self, r => r.references(domain, item))
    }

    /// See [`Relation::tuples_with_prefix`].
    #[must_use]
    pub fn tuples_with_prefix(&self, prefix: &[Item]) -> Vec<Items> {
        each_relation!(self, r => r.tuples_with_prefix(prefix))
    }

    pub(crate) fn detach(&mut self, domains: &Domains, items: &[Item], drop_empty: bool) -> Result<()> {
        each_relation!(self, r => r.detach(domains, items, drop_empty))
    }

    pub(crate) fn attach(&mut self, rng: &mut Prng, domains: &Domains, items: &[Item]) -> Result<()> {
        each_relation!(self, r => r.attach(rng, domains, items))
    }

    pub(crate) fn discard_fresh(&mut self) {
        each_relation!(self, r => r.discard_fresh());
    }

    pub(crate) fn reset_cells(&mut self) {
        each_relation!(self, r => r.reset_cells());
    }

    /// Every stored item tuple.
    #[must_use]
    pub fn tuples(&self) -> Vec<Items> {
        each_relation!(self, r => r.entries().map(|(items, _)| items.clone()).collect())
    }

    /// Resample every cell's hyperparameters.
    pub fn transition_hyperparameters(&mut self, rng: &mut Prng) {
        each_relation!(self, r => r.transition_hyperparameters(rng));
    }

    /// Run latent-parameter moves on every non-conjugate cell.
    pub fn transition_thetas(&mut self, rng: &mut Prng, steps: usize) {
        each_relation!(self, r => r.transition_thetas(rng, steps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains_with(items: &[(&str, Item, Table)]) -> Domains {
        let mut rng = Prng::new(0);
        let mut domains = Domains::new();
        for &(d, item, table) in items {
            domains
                .entry(d.to_string())
                .or_insert_with(|| Domain::new(d))
                .incorporate(&mut rng, item, Some(table))
                .unwrap();
        }
        domains
    }

    fn bernoulli_relation() -> Relation<bool> {
        Relation::new(
            "R",
            RelationDef::clean(&["A", "B"], "bernoulli".parse().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_incorporate_creates_cells_per_cluster_tuple() {
        let domains = domains_with(&[("A", 0, 0), ("A", 1, 1), ("B", 0, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(1);
        r.incorporate(&mut rng, &domains, &[0, 0], true, None).unwrap();
        r.incorporate(&mut rng, &domains, &[1, 0], false, None).unwrap();
        assert_eq!(r.cells().len(), 2);
        assert_eq!(r.len(), 2);
        assert!((r.logp_score() - 2.0 * 0.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_and_arity_errors() {
        let domains = domains_with(&[("A", 0, 0), ("B", 0, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(1);
        r.incorporate(&mut rng, &domains, &[0, 0], true, None).unwrap();
        assert!(matches!(
            r.incorporate(&mut rng, &domains, &[0, 0], true, None),
            Err(HirmError::DuplicateObservation { .. })
        ));
        assert!(matches!(
            r.incorporate(&mut rng, &domains, &[0], true, None),
            Err(HirmError::ArityMismatch { .. })
        ));
        assert!(matches!(
            r.incorporate(&mut rng, &domains, &[0, 9], true, None),
            Err(HirmError::MissingItem(9))
        ));
    }

    #[test]
    fn test_unincorporate_drops_empty_cells() {
        let domains = domains_with(&[("A", 0, 0), ("B", 0, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(1);
        r.incorporate(&mut rng, &domains, &[0, 0], true, None).unwrap();
        let entry = r.unincorporate(&domains, &[0, 0]).unwrap();
        assert!(entry.value);
        assert!(r.cells().is_empty());
        assert!(!r.references("A", 0));
        assert!(r.unincorporate(&domains, &[0, 0]).is_err());
    }

    #[test]
    fn test_unsupported_value_rejected() {
        let domains = domains_with(&[("A", 0, 0)]);
        let mut r: Relation<i64> = Relation::new(
            "C",
            RelationDef::clean(&["A"], "categorical(k=3)".parse().unwrap()),
        )
        .unwrap();
        let mut rng = Prng::new(1);
        assert!(matches!(
            r.incorporate(&mut rng, &domains, &[0], 7, None),
            Err(HirmError::UnsupportedValue { .. })
        ));
        assert!(r.cells().is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn test_noisy_requires_base() {
        let domains = domains_with(&[("A", 0, 0)]);
        let mut r: Relation<bool> = Relation::new(
            "N",
            RelationDef::noisy(&["A"], "bitflip".parse().unwrap(), "R"),
        )
        .unwrap();
        let mut rng = Prng::new(1);
        assert!(matches!(
            r.incorporate(&mut rng, &domains, &[0], true, None),
            Err(HirmError::MissingBaseValue { .. })
        ));
        r.incorporate(&mut rng, &domains, &[0], true, Some(false)).unwrap();
        assert_eq!(r.entry(&[0]).unwrap().base, Some(false));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let def = RelationDef::clean(&["A"], "normal".parse().unwrap());
        assert!(Relation::<bool>::new("R", def.clone()).is_err());
        let mut variant = RelationVariant::new("R", def).unwrap();
        let domains = domains_with(&[("A", 0, 0)]);
        let mut rng = Prng::new(1);
        assert!(matches!(
            variant.incorporate(&mut rng, &domains, &[0], &Value::Bool(true), None),
            Err(HirmError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_logp_gibbs_exact_restores_state() {
        let domains = domains_with(&[("A", 0, 0), ("A", 1, 1), ("B", 0, 0), ("B", 1, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(1);
        r.incorporate(&mut rng, &domains, &[0, 0], true, None).unwrap();
        r.incorporate(&mut rng, &domains, &[0, 1], true, None).unwrap();
        r.incorporate(&mut rng, &domains, &[1, 0], true, None).unwrap();
        let score = r.logp_score();
        let scores = r
            .logp_gibbs_exact(&mut rng, &domains, "A", 0, &[0, 1, 2])
            .unwrap();
        assert!((r.logp_score() - score).abs() < 1e-12);
        assert_eq!(r.cells().len(), 2);
        // Table 0 (alone): 1/2 * 2/3. Table 1 (with one true): 2/3 * 3/4.
        assert!((scores[0] - (1.0_f64 / 3.0).ln()).abs() < 1e-12);
        assert!((scores[1] - 0.5_f64.ln()).abs() < 1e-12);
        assert!((scores[2] - (1.0_f64 / 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_new_table_adopts_scored_cell() {
        let mut domains = domains_with(&[("A", 0, 0), ("A", 1, 0)]);
        let mut r: Relation<i64> =
            Relation::new("S", RelationDef::clean(&["A"], "skellam".parse().unwrap())).unwrap();
        let mut rng = Prng::new(3);
        r.incorporate(&mut rng, &domains, &[0], 4, None).unwrap();
        r.incorporate(&mut rng, &domains, &[1], -2, None).unwrap();
        let scores = r.logp_gibbs_exact(&mut rng, &domains, "A", 0, &[0, 1]).unwrap();
        assert_eq!(r.cells().len(), 1);

        r.detach(&domains, &[0], true).unwrap();
        domains
            .get_mut("A")
            .unwrap()
            .set_cluster_assignment_gibbs(0, 1)
            .unwrap();
        r.attach(&mut rng, &domains, &[0]).unwrap();

        // Sampled cells score values independently of their data, so the
        // adopted cell must reproduce the new-table score exactly.
        let adopted = &r.cells()[&vec![1]];
        assert!((adopted.logp(&4, None) - scores[1]).abs() < 1e-12);
    }

    #[test]
    fn test_attach_without_scoring_draws_fresh_cell() {
        let mut domains = domains_with(&[("A", 0, 0), ("A", 1, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(3);
        domains
            .entry("B".to_string())
            .or_insert_with(|| Domain::new("B"))
            .incorporate(&mut rng, 0, Some(0))
            .unwrap();
        r.incorporate(&mut rng, &domains, &[0, 0], true, None).unwrap();
        r.incorporate(&mut rng, &domains, &[1, 0], true, None).unwrap();
        r.logp_gibbs_exact(&mut rng, &domains, "A", 0, &[0, 1]).unwrap();
        r.discard_fresh();

        r.detach(&domains, &[0, 0], true).unwrap();
        domains
            .get_mut("A")
            .unwrap()
            .set_cluster_assignment_gibbs(0, 1)
            .unwrap();
        r.attach(&mut rng, &domains, &[0, 0]).unwrap();
        assert_eq!(r.cells().len(), 2);
        assert_eq!(r.cells()[&vec![1, 0]].n(), 1.0);
    }

    #[test]
    fn test_tuples_with_prefix() {
        let domains = domains_with(&[("A", 0, 0), ("A", 1, 0), ("B", 0, 0), ("B", 1, 0)]);
        let mut r = bernoulli_relation();
        let mut rng = Prng::new(1);
        for items in [[0, 0], [0, 1], [1, 0]] {
            r.incorporate(&mut rng, &domains, &items, true, None).unwrap();
        }
        assert_eq!(r.tuples_with_prefix(&[0]), vec![vec![0, 0], vec![0, 1]]);
        assert_eq!(r.tuples_with_prefix(&[1]), vec![vec![1, 0]]);
        assert!(r.tuples_with_prefix(&[2]).is_empty());
        assert_eq!(r.tuples_touching("B", 0).len(), 2);
    }

    #[test]
    fn test_variant_entries_and_get() {
        let domains = domains_with(&[("A", 3, 0)]);
        let mut variant = RelationVariant::new(
            "R",
            RelationDef::clean(&["A"], "normal".parse().unwrap()),
        )
        .unwrap();
        let mut rng = Prng::new(1);
        variant
            .incorporate(&mut rng, &domains, &[3], &Value::Real(1.25), None)
            .unwrap();
        assert_eq!(variant.get(&[3]), Some(Value::Real(1.25)));
        assert_eq!(variant.entries(), vec![(vec![3], Value::Real(1.25), None)]);
        assert_eq!(variant.value_kind(), ValueKind::Real);
    }
}
