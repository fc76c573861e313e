//! Infinite relational model: domains clustered jointly with the relations
//! defined over them.
//!
//! Every domain owns a CRP over its items. Every relation keeps one cell per
//! tuple of clusters, so moving an item relocates each observation touching it.
//!
//! # Example
//!
//! ```
//! use hirm::prelude::*;
//!
//! let mut schema = Schema::new();
//! schema.insert(
//!     "likes".to_string(),
//!     RelationDef::clean(&["people", "movies"], "bernoulli".parse().unwrap()),
//! );
//! let mut irm = Irm::new(schema).unwrap();
//! let mut rng = Prng::new(7);
//! irm.incorporate(&mut rng, "likes", &[0, 0], true.into()).unwrap();
//! irm.incorporate(&mut rng, "likes", &[1, 0], false.into()).unwrap();
//! irm.transition_cluster_assignments_all(&mut rng).unwrap();
//! assert!(irm.logp_score() < 0.0);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::assignment::IrmAssignment;
use crate::config::{GibbsConfig, DEFAULT_THETA_STEPS};
use crate::crp::{Item, Table};
use crate::domain::Domain;
use crate::error::{HirmError, Result};
use crate::math::{log_choice, logsumexp};
use crate::observation::{Observation, Value};
use crate::prng::Prng;
use crate::relation::latent::{self, Scoped};
use crate::relation::{Domains, Items, RelationVariant};
use crate::schema::{base_first_order, dependents, validate_relation, validate_schema, RelationDef, Schema};

/// Largest number of seatings of new items that `logp` enumerates exactly.
pub const MAX_EXACT_LEAVES: usize = 4096;

/// Prior draws averaged by `logp` when enumeration is too large.
pub const MONTE_CARLO_SAMPLES: usize = 256;

/// Draws of a fresh item tuple before falling back to all-new items.
const MAX_TUPLE_ATTEMPTS: usize = 100;

/// Observations drawn by `sample_and_incorporate`, per relation.
pub type Samples = BTreeMap<String, Vec<(Items, Value)>>;

/// Lookup and creation of base values for noisy relations.
///
/// Implemented by anything that can resolve a relation name to its stored
/// values, so base values are found the same way whether the base shares an
/// IRM with its noisy relation or not.
pub(crate) trait BaseValues {
    fn relation_def(&self, name: &str) -> Result<&RelationDef>;

    fn stored_value(&self, name: &str, items: &[Item]) -> Option<Value>;

    /// Predictive draw that leaves the model untouched.
    fn predictive_draw(
        &self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value>;

    /// Draw a value, seating new items, and store it.
    fn incorporate_draw(
        &mut self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value>;
}

fn base_prefix<'a, S: BaseValues + ?Sized>(
    source: &S,
    name: &str,
    items: &'a [Item],
) -> Result<Option<(String, &'a [Item])>> {
    let def = source.relation_def(name)?;
    if items.len() != def.domains().len() {
        return Err(HirmError::ArityMismatch {
            relation: name.to_string(),
            expected: def.domains().len(),
            actual: items.len(),
        });
    }
    let Some(base) = def.base() else {
        return Ok(None);
    };
    let arity = source.relation_def(base)?.domains().len();
    Ok(Some((base.to_string(), &items[..arity])))
}

/// Base value a noisy observation at `items` conditions on, creating latent
/// base values as needed.
///
/// A missing value of an observed base is an error unless `sampling`. Every
/// base value created along the way is appended to `created`.
pub(crate) fn ensure_base<S: BaseValues + ?Sized>(
    source: &mut S,
    rng: &mut Prng,
    name: &str,
    items: &[Item],
    sampling: bool,
    created: &mut Vec<Observation>,
) -> Result<Option<Value>> {
    let Some((base, prefix)) = base_prefix(&*source, name, items)? else {
        return Ok(None);
    };
    if let Some(value) = source.stored_value(&base, prefix) {
        return Ok(Some(value));
    }
    if source.relation_def(&base)?.is_observed() && !sampling {
        return Err(HirmError::MissingBaseValue {
            base,
            items: prefix.to_vec(),
        });
    }
    let base_base = ensure_base(source, rng, &base, prefix, sampling, created)?;
    let value = source.incorporate_draw(rng, &base, prefix, base_base.as_ref())?;
    created.push(Observation::new(base, prefix.to_vec(), value.clone()));
    Ok(Some(value))
}

/// Base value of every observation of a batch, without mutating.
///
/// Taken from the batch itself, then from stored data, then from one
/// predictive draw shared by every observation needing it.
pub(crate) fn resolve_batch_bases<S: BaseValues + ?Sized>(
    source: &S,
    rng: &mut Prng,
    observations: &[Observation],
) -> Result<Vec<Option<Value>>> {
    let mut drawn = BTreeMap::new();
    observations
        .iter()
        .map(|obs| resolve_base(source, rng, &obs.relation, &obs.items, observations, &mut drawn))
        .collect()
}

fn resolve_base<S: BaseValues + ?Sized>(
    source: &S,
    rng: &mut Prng,
    name: &str,
    items: &[Item],
    batch: &[Observation],
    drawn: &mut BTreeMap<(String, Items), Value>,
) -> Result<Option<Value>> {
    let Some((base, prefix)) = base_prefix(source, name, items)? else {
        return Ok(None);
    };
    if let Some(obs) = batch.iter().find(|o| o.relation == base && o.items == prefix) {
        return Ok(Some(obs.value.clone()));
    }
    if let Some(value) = source.stored_value(&base, prefix) {
        return Ok(Some(value));
    }
    let key = (base, prefix.to_vec());
    if let Some(value) = drawn.get(&key) {
        return Ok(Some(value.clone()));
    }
    let base_base = resolve_base(source, rng, &key.0, prefix, batch, drawn)?;
    let value = source.predictive_draw(rng, &key.0, prefix, base_base.as_ref())?;
    drawn.insert(key, value.clone());
    Ok(Some(value))
}

/// Domains and relations clustered jointly.
#[derive(Debug, Clone)]
pub struct Irm {
    schema: Schema,
    domains: Domains,
    relations: BTreeMap<String, RelationVariant>,
    domain_to_relations: BTreeMap<String, BTreeSet<String>>,
}

impl Irm {
    /// Model over every relation of `schema`, with no data.
    ///
    /// # Errors
    ///
    /// Returns [`HirmError::InvalidSchema`] if the schema fails validation.
    pub fn new(schema: Schema) -> Result<Self> {
        validate_schema(&schema)?;
        let mut irm = Self::empty();
        for (name, def) in schema {
            irm.insert_relation(&name, def)?;
        }
        Ok(irm)
    }

    pub(crate) fn empty() -> Self {
        Self {
            schema: Schema::new(),
            domains: Domains::new(),
            relations: BTreeMap::new(),
            domain_to_relations: BTreeMap::new(),
        }
    }

    /// Definitions of the relations in this model.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Domains by name.
    #[must_use]
    pub fn domains(&self) -> &Domains {
        &self.domains
    }

    /// Domain by name.
    #[must_use]
    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.get(name)
    }

    /// Relation by name.
    #[must_use]
    pub fn get_relation(&self, name: &str) -> Option<&RelationVariant> {
        self.relations.get(name)
    }

    /// Relations by name.
    #[must_use]
    pub fn relations(&self) -> &BTreeMap<String, RelationVariant> {
        &self.relations
    }

    /// Whether the model holds no relation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    fn relation(&self, name: &str) -> Result<&RelationVariant> {
        self.relations
            .get(name)
            .ok_or_else(|| HirmError::UnknownRelation(name.to_string()))
    }

    fn domain_mut(&mut self, name: &str) -> Result<&mut Domain> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| HirmError::UnknownDomain(name.to_string()))
    }

    /// Add an empty relation, creating its domains as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the definition does not fit
    /// the relations already present.
    pub fn add_relation(&mut self, name: &str, def: RelationDef) -> Result<()> {
        if self.relations.contains_key(name) {
            return Err(HirmError::DuplicateRelation(name.to_string()));
        }
        validate_relation(&self.schema, name, &def)?;
        self.insert_relation(name, def)
    }

    /// Add a relation whose base may live elsewhere.
    pub(crate) fn insert_relation(&mut self, name: &str, def: RelationDef) -> Result<()> {
        if self.relations.contains_key(name) {
            return Err(HirmError::DuplicateRelation(name.to_string()));
        }
        let relation = RelationVariant::new(name, def.clone())?;
        for d in def.domains() {
            self.domains
                .entry(d.clone())
                .or_insert_with(|| Domain::new(d.clone()));
            self.domain_to_relations
                .entry(d.clone())
                .or_default()
                .insert(name.to_string());
        }
        self.relations.insert(name.to_string(), relation);
        self.schema.insert(name.to_string(), def);
        Ok(())
    }

    /// Delete a relation and its data, pruning items nothing else references.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation or one that is the base of
    /// another relation in this model.
    pub fn remove_relation(&mut self, name: &str) -> Result<()> {
        if let Some(dependent) = dependents(&self.schema, name).into_iter().next() {
            return Err(HirmError::HasDependents {
                relation: name.to_string(),
                dependent,
            });
        }
        self.take_relation(name).map(|_| ())
    }

    /// Detach a relation with its data, pruning unreferenced items and unused
    /// domains.
    pub(crate) fn take_relation(&mut self, name: &str) -> Result<(RelationDef, RelationVariant)> {
        let relation = self
            .relations
            .remove(name)
            .ok_or_else(|| HirmError::UnknownRelation(name.to_string()))?;
        let def = self
            .schema
            .remove(name)
            .unwrap_or_else(|| relation.def().clone());
        for d in def.domains() {
            if let Some(names) = self.domain_to_relations.get_mut(d) {
                names.remove(name);
            }
        }
        for items in relation.tuples() {
            for (d, &item) in def.domains().iter().zip(&items) {
                self.prune_item(d, item)?;
            }
        }
        let unused: Vec<String> = self
            .domain_to_relations
            .iter()
            .filter(|(_, names)| names.is_empty())
            .map(|(d, _)| d.clone())
            .collect();
        for d in unused {
            self.domain_to_relations.remove(&d);
            self.domains.remove(&d);
        }
        tracing::debug!(relation = name, "removed relation from IRM");
        Ok((def, relation))
    }

    fn prune_item(&mut self, domain: &str, item: Item) -> Result<()> {
        let referenced = self.domain_to_relations.get(domain).is_some_and(|names| {
            names.iter().any(|n| {
                self.relations
                    .get(n)
                    .is_some_and(|r| r.references(domain, item))
            })
        });
        if !referenced {
            if let Some(d) = self.domains.get_mut(domain) {
                if d.contains(item) {
                    d.unincorporate(item)?;
                }
            }
        }
        Ok(())
    }

    /// Seat unseated items, returning what was seated for rollback.
    fn seat_items(
        &mut self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
    ) -> Result<Vec<(String, Item)>> {
        let domains = self.relation(name)?.domains().to_vec();
        if domains.len() != items.len() {
            return Err(HirmError::ArityMismatch {
                relation: name.to_string(),
                expected: domains.len(),
                actual: items.len(),
            });
        }
        let mut seated = Vec::new();
        for (d, &item) in domains.iter().zip(items) {
            let domain = self.domain_mut(d)?;
            if !domain.contains(item) {
                domain.incorporate(rng, item, None)?;
                seated.push((d.clone(), item));
            }
        }
        Ok(seated)
    }

    /// Remove items seated by [`Irm::seat_items`], newest first.
    fn unseat(&mut self, seated: Vec<(String, Item)>) -> Result<()> {
        for (d, item) in seated.into_iter().rev() {
            let domain = self.domain_mut(&d)?;
            if domain.contains(item) {
                domain.unincorporate(item)?;
            }
        }
        Ok(())
    }

    /// Record `value` at `items`.
    ///
    /// New items join their domain at a table drawn from its CRP. A noisy
    /// relation conditions on its base value at the leading items; a missing
    /// value of an unobserved base is drawn and stored first.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation, wrong arity or type, a
    /// duplicate tuple, a zero-probability value, or a missing value of an
    /// observed base.
    pub fn incorporate(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        items: &[Item],
        value: Value,
    ) -> Result<()> {
        let mut created = Vec::new();
        let base = ensure_base(self, rng, relation, items, false, &mut created)?;
        self.incorporate_with_base(rng, relation, items, &value, base.as_ref())
    }

    /// Record `value` at `items` conditioned on an explicit base value.
    pub(crate) fn incorporate_with_base(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        items: &[Item],
        value: &Value,
        base: Option<&Value>,
    ) -> Result<()> {
        let seated = self.seat_items(rng, relation, items)?;
        let result = match self.relations.get_mut(relation) {
            Some(r) => r.incorporate(rng, &self.domains, items, value, base),
            None => Err(HirmError::UnknownRelation(relation.to_string())),
        };
        if result.is_err() {
            self.unseat(seated)?;
        }
        result
    }

    /// Remove the observation at `items`, pruning items nothing references.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is stored there, or if noisy observations
    /// in this model condition on the value.
    pub fn unincorporate(&mut self, relation: &str, items: &[Item]) -> Result<Value> {
        for dep in dependents(&self.schema, relation) {
            if !self.relation(&dep)?.tuples_with_prefix(items).is_empty() {
                return Err(HirmError::HasDependents {
                    relation: relation.to_string(),
                    dependent: dep,
                });
            }
        }
        self.remove_observation(relation, items).map(|(value, _)| value)
    }

    /// Remove an observation without checking for dependents.
    pub(crate) fn remove_observation(
        &mut self,
        relation: &str,
        items: &[Item],
    ) -> Result<(Value, Option<Value>)> {
        let r = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?;
        let removed = r.unincorporate(&self.domains, items)?;
        let domains = r.domains().to_vec();
        for (d, &item) in domains.iter().zip(items) {
            self.prune_item(d, item)?;
        }
        Ok(removed)
    }

    /// Sum of every domain's CRP score and every relation's score.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        let domains: f64 = self.domains.values().map(Domain::logp_score).sum();
        let relations: f64 = self.relations.values().map(RelationVariant::logp_score).sum();
        domains + relations
    }

    /// Joint log-probability of a batch of observations, leaving the model as
    /// it was.
    ///
    /// New items are integrated over their CRP seatings: exactly when there
    /// are at most [`MAX_EXACT_LEAVES`] seatings, otherwise by averaging
    /// [`MONTE_CARLO_SAMPLES`] prior draws.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown relations, wrong arity or value types.
    pub fn logp(&mut self, rng: &mut Prng, observations: &[Observation]) -> Result<f64> {
        let bases = resolve_batch_bases(&*self, rng, observations)?;
        let batch: Vec<(Observation, Option<Value>)> =
            observations.iter().cloned().zip(bases).collect();
        self.logp_resolved(rng, &batch)
    }

    pub(crate) fn logp_resolved(
        &mut self,
        rng: &mut Prng,
        batch: &[(Observation, Option<Value>)],
    ) -> Result<f64> {
        let mut new_items: Vec<(String, Item)> = Vec::new();
        for (obs, _) in batch {
            let relation = self.relation(&obs.relation)?;
            if relation.domains().len() != obs.items.len() {
                return Err(HirmError::ArityMismatch {
                    relation: obs.relation.clone(),
                    expected: relation.domains().len(),
                    actual: obs.items.len(),
                });
            }
            for (d, &item) in relation.domains().iter().zip(&obs.items) {
                let seated = self.domains.get(d).is_some_and(|dom| dom.contains(item));
                let pair = (d.clone(), item);
                if !seated && !new_items.contains(&pair) {
                    new_items.push(pair);
                }
            }
        }

        let mut leaves = 1_usize;
        let mut opened: BTreeMap<&str, usize> = BTreeMap::new();
        for (d, _) in &new_items {
            let existing = self.domains.get(d).map_or(0, |dom| dom.crp().tables().len());
            let count = opened.entry(d.as_str()).or_insert(0);
            leaves = leaves.saturating_mul(existing + *count + 1);
            *count += 1;
        }

        if leaves <= MAX_EXACT_LEAVES {
            return self.logp_enumerate(rng, &new_items, batch);
        }
        tracing::debug!(leaves, "scoring batch by Monte Carlo over new items");
        let mut draws = Vec::with_capacity(MONTE_CARLO_SAMPLES);
        for _ in 0..MONTE_CARLO_SAMPLES {
            let mut seated = Vec::with_capacity(new_items.len());
            let mut result = Ok(());
            for (d, item) in &new_items {
                match self.domain_mut(d).and_then(|dom| dom.incorporate(rng, *item, None)) {
                    Ok(_) => seated.push((d.clone(), *item)),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            let lp = result.and_then(|()| self.logp_sequential(rng, batch));
            self.unseat(seated)?;
            draws.push(lp?);
        }
        Ok(logsumexp(&draws) - (MONTE_CARLO_SAMPLES as f64).ln())
    }

    fn logp_enumerate(
        &mut self,
        rng: &mut Prng,
        new_items: &[(String, Item)],
        batch: &[(Observation, Option<Value>)],
    ) -> Result<f64> {
        let Some(((domain, item), rest)) = new_items.split_first() else {
            return self.logp_sequential(rng, batch);
        };
        let crp = self
            .domains
            .get(domain)
            .ok_or_else(|| HirmError::UnknownDomain(domain.clone()))?
            .crp();
        let weights = crp.tables_weights();
        let log_total = (crp.n() as f64 + crp.alpha()).ln();
        let mut terms = Vec::with_capacity(weights.len());
        for (table, weight) in weights {
            self.domain_mut(domain)?.incorporate(rng, *item, Some(table))?;
            let lp = self.logp_enumerate(rng, rest, batch);
            self.domain_mut(domain)?.unincorporate(*item)?;
            terms.push(weight.ln() - log_total + lp?);
        }
        Ok(logsumexp(&terms))
    }

    /// Score the batch in order, incorporating each observation after scoring
    /// it, then roll every incorporation back.
    fn logp_sequential(
        &mut self,
        rng: &mut Prng,
        batch: &[(Observation, Option<Value>)],
    ) -> Result<f64> {
        let mut undo: Vec<(&str, &[Item])> = Vec::new();
        let result = self.score_and_stage(rng, batch, &mut undo);
        for (name, items) in undo.into_iter().rev() {
            if let Some(r) = self.relations.get_mut(name) {
                r.unincorporate(&self.domains, items)?;
            }
        }
        result
    }

    fn score_and_stage<'b>(
        &mut self,
        rng: &mut Prng,
        batch: &'b [(Observation, Option<Value>)],
        undo: &mut Vec<(&'b str, &'b [Item])>,
    ) -> Result<f64> {
        let mut total = 0.0;
        for (obs, base) in batch {
            let r = self
                .relations
                .get_mut(&obs.relation)
                .ok_or_else(|| HirmError::UnknownRelation(obs.relation.clone()))?;
            let lp = r.logp(rng, &self.domains, &obs.items, &obs.value, base.as_ref())?;
            total += lp;
            if lp == f64::NEG_INFINITY {
                break;
            }
            if r.get(&obs.items).is_none() {
                r.incorporate(rng, &self.domains, &obs.items, &obs.value, base.as_ref())?;
                undo.push((obs.relation.as_str(), obs.items.as_slice()));
            }
        }
        Ok(total)
    }

    /// Pick a tuple not yet observed in `relation` and seat its items.
    ///
    /// Each position draws a table from its domain's CRP: an existing table
    /// yields one of its items uniformly, a new table yields a fresh item.
    pub(crate) fn draw_tuple(&mut self, rng: &mut Prng, relation: &str) -> Result<Items> {
        let domains = self.relation(relation)?.domains().to_vec();
        for _ in 0..MAX_TUPLE_ATTEMPTS {
            let mut items = Vec::with_capacity(domains.len());
            let mut seated = Vec::new();
            for d in &domains {
                let domain = self.domain_mut(d)?;
                let table = domain.crp().sample(rng);
                let members = domain.crp().tables().get(&table);
                let existing = members.and_then(|m| m.iter().nth(rng.index(m.len())).copied());
                match existing {
                    Some(item) => items.push(item),
                    None => {
                        let item = domain.fresh_item();
                        domain.incorporate(rng, item, Some(table))?;
                        seated.push((d.clone(), item));
                        items.push(item);
                    }
                }
            }
            if self.relation(relation)?.get(&items).is_none() {
                return Ok(items);
            }
            self.unseat(seated)?;
        }
        tracing::warn!(relation, "no unobserved tuple found, using fresh items");
        let mut items = Vec::with_capacity(domains.len());
        for d in &domains {
            let domain = self.domain_mut(d)?;
            let item = domain.fresh_item();
            domain.incorporate(rng, item, None)?;
            items.push(item);
        }
        Ok(items)
    }

    /// Draw a value at seated `items` from the predictive and store it.
    pub(crate) fn draw_value(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        let r = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?;
        let value = r.sample_value(rng, &self.domains, items, base)?;
        r.incorporate(rng, &self.domains, items, &value, base)?;
        Ok(value)
    }

    /// Draw `n` new observations for every observed relation and store them.
    ///
    /// Relations are visited bases first. Base values a noisy draw needs are
    /// drawn too and reported with the samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema references a base outside this model.
    pub fn sample_and_incorporate(&mut self, rng: &mut Prng, n: usize) -> Result<Samples> {
        let mut samples = Samples::new();
        for name in base_first_order(&self.schema)? {
            if !self.relation(&name)?.is_observed() {
                continue;
            }
            for _ in 0..n {
                let items = self.draw_tuple(rng, &name)?;
                let mut created = Vec::new();
                let base = ensure_base(self, rng, &name, &items, true, &mut created)?;
                for obs in created {
                    samples.entry(obs.relation).or_default().push((obs.items, obs.value));
                }
                let value = self.draw_value(rng, &name, &items, base.as_ref())?;
                samples.entry(name.clone()).or_default().push((items, value));
            }
        }
        Ok(samples)
    }

    /// Gibbs move of one item of one domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain or item is unknown.
    pub fn transition_cluster_assignment_item(
        &mut self,
        rng: &mut Prng,
        domain: &str,
        item: Item,
    ) -> Result<()> {
        let d = self
            .domains
            .get(domain)
            .ok_or_else(|| HirmError::UnknownDomain(domain.to_string()))?;
        let current = d.table_of(item)?;
        let weights = d.crp().tables_weights_gibbs(current)?;
        let tables: Vec<Table> = weights.keys().copied().collect();
        let mut logps: Vec<f64> = weights.values().map(|w| w.ln()).collect();
        let names: Vec<String> = self
            .domain_to_relations
            .get(domain)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for name in &names {
            if let Some(r) = self.relations.get_mut(name) {
                let scores = r.logp_gibbs_exact(rng, &self.domains, domain, item, &tables)?;
                for (lp, s) in logps.iter_mut().zip(scores) {
                    *lp += s;
                }
            }
        }
        let chosen = tables[log_choice(&logps, rng)];
        if chosen != current {
            self.move_item(rng, domain, item, chosen, &names)?;
        }
        for name in &names {
            if let Some(r) = self.relations.get_mut(name) {
                r.discard_fresh();
            }
        }
        Ok(())
    }

    fn move_item(
        &mut self,
        rng: &mut Prng,
        domain: &str,
        item: Item,
        table: Table,
        names: &[String],
    ) -> Result<()> {
        let mut touched = Vec::new();
        for name in names {
            if let Some(r) = self.relations.get_mut(name) {
                let tuples = r.tuples_touching(domain, item);
                for items in &tuples {
                    r.detach(&self.domains, items, true)?;
                }
                touched.push((name, tuples));
            }
        }
        self.domain_mut(domain)?
            .set_cluster_assignment_gibbs(item, table)?;
        for (name, tuples) in touched {
            if let Some(r) = self.relations.get_mut(name) {
                for items in &tuples {
                    r.attach(rng, &self.domains, items)?;
                }
            }
        }
        Ok(())
    }

    /// One Gibbs sweep over every item of every domain.
    ///
    /// # Errors
    ///
    /// Returns an error only if the model's internal indexes disagree.
    pub fn transition_cluster_assignments_all(&mut self, rng: &mut Prng) -> Result<()> {
        let names: Vec<String> = self.domains.keys().cloned().collect();
        for domain in names {
            let items: Vec<Item> = self.domains[&domain].items().collect();
            for item in items {
                self.transition_cluster_assignment_item(rng, &domain, item)?;
            }
        }
        Ok(())
    }

    /// Resample every cell's hyperparameters, then move the latent parameters
    /// of non-conjugate cells `theta_steps` times.
    pub fn transition_cluster_hparams(&mut self, rng: &mut Prng, theta_steps: usize) {
        for relation in self.relations.values_mut() {
            relation.transition_hyperparameters(rng);
            relation.transition_thetas(rng, theta_steps);
        }
    }

    /// Resample every domain's CRP concentration.
    pub fn transition_crp_alphas(&mut self, rng: &mut Prng) {
        for domain in self.domains.values_mut() {
            domain.transition_crp_alpha(rng);
        }
    }

    /// Resample the values of an unobserved relation given its noisy
    /// dependents in this model, then move the latent parameters of its
    /// non-conjugate cells. Observed relations only take the parameter moves.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation.
    pub fn transition_latent_values_relation(&mut self, rng: &mut Prng, relation: &str) -> Result<()> {
        self.transition_latent_values_relation_steps(rng, relation, DEFAULT_THETA_STEPS)
    }

    pub(crate) fn transition_latent_values_relation_steps(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        theta_steps: usize,
    ) -> Result<()> {
        if self.relation(relation)?.is_observed() {
            tracing::debug!(relation, "observed relation, moving parameters only");
            return self.transition_relation_thetas(rng, relation, theta_steps);
        }
        let deps: BTreeSet<String> = dependents(&self.schema, relation).into_iter().collect();
        let mut base = None;
        let mut noisy = Vec::with_capacity(deps.len());
        for (name, scoped) in self.scoped_mut(|n| n == relation || deps.contains(n)) {
            if name == relation {
                base = Some(scoped);
            } else {
                noisy.push(scoped);
            }
        }
        let base = base.ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?;
        latent::transition_latent_values(rng, base, noisy, theta_steps)
    }

    /// Run `steps` latent-parameter moves on the non-conjugate cells of one relation.
    pub(crate) fn transition_relation_thetas(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        steps: usize,
    ) -> Result<()> {
        self.relations
            .get_mut(relation)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?
            .transition_thetas(rng, steps);
        Ok(())
    }

    /// Mutable relations selected by name, each paired with this model's domains.
    pub(crate) fn scoped_mut(
        &mut self,
        mut select: impl FnMut(&str) -> bool,
    ) -> Vec<(String, Scoped<'_>)> {
        let domains = &self.domains;
        self.relations
            .iter_mut()
            .filter(|(name, _)| select(name.as_str()))
            .map(|(name, relation)| (name.clone(), Scoped { domains, relation }))
            .collect()
    }

    /// One inference step running the kernels enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the model's internal indexes disagree.
    pub fn transition(&mut self, rng: &mut Prng, config: &GibbsConfig) -> Result<()> {
        if config.domain_clusters {
            self.transition_cluster_assignments_all(rng)?;
        }
        if config.hyperparameters {
            self.transition_cluster_hparams(rng, config.theta_steps);
        }
        if config.crp_alphas {
            self.transition_crp_alphas(rng);
        }
        if config.latent_values {
            for name in base_first_order(&self.schema)? {
                self.transition_latent_values_relation_steps(rng, &name, config.theta_steps)?;
            }
        }
        Ok(())
    }

    /// Current partition of every domain.
    #[must_use]
    pub fn cluster_assignment(&self) -> IrmAssignment {
        IrmAssignment {
            domains: self
                .domains
                .iter()
                .map(|(name, domain)| {
                    let tables = domain
                        .crp()
                        .tables()
                        .iter()
                        .map(|(table, items)| (*table, items.iter().copied().collect()))
                        .collect();
                    (name.clone(), tables)
                })
                .collect(),
        }
    }

    /// Reseat every item as `assignment` says and rebuild every cell.
    ///
    /// Items listed in the snapshot but absent from the data are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the model unchanged, if the snapshot names an
    /// unknown domain, lists an item twice, or misses an incorporated item.
    pub fn set_cluster_assignment(&mut self, rng: &mut Prng, assignment: &IrmAssignment) -> Result<()> {
        for (name, tables) in &assignment.domains {
            if !self.domains.contains_key(name) {
                return Err(HirmError::UnknownDomain(name.clone()));
            }
            let mut seen = BTreeSet::new();
            for item in tables.values().flatten() {
                if !seen.insert(*item) {
                    return Err(HirmError::InvalidAssignment(format!(
                        "item {item} of domain {name} is listed twice"
                    )));
                }
            }
        }
        for (name, domain) in &self.domains {
            if let Some(item) = domain
                .items()
                .find(|&item| assignment.table_of(name, item).is_none())
            {
                return Err(HirmError::InvalidAssignment(format!(
                    "item {item} of domain {name} has no table"
                )));
            }
        }

        for relation in self.relations.values_mut() {
            relation.reset_cells();
        }
        for (name, domain) in &mut self.domains {
            let present: BTreeSet<Item> = domain.items().collect();
            domain.clear();
            let Some(tables) = assignment.domains.get(name) else {
                continue;
            };
            for (&table, items) in tables {
                for &item in items.iter().filter(|i| present.contains(i)) {
                    domain.incorporate(rng, item, Some(table))?;
                }
            }
        }
        for relation in self.relations.values_mut() {
            for items in relation.tuples() {
                relation.attach(rng, &self.domains, &items)?;
            }
        }
        Ok(())
    }

    /// Every stored value, bases before their noisy relations.
    ///
    /// # Errors
    ///
    /// Returns an error only for a schema with cyclic base links.
    pub fn observations(&self) -> Result<Vec<Observation>> {
        let mut out = Vec::new();
        for name in base_first_order(&self.schema)? {
            for (items, value, _) in self.relation(&name)?.entries() {
                out.push(Observation::new(name.clone(), items, value));
            }
        }
        Ok(out)
    }
}

impl BaseValues for Irm {
    fn relation_def(&self, name: &str) -> Result<&RelationDef> {
        self.schema
            .get(name)
            .ok_or_else(|| HirmError::UnknownRelation(name.to_string()))
    }

    fn stored_value(&self, name: &str, items: &[Item]) -> Option<Value> {
        self.relations.get(name)?.get(items)
    }

    fn predictive_draw(
        &self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        self.relation(name)?.sample_value(rng, &self.domains, items, base)
    }

    fn incorporate_draw(
        &mut self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        let seated = self.seat_items(rng, name, items)?;
        let result = self.draw_value(rng, name, items, base);
        if result.is_err() {
            self.unseat(seated)?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bernoulli_schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert(
            "R".into(),
            RelationDef::clean(&["D"], "bernoulli".parse().unwrap()),
        );
        schema
    }

    fn noisy_schema(base_observed: bool) -> Schema {
        let mut schema = Schema::new();
        schema.insert(
            "B".into(),
            RelationDef::clean(&["D"], "normal".parse().unwrap()).with_observed(base_observed),
        );
        schema.insert(
            "N".into(),
            RelationDef::noisy(&["D", "E"], "gaussian".parse().unwrap(), "B"),
        );
        schema
    }

    #[test]
    fn test_new_creates_domains() {
        let irm = Irm::new(noisy_schema(true)).unwrap();
        assert_eq!(irm.domains().len(), 2);
        assert!(irm.domain("E").unwrap().is_empty());
        assert!(irm.get_relation("N").is_some());
    }

    #[test]
    fn test_incorporate_and_unincorporate_prunes() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(1);
        irm.incorporate(&mut rng, "R", &[4], true.into()).unwrap();
        assert!(irm.domain("D").unwrap().contains(4));
        assert_eq!(irm.unincorporate("R", &[4]).unwrap(), Value::Bool(true));
        assert!(irm.domain("D").unwrap().is_empty());
        assert!(irm.logp_score().abs() < 1e-12);
    }

    #[test]
    fn test_failed_incorporate_rolls_back_items() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(1);
        assert!(irm.incorporate(&mut rng, "R", &[0], 1.5.into()).is_err());
        assert!(irm.domain("D").unwrap().is_empty());
        assert!(matches!(
            irm.incorporate(&mut rng, "missing", &[0], true.into()),
            Err(HirmError::UnknownRelation(_))
        ));
    }

    #[test]
    fn test_monte_carlo_logp_unseats_every_draw() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(4);
        irm.incorporate(&mut rng, "R", &[0], true.into()).unwrap();
        let batch: Vec<Observation> = (1..11)
            .map(|i| Observation::new("R", vec![i], i % 2 == 0))
            .collect();
        let lp = irm.logp(&mut rng, &batch).unwrap();
        assert!(lp.is_finite() && lp < 0.0);
        let d = irm.domain("D").unwrap();
        assert_eq!(d.items().collect::<Vec<_>>(), vec![0]);
        assert_eq!(d.crp().n(), 1);
    }

    #[test]
    fn test_failed_incorporate_frees_items_for_reuse() {
        let mut schema = Schema::new();
        schema.insert(
            "R".into(),
            RelationDef::clean(&["D", "E"], "categorical(k=3)".parse().unwrap()),
        );
        let mut irm = Irm::new(schema).unwrap();
        let mut rng = Prng::new(2);
        assert!(irm.incorporate(&mut rng, "R", &[0, 5], 7_i64.into()).is_err());
        assert!(irm.domain("D").unwrap().is_empty());
        assert!(irm.domain("E").unwrap().is_empty());
        irm.incorporate(&mut rng, "R", &[0, 5], 2_i64.into()).unwrap();
        assert_eq!(irm.domain("E").unwrap().items().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_logp_single_new_item() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(1);
        let lp = irm
            .logp(&mut rng, &[Observation::new("R", vec![0], true)])
            .unwrap();
        assert!((lp - 0.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_logp_batch_enumerates_seatings() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(1);
        let batch = [
            Observation::new("R", vec![0], true),
            Observation::new("R", vec![1], true),
        ];
        let lp = irm.logp(&mut rng, &batch).unwrap();
        // Shared table: 1/2 * (1/2 * 2/3); separate tables: 1/2 * (1/2 * 1/2).
        assert!((lp - (7.0_f64 / 24.0).ln()).abs() < 1e-12);
        assert!(irm.domain("D").unwrap().is_empty());
        assert!(irm.get_relation("R").unwrap().is_empty());
    }

    #[test]
    fn test_logp_does_not_mutate() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(3);
        for i in 0..5 {
            irm.incorporate(&mut rng, "R", &[i], (i % 2 == 0).into()).unwrap();
        }
        let before = irm.logp_score();
        let snapshot = irm.cluster_assignment();
        let lp = irm
            .logp(
                &mut rng,
                &[
                    Observation::new("R", vec![0], true),
                    Observation::new("R", vec![7], false),
                ],
            )
            .unwrap();
        assert!(lp.is_finite() && lp < 0.0);
        assert!((irm.logp_score() - before).abs() < 1e-9);
        assert_eq!(irm.cluster_assignment(), snapshot);
    }

    #[test]
    fn test_observed_base_must_exist() {
        let mut irm = Irm::new(noisy_schema(true)).unwrap();
        let mut rng = Prng::new(1);
        assert!(matches!(
            irm.incorporate(&mut rng, "N", &[0, 0], 1.0.into()),
            Err(HirmError::MissingBaseValue { .. })
        ));
        irm.incorporate(&mut rng, "B", &[0], 1.0.into()).unwrap();
        irm.incorporate(&mut rng, "N", &[0, 0], 1.2.into()).unwrap();
        assert!(matches!(
            irm.unincorporate("B", &[0]),
            Err(HirmError::HasDependents { .. })
        ));
        assert!(matches!(
            irm.remove_relation("B"),
            Err(HirmError::HasDependents { .. })
        ));
    }

    #[test]
    fn test_latent_base_created_on_demand() {
        let mut irm = Irm::new(noisy_schema(false)).unwrap();
        let mut rng = Prng::new(1);
        irm.incorporate(&mut rng, "N", &[0, 0], 2.0.into()).unwrap();
        irm.incorporate(&mut rng, "N", &[0, 1], 2.5.into()).unwrap();
        assert_eq!(irm.get_relation("B").unwrap().len(), 1);
        irm.transition_latent_values_relation(&mut rng, "B").unwrap();
        let base = irm.get_relation("B").unwrap().get(&[0]).unwrap();
        let (_, stored_base) = irm.get_relation("N").unwrap().entry(&[0, 1]).unwrap();
        assert_eq!(stored_base, Some(base));
    }

    #[test]
    fn test_logp_with_missing_latent_base() {
        let mut irm = Irm::new(noisy_schema(false)).unwrap();
        let mut rng = Prng::new(1);
        let lp = irm
            .logp(&mut rng, &[Observation::new("N", vec![0, 0], 1.0)])
            .unwrap();
        assert!(lp.is_finite());
        assert!(irm.get_relation("B").unwrap().is_empty());
    }

    #[test]
    fn test_gibbs_sweep_preserves_data() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(9);
        for i in 0..20 {
            irm.incorporate(&mut rng, "R", &[i], (i < 10).into()).unwrap();
        }
        for _ in 0..5 {
            irm.transition(&mut rng, &GibbsConfig::default()).unwrap();
        }
        assert_eq!(irm.get_relation("R").unwrap().len(), 20);
        assert_eq!(irm.domain("D").unwrap().len(), 20);
        assert!(irm.logp_score().is_finite());
    }

    #[test]
    fn test_sample_and_incorporate() {
        let mut irm = Irm::new(noisy_schema(false)).unwrap();
        let mut rng = Prng::new(2);
        let samples = irm.sample_and_incorporate(&mut rng, 5).unwrap();
        assert_eq!(samples["N"].len(), 5);
        assert_eq!(irm.get_relation("N").unwrap().len(), 5);
        let bases = samples.get("B").map_or(0, Vec::len);
        assert_eq!(bases, irm.get_relation("B").unwrap().len());
        for (items, value) in &samples["N"] {
            assert_eq!(irm.get_relation("N").unwrap().get(items).as_ref(), Some(value));
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(4);
        for i in 0..12 {
            irm.incorporate(&mut rng, "R", &[i], (i % 3 == 0).into()).unwrap();
        }
        irm.transition(&mut rng, &GibbsConfig::clusters_only()).unwrap();
        let snapshot = irm.cluster_assignment();

        let mut fresh = Irm::new(bernoulli_schema()).unwrap();
        for obs in irm.observations().unwrap() {
            fresh
                .incorporate(&mut rng, &obs.relation, &obs.items, obs.value)
                .unwrap();
        }
        fresh.set_cluster_assignment(&mut rng, &snapshot).unwrap();
        assert_eq!(fresh.cluster_assignment(), snapshot);
        assert!((fresh.logp_score() - irm.logp_score()).abs() < 1e-9);
    }

    #[test]
    fn test_set_cluster_assignment_rejects_partial_snapshot() {
        let mut irm = Irm::new(bernoulli_schema()).unwrap();
        let mut rng = Prng::new(4);
        irm.incorporate(&mut rng, "R", &[0], true.into()).unwrap();
        irm.incorporate(&mut rng, "R", &[1], true.into()).unwrap();
        let mut snapshot = IrmAssignment::default();
        snapshot.domains.entry("D".into()).or_default().insert(0, vec![0]);
        assert!(matches!(
            irm.set_cluster_assignment(&mut rng, &snapshot),
            Err(HirmError::InvalidAssignment(_))
        ));
        assert_eq!(irm.domain("D").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_relation_drops_domains() {
        let mut irm = Irm::new(noisy_schema(true)).unwrap();
        let mut rng = Prng::new(4);
        irm.incorporate(&mut rng, "B", &[0], 0.5.into()).unwrap();
        irm.incorporate(&mut rng, "N", &[0, 3], 0.7.into()).unwrap();
        irm.remove_relation("N").unwrap();
        assert!(irm.domain("E").is_none());
        assert!(irm.domain("D").unwrap().contains(0));
        assert!(irm.add_relation("N2", RelationDef::noisy(&["D"], "gaussian".parse().unwrap(), "Z")).is_err());
    }

    #[test]
    fn test_latent_move_on_observed_skellam_moves_theta() {
        let mut schema = Schema::new();
        schema.insert(
            "S".into(),
            RelationDef::clean(&["D"], "skellam".parse().unwrap()),
        );
        let mut irm = Irm::new(schema).unwrap();
        let mut rng = Prng::new(8);
        for i in 0..10 {
            irm.incorporate(&mut rng, "S", &[i], (i as i64 * 3 - 12).into())
                .unwrap();
        }
        let values: Vec<_> = irm.get_relation("S").unwrap().entries();
        let before = irm.logp_score();
        for _ in 0..20 {
            irm.transition_latent_values_relation(&mut rng, "S").unwrap();
        }
        assert!((irm.logp_score() - before).abs() > 1e-9);
        assert!(irm.logp_score().is_finite());
        assert_eq!(irm.get_relation("S").unwrap().entries(), values);
    }
}
