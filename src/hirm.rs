//! Hierarchical IRM: a CRP over relations, one [`Irm`] per relation cluster.
//!
//! Relations in the same cluster share domain clusterings. A noisy relation and
//! its base may sit in different clusters; base values are looked up across
//! IRMs.
//!
//! # Example
//!
//! ```
//! use hirm::prelude::*;
//!
//! let mut schema = Schema::new();
//! schema.insert(
//!     "R1".to_string(),
//!     RelationDef::clean(&["D1", "D2"], "bernoulli".parse().unwrap()),
//! );
//! schema.insert(
//!     "R2".to_string(),
//!     RelationDef::clean(&["D1"], "normal".parse().unwrap()),
//! );
//! let mut hirm = Hirm::new(schema).unwrap();
//! let mut rng = Prng::new(0);
//! hirm.incorporate(&mut rng, "R1", &[0, 1], true.into()).unwrap();
//! hirm.incorporate(&mut rng, "R2", &[0], 1.5.into()).unwrap();
//! hirm.transition(&mut rng, &GibbsConfig::default()).unwrap();
//! assert_eq!(hirm.irms().len(), hirm.crp().tables().len());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::assignment::HirmAssignment;
use crate::config::{GibbsConfig, DEFAULT_THETA_STEPS};
use crate::crp::{Crp, Item, Table};
use crate::error::{HirmError, Result};
use crate::irm::{ensure_base, resolve_batch_bases, BaseValues, Irm, Samples};
use crate::math::log_choice;
use crate::observation::{Observation, Value};
use crate::prng::Prng;
use crate::relation::latent;
use crate::relation::{Items, RelationVariant};
use crate::schema::{base_first_order, dependents, validate_relation, validate_schema, RelationDef, Schema};

/// Relations clustered by a CRP, each cluster modeled by its own IRM.
#[derive(Debug, Clone)]
pub struct Hirm {
    schema: Schema,
    crp: Crp,
    irms: BTreeMap<Table, Irm>,
    relation_to_code: BTreeMap<String, Item>,
    code_to_relation: BTreeMap<Item, String>,
    next_code: Item,
}

impl Hirm {
    /// Model over `schema` with every relation in its own cluster.
    ///
    /// # Errors
    ///
    /// Returns [`HirmError::InvalidSchema`] if the schema fails validation.
    pub fn new(schema: Schema) -> Result<Self> {
        validate_schema(&schema)?;
        let mut hirm = Self {
            schema: Schema::new(),
            crp: Crp::new(),
            irms: BTreeMap::new(),
            relation_to_code: BTreeMap::new(),
            code_to_relation: BTreeMap::new(),
            next_code: 0,
        };
        for name in base_first_order(&schema)? {
            if let Some(def) = schema.get(&name) {
                let table = hirm.crp.new_table();
                hirm.place_relation(&name, def.clone(), table)?;
            }
        }
        Ok(hirm)
    }

    /// Relation definitions.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The CRP over relation codes.
    #[must_use]
    pub fn crp(&self) -> &Crp {
        &self.crp
    }

    /// IRM of every relation cluster.
    #[must_use]
    pub fn irms(&self) -> &BTreeMap<Table, Irm> {
        &self.irms
    }

    /// Code of `relation` in the relation CRP.
    #[must_use]
    pub fn relation_code(&self, relation: &str) -> Option<Item> {
        self.relation_to_code.get(relation).copied()
    }

    /// Relation with the given code.
    #[must_use]
    pub fn code_relation(&self, code: Item) -> Option<&str> {
        self.code_to_relation.get(&code).map(String::as_str)
    }

    /// Cluster holding `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`HirmError::UnknownRelation`] if no such relation exists.
    pub fn relation_to_table(&self, relation: &str) -> Result<Table> {
        self.relation_to_code
            .get(relation)
            .and_then(|&code| self.crp.table_of(code))
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))
    }

    /// IRM holding `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`HirmError::UnknownRelation`] if no such relation exists.
    pub fn relation_to_irm(&self, relation: &str) -> Result<&Irm> {
        let table = self.relation_to_table(relation)?;
        self.irms
            .get(&table)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))
    }

    fn relation_to_irm_mut(&mut self, relation: &str) -> Result<&mut Irm> {
        let table = self.relation_to_table(relation)?;
        self.irms
            .get_mut(&table)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))
    }

    /// Relation by name.
    #[must_use]
    pub fn get_relation(&self, name: &str) -> Option<&RelationVariant> {
        self.relation_to_irm(name).ok()?.get_relation(name)
    }

    fn place_relation(&mut self, name: &str, def: RelationDef, table: Table) -> Result<()> {
        let code = self.next_code;
        self.irms
            .entry(table)
            .or_insert_with(Irm::empty)
            .insert_relation(name, def.clone())?;
        self.crp.incorporate(code, table)?;
        self.next_code += 1;
        self.relation_to_code.insert(name.to_string(), code);
        self.code_to_relation.insert(code, name.to_string());
        self.schema.insert(name.to_string(), def);
        Ok(())
    }

    /// Add an empty relation in a new cluster of its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the definition does not fit
    /// the schema.
    pub fn add_relation(&mut self, name: &str, def: RelationDef) -> Result<()> {
        let table = self.crp.new_table();
        self.add_relation_to(name, def, table)
    }

    /// Add an empty relation to cluster `table`, creating the cluster if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the definition does not fit
    /// the schema.
    pub fn add_relation_to(&mut self, name: &str, def: RelationDef, table: Table) -> Result<()> {
        if self.schema.contains_key(name) {
            return Err(HirmError::DuplicateRelation(name.to_string()));
        }
        validate_relation(&self.schema, name, &def)?;
        self.place_relation(name, def, table)?;
        tracing::debug!(relation = name, table, "added relation");
        Ok(())
    }

    /// Delete a relation and its data, dropping its IRM if left empty.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation or the base of another
    /// relation.
    pub fn remove_relation(&mut self, name: &str) -> Result<()> {
        if let Some(dependent) = dependents(&self.schema, name).into_iter().next() {
            return Err(HirmError::HasDependents {
                relation: name.to_string(),
                dependent,
            });
        }
        let table = self.relation_to_table(name)?;
        self.relation_to_irm_mut(name)?.take_relation(name)?;
        if let Some(code) = self.relation_to_code.remove(name) {
            self.code_to_relation.remove(&code);
            self.crp.unincorporate(code)?;
        }
        self.schema.remove(name);
        self.drop_if_empty(table);
        tracing::debug!(relation = name, "removed relation");
        Ok(())
    }

    fn drop_if_empty(&mut self, table: Table) {
        if self.irms.get(&table).is_some_and(Irm::is_empty) {
            self.irms.remove(&table);
            tracing::debug!(table, "destroyed empty IRM");
        }
    }

    /// Record `value` at `items` of `relation`.
    ///
    /// Noisy relations condition on their base value, which may live in
    /// another cluster; a missing value of an unobserved base is drawn first.
    ///
    /// # Errors
    ///
    /// See [`Irm::incorporate`].
    pub fn incorporate(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        items: &[Item],
        value: Value,
    ) -> Result<()> {
        let mut created = Vec::new();
        let base = ensure_base(self, rng, relation, items, false, &mut created)?;
        self.relation_to_irm_mut(relation)?
            .incorporate_with_base(rng, relation, items, &value, base.as_ref())
    }

    /// Remove the observation at `items` of `relation`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is stored there or noisy observations
    /// condition on the value.
    pub fn unincorporate(&mut self, relation: &str, items: &[Item]) -> Result<Value> {
        for dep in dependents(&self.schema, relation) {
            let observed = self
                .get_relation(&dep)
                .is_some_and(|r| !r.tuples_with_prefix(items).is_empty());
            if observed {
                return Err(HirmError::HasDependents {
                    relation: relation.to_string(),
                    dependent: dep,
                });
            }
        }
        self.relation_to_irm_mut(relation)?
            .remove_observation(relation, items)
            .map(|(value, _)| value)
    }

    /// Relation CRP score plus every IRM's score.
    #[must_use]
    pub fn logp_score(&self) -> f64 {
        self.crp.logp_score() + self.irms.values().map(Irm::logp_score).sum::<f64>()
    }

    /// Joint log-probability of a batch of observations, leaving the model as
    /// it was. Each cluster scores its own relations' observations.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown relations, wrong arity or value types.
    pub fn logp(&mut self, rng: &mut Prng, observations: &[Observation]) -> Result<f64> {
        let bases = resolve_batch_bases(&*self, rng, observations)?;
        let mut by_table: BTreeMap<Table, Vec<(Observation, Option<Value>)>> = BTreeMap::new();
        for (obs, base) in observations.iter().zip(bases) {
            let table = self.relation_to_table(&obs.relation)?;
            by_table.entry(table).or_default().push((obs.clone(), base));
        }
        let mut total = 0.0;
        for (table, batch) in by_table {
            if let Some(irm) = self.irms.get_mut(&table) {
                total += irm.logp_resolved(rng, &batch)?;
            }
        }
        Ok(total)
    }

    fn stored_entries(&self, relation: &str) -> Result<Vec<(Items, Value, Option<Value>)>> {
        self.get_relation(relation)
            .map(RelationVariant::entries)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))
    }

    /// Add `relation` with `entries` to `irm`, returning the relation's score there.
    fn score_in(
        irm: &mut Irm,
        rng: &mut Prng,
        relation: &str,
        def: &RelationDef,
        entries: &[(Items, Value, Option<Value>)],
    ) -> Result<f64> {
        irm.insert_relation(relation, def.clone())?;
        for (items, value, base) in entries {
            irm.incorporate_with_base(rng, relation, items, value, base.as_ref())?;
        }
        Ok(irm
            .get_relation(relation)
            .map_or(0.0, RelationVariant::logp_score))
    }

    /// Gibbs move of one relation between clusters.
    ///
    /// Each candidate cluster is scored by its CRP weight and the relation's
    /// score after its data is incorporated there.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation.
    pub fn transition_cluster_assignment_relation(&mut self, rng: &mut Prng, relation: &str) -> Result<()> {
        let current = self.relation_to_table(relation)?;
        let code = self.relation_to_code[relation];
        let def = self.schema[relation].clone();
        let entries = self.stored_entries(relation)?;
        let weights = self.crp.tables_weights_gibbs(current)?;

        let tables: Vec<Table> = weights.keys().copied().collect();
        let mut logps = Vec::with_capacity(tables.len());
        let mut aux = None;
        for (&table, weight) in &weights {
            let score = if table == current {
                self.get_relation(relation)
                    .map_or(0.0, RelationVariant::logp_score)
            } else if let Some(irm) = self.irms.get_mut(&table) {
                Self::score_in(irm, rng, relation, &def, &entries)?
            } else {
                let mut irm = Irm::empty();
                let score = Self::score_in(&mut irm, rng, relation, &def, &entries)?;
                aux = Some(irm);
                score
            };
            logps.push(weight.ln() + score);
        }
        let chosen = tables[log_choice(&logps, rng)];

        for &table in &tables {
            if table == chosen || table == current {
                continue;
            }
            if let Some(irm) = self.irms.get_mut(&table) {
                irm.take_relation(relation)?;
            }
        }
        if chosen == current {
            return Ok(());
        }
        if let Some(irm) = aux.filter(|_| !self.irms.contains_key(&chosen)) {
            self.irms.insert(chosen, irm);
        }
        if let Some(irm) = self.irms.get_mut(&current) {
            irm.take_relation(relation)?;
        }
        self.crp.unincorporate(code)?;
        self.crp.incorporate(code, chosen)?;
        self.drop_if_empty(current);
        tracing::debug!(relation, from = current, to = chosen, "moved relation");
        Ok(())
    }

    /// Move `relation` and its data to cluster `table`, or to a new cluster
    /// when `table` is `None`.
    ///
    /// Items keep their clusters in the target IRM when it already holds them,
    /// and are seated by its CRPs otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation.
    pub fn set_cluster_assignment_gibbs(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        table: Option<Table>,
    ) -> Result<()> {
        let target = table.unwrap_or_else(|| self.crp.new_table());
        self.move_relation(rng, relation, target)
    }

    fn move_relation(&mut self, rng: &mut Prng, relation: &str, target: Table) -> Result<()> {
        let current = self.relation_to_table(relation)?;
        if current == target {
            return Ok(());
        }
        let code = self.relation_to_code[relation];
        let (def, moved) = self.relation_to_irm_mut(relation)?.take_relation(relation)?;
        let irm = self.irms.entry(target).or_insert_with(|| {
            tracing::debug!(table = target, "created IRM");
            Irm::empty()
        });
        irm.insert_relation(relation, def)?;
        for (items, value, base) in moved.entries() {
            irm.incorporate_with_base(rng, relation, &items, &value, base.as_ref())?;
        }
        self.crp.unincorporate(code)?;
        self.crp.incorporate(code, target)?;
        self.drop_if_empty(current);
        tracing::debug!(relation, from = current, to = target, "moved relation");
        Ok(())
    }

    /// One Gibbs sweep over every relation's cluster, then over every item of
    /// every IRM.
    ///
    /// # Errors
    ///
    /// Returns an error only if internal indexes disagree.
    pub fn transition_cluster_assignments_all(&mut self, rng: &mut Prng) -> Result<()> {
        self.transition_relation_clusters(rng)?;
        self.transition_domain_clusters(rng)
    }

    fn transition_relation_clusters(&mut self, rng: &mut Prng) -> Result<()> {
        let names: Vec<String> = self.schema.keys().cloned().collect();
        for name in names {
            self.transition_cluster_assignment_relation(rng, &name)?;
        }
        Ok(())
    }

    fn transition_domain_clusters(&mut self, rng: &mut Prng) -> Result<()> {
        for irm in self.irms.values_mut() {
            irm.transition_cluster_assignments_all(rng)?;
        }
        Ok(())
    }

    /// Resample the values of an unobserved relation given its noisy
    /// dependents, wherever they are clustered, then move the latent
    /// parameters of its non-conjugate cells. Observed relations only take the
    /// parameter moves.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown relation.
    pub fn transition_latent_values_relation(&mut self, rng: &mut Prng, relation: &str) -> Result<()> {
        self.transition_latent_values_relation_steps(rng, relation, DEFAULT_THETA_STEPS)
    }

    fn transition_latent_values_relation_steps(
        &mut self,
        rng: &mut Prng,
        relation: &str,
        theta_steps: usize,
    ) -> Result<()> {
        let def = self
            .schema
            .get(relation)
            .ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?;
        if def.is_observed() {
            tracing::debug!(relation, "observed relation, moving parameters only");
            return self
                .relation_to_irm_mut(relation)?
                .transition_relation_thetas(rng, relation, theta_steps);
        }
        let deps: BTreeSet<String> = dependents(&self.schema, relation).into_iter().collect();
        let mut base = None;
        let mut noisy = Vec::with_capacity(deps.len());
        for irm in self.irms.values_mut() {
            for (name, scoped) in irm.scoped_mut(|n| n == relation || deps.contains(n)) {
                if name == relation {
                    base = Some(scoped);
                } else {
                    noisy.push(scoped);
                }
            }
        }
        let base = base.ok_or_else(|| HirmError::UnknownRelation(relation.to_string()))?;
        latent::transition_latent_values(rng, base, noisy, theta_steps)
    }

    /// One inference step running the kernels enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error only if internal indexes disagree.
    pub fn transition(&mut self, rng: &mut Prng, config: &GibbsConfig) -> Result<()> {
        if config.relation_clusters {
            self.transition_relation_clusters(rng)?;
        }
        if config.domain_clusters {
            self.transition_domain_clusters(rng)?;
        }
        if config.hyperparameters {
            for irm in self.irms.values_mut() {
                irm.transition_cluster_hparams(rng, config.theta_steps);
            }
        }
        if config.crp_alphas {
            self.crp.transition_alpha(rng);
            for irm in self.irms.values_mut() {
                irm.transition_crp_alphas(rng);
            }
        }
        if config.latent_values {
            for name in base_first_order(&self.schema)? {
                self.transition_latent_values_relation_steps(rng, &name, config.theta_steps)?;
            }
        }
        Ok(())
    }

    /// Draw `n` new observations for every observed relation and store them.
    ///
    /// # Errors
    ///
    /// Returns an error only if internal indexes disagree.
    pub fn sample_and_incorporate(&mut self, rng: &mut Prng, n: usize) -> Result<Samples> {
        let mut samples = Samples::new();
        for name in base_first_order(&self.schema)? {
            if !self.schema[&name].is_observed() {
                continue;
            }
            for _ in 0..n {
                let items = self.relation_to_irm_mut(&name)?.draw_tuple(rng, &name)?;
                let mut created = Vec::new();
                let base = ensure_base(self, rng, &name, &items, true, &mut created)?;
                for obs in created {
                    samples.entry(obs.relation).or_default().push((obs.items, obs.value));
                }
                let value = self
                    .relation_to_irm_mut(&name)?
                    .draw_value(rng, &name, &items, base.as_ref())?;
                samples.entry(name.clone()).or_default().push((items, value));
            }
        }
        Ok(samples)
    }

    /// Current relation partition and every IRM's domain partitions.
    #[must_use]
    pub fn cluster_assignment(&self) -> HirmAssignment {
        HirmAssignment {
            relations: self
                .crp
                .tables()
                .iter()
                .map(|(table, codes)| {
                    let names = codes
                        .iter()
                        .filter_map(|c| self.code_to_relation.get(c).cloned())
                        .collect();
                    (*table, names)
                })
                .collect(),
            irms: self
                .irms
                .iter()
                .map(|(table, irm)| (*table, irm.cluster_assignment()))
                .collect(),
        }
    }

    /// Move every relation and item to the clusters `assignment` gives.
    ///
    /// # Errors
    ///
    /// Returns an error, before moving anything, if the snapshot misses a
    /// relation, lists one twice, or names an unknown one.
    pub fn set_cluster_assignment(&mut self, rng: &mut Prng, assignment: &HirmAssignment) -> Result<()> {
        let mut seen = BTreeSet::new();
        for name in assignment.relations.values().flatten() {
            if !self.schema.contains_key(name) {
                return Err(HirmError::UnknownRelation(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(HirmError::InvalidAssignment(format!(
                    "relation {name} is listed twice"
                )));
            }
        }
        if let Some(missing) = self.schema.keys().find(|n| !seen.contains(n.as_str())) {
            return Err(HirmError::InvalidAssignment(format!(
                "relation {missing} has no table"
            )));
        }
        for (&table, names) in &assignment.relations {
            for name in names {
                self.move_relation(rng, name, table)?;
            }
        }
        for (table, irm_assignment) in &assignment.irms {
            if let Some(irm) = self.irms.get_mut(table) {
                irm.set_cluster_assignment(rng, irm_assignment)?;
            }
        }
        Ok(())
    }

    /// Every stored value, bases before their noisy relations.
    ///
    /// # Errors
    ///
    /// Returns an error only if internal indexes disagree.
    pub fn observations(&self) -> Result<Vec<Observation>> {
        let mut out = Vec::new();
        for name in base_first_order(&self.schema)? {
            for (items, value, _) in self.stored_entries(&name)? {
                out.push(Observation::new(name.clone(), items, value));
            }
        }
        Ok(out)
    }
}

impl BaseValues for Hirm {
    fn relation_def(&self, name: &str) -> Result<&RelationDef> {
        self.schema
            .get(name)
            .ok_or_else(|| HirmError::UnknownRelation(name.to_string()))
    }

    fn stored_value(&self, name: &str, items: &[Item]) -> Option<Value> {
        self.get_relation(name)?.get(items)
    }

    fn predictive_draw(
        &self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        self.relation_to_irm(name)?.predictive_draw(rng, name, items, base)
    }

    fn incorporate_draw(
        &mut self,
        rng: &mut Prng,
        name: &str,
        items: &[Item],
        base: Option<&Value>,
    ) -> Result<Value> {
        self.relation_to_irm_mut(name)?
            .incorporate_draw(rng, name, items, base)
    }
}
