//! Relation definitions and load-time schema checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distributions::DistributionSpec;
use crate::emissions::EmissionSpec;
use crate::error::{HirmError, Result};
use crate::observation::ValueKind;

fn observed_default() -> bool {
    true
}

/// Definition of one relation.
///
/// A clean relation scores values with a distribution. A noisy relation scores
/// them with an emission conditioned on the value of `base` at the noisy
/// relation's leading items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationDef {
    /// Relation scored by a distribution.
    Clean {
        /// Domain of each item position.
        domains: Vec<String>,
        /// Whether values come from data rather than being latent.
        #[serde(default = "observed_default")]
        is_observed: bool,
        /// Model of the values.
        distribution: DistributionSpec,
    },
    /// Relation scored by an emission on a base relation's value.
    Noisy {
        /// Domain of each item position; starts with the base's domains.
        domains: Vec<String>,
        /// Whether values come from data rather than being latent.
        #[serde(default = "observed_default")]
        is_observed: bool,
        /// Corruption model.
        emission: EmissionSpec,
        /// Name of the base relation.
        base: String,
    },
}

impl RelationDef {
    /// Observed clean relation.
    #[must_use]
    pub fn clean(domains: &[&str], distribution: DistributionSpec) -> Self {
        Self::Clean {
            domains: domains.iter().map(|d| (*d).to_string()).collect(),
            is_observed: true,
            distribution,
        }
    }

    /// Observed noisy relation over `base`.
    #[must_use]
    pub fn noisy(domains: &[&str], emission: EmissionSpec, base: &str) -> Self {
        Self::Noisy {
            domains: domains.iter().map(|d| (*d).to_string()).collect(),
            is_observed: true,
            emission,
            base: base.to_string(),
        }
    }

    /// Set whether the relation is observed.
    #[must_use]
    pub fn with_observed(mut self, observed: bool) -> Self {
        match &mut self {
            Self::Clean { is_observed, .. } | Self::Noisy { is_observed, .. } => {
                *is_observed = observed;
            }
        }
        self
    }

    /// Domain of each item position.
    #[must_use]
    pub fn domains(&self) -> &[String] {
        match self {
            Self::Clean { domains, .. } | Self::Noisy { domains, .. } => domains,
        }
    }

    /// Whether values come from data.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        match self {
            Self::Clean { is_observed, .. } | Self::Noisy { is_observed, .. } => *is_observed,
        }
    }

    /// Base relation name for noisy relations.
    #[must_use]
    pub fn base(&self) -> Option<&str> {
        match self {
            Self::Clean { .. } => None,
            Self::Noisy { base, .. } => Some(base),
        }
    }

    /// Type of the relation's values.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::Clean { distribution, .. } => distribution.value_kind(),
            Self::Noisy { emission, .. } => emission.value_kind(),
        }
    }
}

/// Relation name to definition.
pub type Schema = BTreeMap<String, RelationDef>;

/// Check a relation definition against the relations already in `schema`.
///
/// # Errors
///
/// Returns [`HirmError::InvalidSchema`] when the domain list is empty, or for
/// a noisy relation whose base is missing, whose leading domains differ from
/// the base's, or whose value type differs from the base's.
pub fn validate_relation(schema: &Schema, name: &str, def: &RelationDef) -> Result<()> {
    if def.domains().is_empty() {
        return Err(HirmError::InvalidSchema(format!(
            "relation {name} has no domains"
        )));
    }
    let Some(base_name) = def.base() else {
        return Ok(());
    };
    let base = schema.get(base_name).ok_or_else(|| {
        HirmError::InvalidSchema(format!("relation {name} has unknown base {base_name}"))
    })?;
    let base_domains = base.domains();
    if def.domains().len() < base_domains.len()
        || &def.domains()[..base_domains.len()] != base_domains
    {
        return Err(HirmError::InvalidSchema(format!(
            "domains {:?} of noisy relation {name} do not start with domains {:?} of base {base_name}",
            def.domains(),
            base_domains
        )));
    }
    if def.value_kind() != base.value_kind() {
        return Err(HirmError::InvalidSchema(format!(
            "noisy relation {name} holds {:?} values but base {base_name} holds {:?}",
            def.value_kind(),
            base.value_kind()
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(usize),
}

/// Depth of each relation in the base graph, memoized across calls.
fn base_depth(
    schema: &Schema,
    name: &str,
    memo: &mut BTreeMap<String, Visit>,
) -> Result<usize> {
    match memo.get(name) {
        Some(Visit::Done(depth)) => return Ok(*depth),
        Some(Visit::InProgress) => {
            return Err(HirmError::InvalidSchema(format!(
                "relation {name} is its own base"
            )))
        }
        None => {}
    }
    memo.insert(name.to_string(), Visit::InProgress);
    let depth = match schema.get(name).and_then(RelationDef::base) {
        Some(base) => base_depth(schema, base, memo)? + 1,
        None => 0,
    };
    memo.insert(name.to_string(), Visit::Done(depth));
    Ok(depth)
}

/// Check every relation of `schema`, including acyclicity of base links.
///
/// # Errors
///
/// Returns [`HirmError::InvalidSchema`] describing the first problem found.
pub fn validate_schema(schema: &Schema) -> Result<()> {
    for (name, def) in schema {
        validate_relation(schema, name, def)?;
    }
    base_first_order(schema).map(|_| ())
}

/// Relation names ordered so that every base precedes its noisy relations.
///
/// # Errors
///
/// Returns [`HirmError::InvalidSchema`] if base links form a cycle.
pub fn base_first_order(schema: &Schema) -> Result<Vec<String>> {
    let mut memo = BTreeMap::new();
    let mut ordered = Vec::with_capacity(schema.len());
    for name in schema.keys() {
        ordered.push((base_depth(schema, name, &mut memo)?, name.clone()));
    }
    ordered.sort();
    Ok(ordered.into_iter().map(|(_, name)| name).collect())
}

/// Noisy relations whose base is `name`.
#[must_use]
pub fn dependents(schema: &Schema, name: &str) -> Vec<String> {
    schema
        .iter()
        .filter(|(_, def)| def.base() == Some(name))
        .map(|(n, _)| n.clone())
        .collect()
}
