//! Observed values and the mapping from value types to their models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::distributions::{
    BoolDistribution, Distribution, DistributionVariant, IntDistribution, RealDistribution,
    TextDistribution,
};
use crate::emissions::{
    BoolEmission, Emission, EmissionVariant, IntEmission, RealEmission, TextEmission,
};
use crate::crp::Item;
use crate::relation::{Relation, RelationVariant};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Real,
    /// UTF-8 string
    Text,
}

/// One observed or latent value of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Real value.
    Real(f64),
    /// String value.
    Text(String),
}

impl Value {
    /// Type tag of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Real(_) => ValueKind::Real,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Self::Int(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Real(x)
    }
}

impl From<String> for Value {
    fn from(x: String) -> Self {
        Self::Text(x)
    }
}

impl From<&str> for Value {
    fn from(x: &str) -> Self {
        Self::Text(x.to_string())
    }
}

/// One `(relation, items, value)` element of an observation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Relation name.
    pub relation: String,
    /// One item per domain of the relation.
    pub items: Vec<Item>,
    /// Observed value.
    pub value: Value,
}

impl Observation {
    /// Bundle an observation.
    pub fn new(relation: impl Into<String>, items: Vec<Item>, value: impl Into<Value>) -> Self {
        Self {
            relation: relation.into(),
            items,
            value: value.into(),
        }
    }
}

/// Ties a Rust value type to the model families defined over it.
pub trait ObservationType: Clone + PartialEq + fmt::Debug + fmt::Display + Sized {
    /// Sum type of distributions over this type.
    type Dist: Distribution<Self> + Clone + fmt::Debug;
    /// Sum type of emissions over this type.
    type Emit: Emission<Self> + Clone + fmt::Debug;

    /// Type tag.
    const KIND: ValueKind;

    /// Extract from a [`Value`] of the matching kind.
    fn from_value(value: &Value) -> Option<Self>;

    /// Wrap into a [`Value`].
    fn into_value(self) -> Value;

    /// Unwrap a distribution built for this type.
    fn distribution(variant: DistributionVariant) -> Option<Self::Dist>;

    /// Unwrap an emission built for this type.
    fn emission(variant: EmissionVariant) -> Option<Self::Emit>;

    /// Every possible value, for finite types.
    fn support() -> Option<Vec<Self>> {
        None
    }

    /// Borrow a relation over this type out of a variant.
    fn relation(variant: &RelationVariant) -> Option<&Relation<Self>>;

    /// Mutably borrow a relation over this type out of a variant.
    fn relation_mut(variant: &mut RelationVariant) -> Option<&mut Relation<Self>>;
}

impl ObservationType for bool {
    type Dist = BoolDistribution;
    type Emit = BoolEmission;
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn distribution(variant: DistributionVariant) -> Option<Self::Dist> {
        match variant {
            DistributionVariant::Bool(d) => Some(d),
            _ => None,
        }
    }

    fn emission(variant: EmissionVariant) -> Option<Self::Emit> {
        match variant {
            EmissionVariant::Bool(e) => Some(e),
            _ => None,
        }
    }

    fn support() -> Option<Vec<Self>> {
        Some(vec![false, true])
    }

    fn relation(variant: &RelationVariant) -> Option<&Relation<Self>> {
        match variant {
            RelationVariant::Bool(r) => Some(r),
            _ => None,
        }
    }

    fn relation_mut(variant: &mut RelationVariant) -> Option<&mut Relation<Self>> {
        match variant {
            RelationVariant::Bool(r) => Some(r),
            _ => None,
        }
    }
}

impl ObservationType for i64 {
    type Dist = IntDistribution;
    type Emit = IntEmission;
    const KIND: ValueKind = ValueKind::Int;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn distribution(variant: DistributionVariant) -> Option<Self::Dist> {
        match variant {
            DistributionVariant::Int(d) => Some(d),
            _ => None,
        }
    }

    fn emission(_variant: EmissionVariant) -> Option<Self::Emit> {
        None
    }

    fn relation(variant: &RelationVariant) -> Option<&Relation<Self>> {
        match variant {
            RelationVariant::Int(r) => Some(r),
            _ => None,
        }
    }

    fn relation_mut(variant: &mut RelationVariant) -> Option<&mut Relation<Self>> {
        match variant {
            RelationVariant::Int(r) => Some(r),
            _ => None,
        }
    }
}

impl ObservationType for f64 {
    type Dist = RealDistribution;
    type Emit = RealEmission;
    const KIND: ValueKind = ValueKind::Real;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Real(self)
    }

    fn distribution(variant: DistributionVariant) -> Option<Self::Dist> {
        match variant {
            DistributionVariant::Real(d) => Some(d),
            _ => None,
        }
    }

    fn emission(variant: EmissionVariant) -> Option<Self::Emit> {
        match variant {
            EmissionVariant::Real(e) => Some(e),
            _ => None,
        }
    }

    fn relation(variant: &RelationVariant) -> Option<&Relation<Self>> {
        match variant {
            RelationVariant::Real(r) => Some(r),
            _ => None,
        }
    }

    fn relation_mut(variant: &mut RelationVariant) -> Option<&mut Relation<Self>> {
        match variant {
            RelationVariant::Real(r) => Some(r),
            _ => None,
        }
    }
}

impl ObservationType for String {
    type Dist = TextDistribution;
    type Emit = TextEmission;
    const KIND: ValueKind = ValueKind::Text;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn distribution(variant: DistributionVariant) -> Option<Self::Dist> {
        match variant {
            DistributionVariant::Text(d) => Some(d),
            _ => None,
        }
    }

    fn emission(variant: EmissionVariant) -> Option<Self::Emit> {
        match variant {
            EmissionVariant::Text(e) => Some(e),
            _ => None,
        }
    }

    fn relation(variant: &RelationVariant) -> Option<&Relation<Self>> {
        match variant {
            RelationVariant::Text(r) => Some(r),
            _ => None,
        }
    }

    fn relation_mut(variant: &mut RelationVariant) -> Option<&mut Relation<Self>> {
        match variant {
            RelationVariant::Text(r) => Some(r),
            _ => None,
        }
    }
}
