//! Error types for model construction and inference.
//!
//! Every failure here signals a corrupt static model (bad spec, schema,
//! snapshot) or a misuse of the incorporate/unincorporate protocol. Callers
//! are expected to abort on these; the crate itself never exits the process.

use crate::crp::{Item, Table};
use crate::observation::ValueKind;
use thiserror::Error;

/// Main error type for model operations.
///
/// # Examples
///
/// ```
/// use hirm::error::HirmError;
///
/// let err = HirmError::UnknownRelation("R9".to_string());
/// assert!(err.to_string().contains("R9"));
/// ```
#[derive(Debug, Error)]
pub enum HirmError {
    /// A `name(arg=val,...)` spec string could not be parsed.
    #[error("Invalid spec '{spec}': {reason}")]
    InvalidSpec {
        /// The offending spec string
        spec: String,
        /// What is wrong with it
        reason: String,
    },

    /// Distribution name not in the fixed family.
    #[error("Unknown distribution name: {0}")]
    UnknownDistribution(String),

    /// Emission name not in the fixed family.
    #[error("Unknown emission name: {0}")]
    UnknownEmission(String),

    /// Invalid hyperparameter value provided.
    #[error("Invalid hyperparameter: {param} = {value}, expected {constraint}")]
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Schema fails a load-time check.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Relation name not present in the model.
    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    /// Relation name already present in the model.
    #[error("Relation already exists: {0}")]
    DuplicateRelation(String),

    /// Domain name not present in the model.
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// Item inserted twice into one CRP.
    #[error("Item {item} is already assigned to table {table}")]
    DuplicateItem {
        /// Item id
        item: Item,
        /// Its current table
        table: Table,
    },

    /// Item removed from (or looked up in) a CRP that does not hold it.
    #[error("Item {0} is not incorporated")]
    MissingItem(Item),

    /// Table requested that the CRP does not hold.
    #[error("Table {0} does not exist")]
    MissingTable(Table),

    /// Item tuple has the wrong length for the relation.
    #[error("Relation {relation} takes {expected} items, got {actual}")]
    ArityMismatch {
        /// Relation name
        relation: String,
        /// Number of domains of the relation
        expected: usize,
        /// Number of items provided
        actual: usize,
    },

    /// Value of the wrong type for the relation.
    #[error("Relation {relation} holds {expected:?} values, got {actual:?}")]
    TypeMismatch {
        /// Relation name
        relation: String,
        /// Expected value kind
        expected: ValueKind,
        /// Provided value kind
        actual: ValueKind,
    },

    /// Item tuple already observed in the relation.
    #[error("Relation {relation} already has an observation at {items:?}")]
    DuplicateObservation {
        /// Relation name
        relation: String,
        /// Item tuple
        items: Vec<Item>,
    },

    /// Item tuple not observed in the relation.
    #[error("Relation {relation} has no observation at {items:?}")]
    MissingObservation {
        /// Relation name
        relation: String,
        /// Item tuple
        items: Vec<Item>,
    },

    /// Value outside the support of the relation's distribution.
    #[error("Value {value} has zero probability under relation {relation}")]
    UnsupportedValue {
        /// Relation name
        relation: String,
        /// Formatted value
        value: String,
    },

    /// Noisy observation without a value of its base relation to condition on.
    #[error("No base value of {base} at {items:?} is available")]
    MissingBaseValue {
        /// Base relation name
        base: String,
        /// Base item tuple
        items: Vec<Item>,
    },

    /// Operation would orphan noisy observations that condition on a value.
    #[error("Relation {relation} is the base of {dependent}")]
    HasDependents {
        /// Base relation name
        relation: String,
        /// A dependent noisy relation
        dependent: String,
    },

    /// Cluster-assignment snapshot does not fit the model.
    #[error("Invalid cluster assignment: {0}")]
    InvalidAssignment(String),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse config TOML: {0}")]
    Config(#[from] toml::de::Error),

    /// Failed to read a configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for results with `HirmError`.
pub type Result<T> = std::result::Result<T, HirmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = HirmError::ArityMismatch {
            relation: "R1".to_string(),
            expected: 2,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("R1"));
        assert!(msg.contains('2'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_duplicate_item_message() {
        let err = HirmError::DuplicateItem { item: 7, table: 1 };
        assert_eq!(err.to_string(), "Item 7 is already assigned to table 1");
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = HirmError::TypeMismatch {
            relation: "R".to_string(),
            expected: ValueKind::Bool,
            actual: ValueKind::Real,
        };
        assert!(err.to_string().contains("Bool"));
        assert!(err.to_string().contains("Real"));
    }

    #[test]
    fn test_toml_error_converts() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("= nope");
        let err: HirmError = parse.expect_err("invalid toml").into();
        assert!(matches!(err, HirmError::Config(_)));
    }
}
