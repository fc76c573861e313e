//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use hirm::prelude::*;
//! ```

pub use crate::assignment::{HirmAssignment, IrmAssignment};
pub use crate::config::GibbsConfig;
pub use crate::crp::{Crp, Item, Table};
pub use crate::distributions::{DistributionKind, DistributionSpec};
pub use crate::domain::Domain;
pub use crate::emissions::{EmissionKind, EmissionSpec};
pub use crate::error::{HirmError, Result};
pub use crate::hirm::Hirm;
pub use crate::irm::{Irm, Samples};
pub use crate::observation::{Observation, Value, ValueKind};
pub use crate::prng::Prng;
pub use crate::relation::RelationVariant;
pub use crate::schema::{RelationDef, Schema};
