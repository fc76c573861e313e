//! Hirm: hierarchical infinite relational models in pure Rust.
//!
//! Entities of every domain are clustered by Chinese restaurant processes,
//! and each relation is modeled per cluster tuple by a conjugate or
//! non-conjugate distribution. A hierarchical model additionally clusters
//! the relations themselves, one IRM per relation cluster. Inference is
//! collapsed Gibbs sampling.
//!
//! # Quick Start
//!
//! ```
//! use hirm::prelude::*;
//!
//! let mut schema = Schema::new();
//! schema.insert(
//!     "likes".to_string(),
//!     RelationDef::clean(&["person", "movie"], "bernoulli".parse().unwrap()),
//! );
//! let mut irm = Irm::new(schema).unwrap();
//! let mut rng = Prng::new(42);
//!
//! irm.incorporate(&mut rng, "likes", &[0, 0], true.into()).unwrap();
//! irm.incorporate(&mut rng, "likes", &[1, 0], false.into()).unwrap();
//! irm.transition(&mut rng, &GibbsConfig::default()).unwrap();
//!
//! let lp = irm
//!     .logp(&mut rng, &[Observation::new("likes", vec![2, 0], true)])
//!     .unwrap();
//! assert!(lp < 0.0);
//! ```
//!
//! # Modules
//!
//! - [`crp`]: Chinese restaurant process over integer items
//! - [`distributions`]: Per-cell distributions (conjugate and sampled)
//! - [`emissions`]: Noise models linking a clean value to a dirty one
//! - [`schema`]: Relation definitions and schema validation
//! - [`domain`]: A named set of items with its CRP
//! - [`relation`]: Observations of one relation grouped into cells
//! - [`irm`]: Infinite relational model
//! - [`hirm`]: Hierarchical IRM with a CRP over relations
//! - [`assignment`]: Cluster-assignment snapshots
//! - [`config`]: Inference kernel selection

pub mod assignment;
pub mod config;
pub mod crp;
pub mod distributions;
pub mod domain;
pub mod emissions;
pub mod error;
pub mod hirm;
pub mod irm;
pub mod math;
pub mod observation;
pub mod prelude;
pub mod prng;
pub mod relation;
pub mod schema;

pub use error::{HirmError, Result};
pub use hirm::Hirm;
pub use irm::Irm;
pub use observation::{Observation, Value};
pub use prng::Prng;
