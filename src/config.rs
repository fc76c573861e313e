//! Selection of the MCMC kernels run by one inference step.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Latent-parameter moves per non-conjugate cell per step.
pub const DEFAULT_THETA_STEPS: usize = 10;

/// Which kernels one call to `transition` runs, in the order listed.
///
/// Missing TOML keys keep their defaults, which enable every kernel.
///
/// # Example
///
/// ```
/// use hirm::config::GibbsConfig;
///
/// let config = GibbsConfig::from_toml_str("crp_alphas = false\ntheta_steps = 3").unwrap();
/// assert!(!config.crp_alphas);
/// assert!(config.domain_clusters);
/// assert_eq!(config.theta_steps, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GibbsConfig {
    /// Move relations between relation clusters (HIRM only).
    pub relation_clusters: bool,
    /// Move domain items between clusters.
    pub domain_clusters: bool,
    /// Resample every CRP concentration.
    pub crp_alphas: bool,
    /// Resample per-cluster hyperparameters and latent parameters.
    pub hyperparameters: bool,
    /// Resample the values of unobserved relations.
    pub latent_values: bool,
    /// Latent-parameter moves per non-conjugate cell.
    pub theta_steps: usize,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            relation_clusters: true,
            domain_clusters: true,
            crp_alphas: true,
            hyperparameters: true,
            latent_values: true,
            theta_steps: DEFAULT_THETA_STEPS,
        }
    }
}

impl GibbsConfig {
    /// Every kernel enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HirmError::Config`] on malformed TOML or
    /// unknown value types.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a parse error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Toggle relation-cluster moves.
    #[must_use]
    pub fn with_relation_clusters(mut self, enabled: bool) -> Self {
        self.relation_clusters = enabled;
        self
    }

    /// Toggle domain item moves.
    #[must_use]
    pub fn with_domain_clusters(mut self, enabled: bool) -> Self {
        self.domain_clusters = enabled;
        self
    }

    /// Toggle CRP concentration moves.
    #[must_use]
    pub fn with_crp_alphas(mut self, enabled: bool) -> Self {
        self.crp_alphas = enabled;
        self
    }

    /// Toggle hyperparameter and latent-parameter moves.
    #[must_use]
    pub fn with_hyperparameters(mut self, enabled: bool) -> Self {
        self.hyperparameters = enabled;
        self
    }

    /// Toggle latent-value moves.
    #[must_use]
    pub fn with_latent_values(mut self, enabled: bool) -> Self {
        self.latent_values = enabled;
        self
    }

    /// Set latent-parameter moves per non-conjugate cell.
    #[must_use]
    pub fn with_theta_steps(mut self, steps: usize) -> Self {
        self.theta_steps = steps;
        self
    }

    /// Only the cluster-assignment kernels.
    #[must_use]
    pub fn clusters_only() -> Self {
        Self {
            crp_alphas: false,
            hyperparameters: false,
            latent_values: false,
            ..Self::default()
        }
    }
}
