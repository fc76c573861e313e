//! Emission specifications.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    BitFlip, BoolEmission, EmissionVariant, Gaussian, RealEmission, SimpleString, Sometimes,
    TextEmission,
};
use crate::distributions::spec::{format_spec_string, parse_spec_string};
use crate::error::{HirmError, Result};
use crate::observation::ValueKind;

/// The fixed family of emission kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmissionKind {
    /// Flip a boolean.
    BitFlip,
    /// Sometimes flip a boolean.
    SometimesBitFlip,
    /// Add Gaussian noise.
    Gaussian,
    /// Sometimes add Gaussian noise.
    SometimesGaussian,
    /// Edit characters of a string.
    SimpleString,
}

impl EmissionKind {
    /// Spec name of the kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BitFlip => "bitflip",
            Self::SometimesBitFlip => "sometimes_bitflip",
            Self::Gaussian => "gaussian",
            Self::SometimesGaussian => "sometimes_gaussian",
            Self::SimpleString => "simple_string",
        }
    }

    /// Look a kind up by spec name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bitflip" => Self::BitFlip,
            "sometimes_bitflip" => Self::SometimesBitFlip,
            "gaussian" => Self::Gaussian,
            "sometimes_gaussian" => Self::SometimesGaussian,
            "simple_string" => Self::SimpleString,
            _ => return None,
        })
    }

    /// Type of the clean and dirty values.
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::BitFlip | Self::SometimesBitFlip => ValueKind::Bool,
            Self::Gaussian | Self::SometimesGaussian => ValueKind::Real,
            Self::SimpleString => ValueKind::Text,
        }
    }
}

/// A parsed emission specification such as `sometimes_bitflip`.
///
/// Uses the same `name(arg=val,...)` syntax as distribution specs; no kind
/// currently takes arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmissionSpec {
    kind: EmissionKind,
}

impl EmissionSpec {
    /// Spec of `kind`.
    #[must_use]
    pub fn new(kind: EmissionKind) -> Self {
        Self { kind }
    }

    /// Parse a spec string.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind, malformed syntax, or any argument.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, args) = parse_spec_string(spec)?;
        let kind = EmissionKind::from_name(&name).ok_or(HirmError::UnknownEmission(name))?;
        if let Some(key) = args.keys().next() {
            return Err(HirmError::InvalidSpec {
                spec: spec.to_string(),
                reason: format!("unexpected argument {key}"),
            });
        }
        Ok(Self { kind })
    }

    /// Emission kind.
    #[must_use]
    pub fn kind(&self) -> EmissionKind {
        self.kind
    }

    /// Type of the clean and dirty values.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.kind.value_kind()
    }

    /// Build a fresh emission for this spec.
    #[must_use]
    pub fn prior(&self) -> EmissionVariant {
        match self.kind {
            EmissionKind::BitFlip => EmissionVariant::Bool(BoolEmission::BitFlip(BitFlip::new())),
            EmissionKind::SometimesBitFlip => EmissionVariant::Bool(
                BoolEmission::SometimesBitFlip(Sometimes::new(BitFlip::new())),
            ),
            EmissionKind::Gaussian => {
                EmissionVariant::Real(RealEmission::Gaussian(Gaussian::new()))
            }
            EmissionKind::SometimesGaussian => EmissionVariant::Real(
                RealEmission::SometimesGaussian(Sometimes::new(Gaussian::new())),
            ),
            EmissionKind::SimpleString => {
                EmissionVariant::Text(TextEmission::SimpleString(SimpleString::new()))
            }
        }
    }
}

impl fmt::Display for EmissionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_spec_string(f, self.kind.name(), &Default::default())
    }
}

impl FromStr for EmissionSpec {
    type Err = HirmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmissionSpec {
    type Error = HirmError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<EmissionSpec> for String {
    fn from(spec: EmissionSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_kinds() {
        for (raw, kind) in [
            ("bitflip", ValueKind::Bool),
            ("sometimes_bitflip", ValueKind::Bool),
            ("gaussian", ValueKind::Real),
            ("sometimes_gaussian", ValueKind::Real),
            ("simple_string", ValueKind::Text),
        ] {
            let spec = EmissionSpec::parse(raw).unwrap();
            assert_eq!(spec.value_kind(), kind);
            assert_eq!(spec.to_string(), raw);
        }
    }

    #[test]
    fn test_unknown_emission() {
        assert!(matches!(
            EmissionSpec::parse("sometimes_skellam"),
            Err(HirmError::UnknownEmission(_))
        ));
        assert!(EmissionSpec::parse("bitflip(p=1)").is_err());
    }

    #[test]
    fn test_prior_matches_kind() {
        let spec = EmissionSpec::parse("sometimes_gaussian").unwrap();
        assert!(matches!(
            spec.prior(),
            EmissionVariant::Real(RealEmission::SometimesGaussian(_))
        ));
    }
}
