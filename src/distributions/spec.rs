//! Parsing `name(arg=val,...)` model specifications.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    Bigram, BoolDistribution, BetaBernoulli, DirichletCategorical, Distribution,
    DistributionAdapter, DistributionVariant, IntDistribution, Normal, RealDistribution,
    Skellam, StringCat, StringNat, TextDistribution,
};
use crate::error::{HirmError, Result};
use crate::observation::ValueKind;
use crate::prng::Prng;

/// Split a spec string into its name and argument map.
///
/// The grammar is `name` or `name(key=val,key=val)`, with no nesting and no
/// quoting. An empty argument list `name()` is accepted.
pub(crate) fn parse_spec_string(spec: &str) -> Result<(String, BTreeMap<String, String>)> {
    let invalid = |reason: &str| HirmError::InvalidSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };
    let spec_trimmed = spec.trim();
    let (name, rest) = match spec_trimmed.find('(') {
        Some(i) => (&spec_trimmed[..i], &spec_trimmed[i..]),
        None => (spec_trimmed, ""),
    };
    if name.is_empty() {
        return Err(invalid("missing name"));
    }
    let mut args = BTreeMap::new();
    if rest.is_empty() {
        return Ok((name.to_string(), args));
    }
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| invalid("argument list must be enclosed in parentheses"))?;
    if inner.contains('(') || inner.contains(')') {
        return Err(invalid("nested parentheses are not supported"));
    }
    if inner.is_empty() {
        return Ok((name.to_string(), args));
    }
    for part in inner.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(&format!("argument '{part}' is not key=value")))?;
        if key.is_empty() {
            return Err(invalid("empty argument name"));
        }
        args.insert(key.to_string(), value.to_string());
    }
    Ok((name.to_string(), args))
}

/// Render a name and argument map back into spec syntax.
pub(crate) fn format_spec_string(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    args: &BTreeMap<String, String>,
) -> fmt::Result {
    write!(f, "{name}")?;
    if !args.is_empty() {
        let parts: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "({})", parts.join(","))?;
    }
    Ok(())
}

/// The fixed family of model kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionKind {
    /// Beta-Bernoulli over booleans.
    Bernoulli,
    /// Character bigram over strings.
    Bigram,
    /// Dirichlet-Categorical over `0..k`.
    Categorical,
    /// Normal-Inverse-Gamma over reals.
    Normal,
    /// Skellam over integers.
    Skellam,
    /// Categorical over a fixed string list.
    StringCat,
    /// Digit-string bigram.
    StringNat,
    /// Normal over reals written as strings.
    StringNormal,
    /// Skellam over integers written as strings.
    StringSkellam,
}

impl DistributionKind {
    /// Spec name of the kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bernoulli => "bernoulli",
            Self::Bigram => "bigram",
            Self::Categorical => "categorical",
            Self::Normal => "normal",
            Self::Skellam => "skellam",
            Self::StringCat => "stringcat",
            Self::StringNat => "string_nat",
            Self::StringNormal => "string_normal",
            Self::StringSkellam => "string_skellam",
        }
    }

    /// Look a kind up by spec name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bernoulli" => Self::Bernoulli,
            "bigram" => Self::Bigram,
            "categorical" => Self::Categorical,
            "normal" => Self::Normal,
            "skellam" => Self::Skellam,
            "stringcat" => Self::StringCat,
            "string_nat" => Self::StringNat,
            "string_normal" => Self::StringNormal,
            "string_skellam" => Self::StringSkellam,
            _ => return None,
        })
    }

    /// Type of the values the kind models.
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::Bernoulli => ValueKind::Bool,
            Self::Categorical | Self::Skellam => ValueKind::Int,
            Self::Normal => ValueKind::Real,
            Self::Bigram
            | Self::StringCat
            | Self::StringNat
            | Self::StringNormal
            | Self::StringSkellam => ValueKind::Text,
        }
    }

    fn allowed_args(self) -> &'static [&'static str] {
        match self {
            Self::Bigram | Self::StringNat => &["maxlength"],
            Self::Categorical => &["k"],
            Self::StringCat => &["strings", "delim"],
            _ => &[],
        }
    }
}

/// A parsed model specification such as `categorical(k=6)`.
///
/// Serializes as its spec string.
///
/// # Example
///
/// ```
/// use hirm::distributions::{DistributionKind, DistributionSpec};
///
/// let spec: DistributionSpec = "stringcat(strings=a:b:c,delim=:)".parse().unwrap();
/// assert_eq!(spec.kind(), DistributionKind::StringCat);
/// assert_eq!(spec.arg("delim"), Some(":"));
/// assert_eq!(spec.to_string(), "stringcat(delim=:,strings=a:b:c)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistributionSpec {
    kind: DistributionKind,
    args: BTreeMap<String, String>,
}

impl DistributionSpec {
    /// Spec of `kind` with no arguments.
    #[must_use]
    pub fn new(kind: DistributionKind) -> Self {
        Self {
            kind,
            args: BTreeMap::new(),
        }
    }

    /// Parse and validate a spec string.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind, malformed syntax, unknown
    /// arguments, or argument values that do not parse.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, args) = parse_spec_string(spec)?;
        let kind =
            DistributionKind::from_name(&name).ok_or(HirmError::UnknownDistribution(name))?;
        let parsed = Self { kind, args };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Model kind.
    #[must_use]
    pub fn kind(&self) -> DistributionKind {
        self.kind
    }

    /// Argument value by name.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// All arguments.
    #[must_use]
    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    /// Type of the values the model covers.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.kind.value_kind()
    }

    fn invalid(&self, reason: impl Into<String>) -> HirmError {
        HirmError::InvalidSpec {
            spec: self.to_string(),
            reason: reason.into(),
        }
    }

    fn usize_arg(&self, key: &str, default: Option<usize>) -> Result<usize> {
        match (self.arg(key), default) {
            (Some(raw), _) => raw
                .trim()
                .parse()
                .map_err(|_| self.invalid(format!("{key} must be a non-negative integer"))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(self.invalid(format!("missing required argument {key}"))),
        }
    }

    fn strings_arg(&self) -> Result<Vec<String>> {
        let delim = self.arg("delim").unwrap_or(" ");
        let mut chars = delim.chars();
        let (Some(d), None) = (chars.next(), chars.next()) else {
            return Err(self.invalid("delim must be a single character"));
        };
        let raw = self
            .arg("strings")
            .ok_or_else(|| self.invalid("missing required argument strings"))?;
        Ok(raw.split(d).map(str::to_string).collect())
    }

    fn validate(&self) -> Result<()> {
        let allowed = self.kind.allowed_args();
        if let Some(extra) = self.args.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(self.invalid(format!("unexpected argument {extra}")));
        }
        match self.kind {
            DistributionKind::Bigram => {
                self.usize_arg("maxlength", Some(super::bigram::DEFAULT_MAX_LENGTH))?;
            }
            DistributionKind::StringNat => {
                self.usize_arg("maxlength", Some(super::string_nat::DEFAULT_MAX_LENGTH))?;
            }
            DistributionKind::Categorical => {
                if self.usize_arg("k", None)? == 0 {
                    return Err(self.invalid("k must be positive"));
                }
            }
            DistributionKind::StringCat => {
                self.strings_arg()?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Build a fresh model for this spec.
    ///
    /// Non-conjugate kinds draw their initial latent parameters from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument fails to parse.
    pub fn prior(&self, rng: &mut Prng) -> Result<DistributionVariant> {
        Ok(match self.kind {
            DistributionKind::Bernoulli => {
                DistributionVariant::Bool(BoolDistribution::BetaBernoulli(BetaBernoulli::new()))
            }
            DistributionKind::Bigram => {
                let max_length =
                    self.usize_arg("maxlength", Some(super::bigram::DEFAULT_MAX_LENGTH))?;
                DistributionVariant::Text(TextDistribution::Bigram(Bigram::with_max_length(
                    max_length,
                )))
            }
            DistributionKind::Categorical => {
                let k = self.usize_arg("k", None)?;
                DistributionVariant::Int(IntDistribution::Categorical(DirichletCategorical::new(
                    k,
                )))
            }
            DistributionKind::Normal => {
                DistributionVariant::Real(RealDistribution::Normal(Normal::new()))
            }
            DistributionKind::Skellam => {
                let mut s = Skellam::new();
                s.init_theta(rng);
                DistributionVariant::Int(IntDistribution::Skellam(s))
            }
            DistributionKind::StringCat => {
                DistributionVariant::Text(TextDistribution::StringCat(StringCat::new(
                    self.strings_arg()?,
                )))
            }
            DistributionKind::StringNat => {
                let max_length =
                    self.usize_arg("maxlength", Some(super::string_nat::DEFAULT_MAX_LENGTH))?;
                DistributionVariant::Text(TextDistribution::StringNat(StringNat::new(max_length)))
            }
            DistributionKind::StringNormal => DistributionVariant::Text(
                TextDistribution::StringNormal(DistributionAdapter::new(Normal::new())),
            ),
            DistributionKind::StringSkellam => {
                let mut s = Skellam::new();
                s.init_theta(rng);
                DistributionVariant::Text(TextDistribution::StringSkellam(
                    DistributionAdapter::new(s),
                ))
            }
        })
    }
}

impl fmt::Display for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_spec_string(f, self.kind.name(), &self.args)
    }
}

impl FromStr for DistributionSpec {
    type Err = HirmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DistributionSpec {
    type Error = HirmError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DistributionSpec> for String {
    fn from(spec: DistributionSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let spec = DistributionSpec::parse("bernoulli").unwrap();
        assert_eq!(spec.kind(), DistributionKind::Bernoulli);
        assert!(spec.args().is_empty());
        assert_eq!(spec.value_kind(), ValueKind::Bool);
    }

    #[test]
    fn test_parse_with_args() {
        let spec = DistributionSpec::parse("categorical(k=6)").unwrap();
        assert_eq!(spec.arg("k"), Some("6"));
        assert_eq!(spec.value_kind(), ValueKind::Int);
        let spec = DistributionSpec::parse("bigram()").unwrap();
        assert!(spec.args().is_empty());
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            DistributionSpec::parse("poisson"),
            Err(HirmError::UnknownDistribution(name)) if name == "poisson"
        ));
    }

    #[test]
    fn test_malformed_arguments() {
        for bad in [
            "categorical(k)",
            "categorical(k=6",
            "categorical(k=6)x",
            "categorical(k=abc)",
            "categorical(k=0)",
            "categorical",
            "bernoulli(p=0.5)",
            "(k=1)",
            "stringcat(strings=a:b,delim=::)",
        ] {
            assert!(DistributionSpec::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_stringcat_prior() {
        let spec = DistributionSpec::parse("stringcat(strings=a:b:c,delim=:)").unwrap();
        let mut rng = Prng::new(0);
        let DistributionVariant::Text(TextDistribution::StringCat(d)) = spec.prior(&mut rng).unwrap()
        else {
            panic!("expected stringcat");
        };
        assert_eq!(d.strings(), ["a", "b", "c"]);
    }

    #[test]
    fn test_stringcat_default_delim() {
        let spec = DistributionSpec::parse("stringcat(strings=x y)").unwrap();
        let mut rng = Prng::new(0);
        let DistributionVariant::Text(TextDistribution::StringCat(d)) = spec.prior(&mut rng).unwrap()
        else {
            panic!("expected stringcat");
        };
        assert_eq!(d.strings().len(), 2);
    }

    #[test]
    fn test_every_kind_builds() {
        let mut rng = Prng::new(3);
        for raw in [
            "bernoulli",
            "bigram(maxlength=10)",
            "categorical(k=3)",
            "normal",
            "skellam",
            "stringcat(strings=a b)",
            "string_nat",
            "string_normal",
            "string_skellam",
        ] {
            let spec = DistributionSpec::parse(raw).unwrap();
            let variant = spec.prior(&mut rng).unwrap();
            let kind = match variant {
                DistributionVariant::Bool(_) => ValueKind::Bool,
                DistributionVariant::Int(_) => ValueKind::Int,
                DistributionVariant::Real(_) => ValueKind::Real,
                DistributionVariant::Text(_) => ValueKind::Text,
            };
            assert_eq!(kind, spec.value_kind(), "{raw}");
        }
    }

    #[test]
    fn test_bigram_maxlength() {
        let spec = DistributionSpec::parse("bigram(maxlength=7)").unwrap();
        let mut rng = Prng::new(0);
        let DistributionVariant::Text(TextDistribution::Bigram(b)) = spec.prior(&mut rng).unwrap()
        else {
            panic!("expected bigram");
        };
        assert_eq!(b.max_length(), 7);
    }

    #[test]
    fn test_display_round_trip() {
        let spec = DistributionSpec::parse("categorical(k=4)").unwrap();
        let again: DistributionSpec = spec.to_string().parse().unwrap();
        assert_eq!(spec, again);
    }

    #[test]
    fn test_serde_as_string() {
        let spec = DistributionSpec::parse("bigram(maxlength=12)").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"bigram(maxlength=12)\"");
        let back: DistributionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
