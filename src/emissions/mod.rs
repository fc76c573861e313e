//! Corruption models linking a clean base value to an observed dirty value.
//!
//! A noisy relation scores each observation with an [`Emission`] conditioned
//! on the value of its base relation at the same leading items.

pub mod bitflip;
pub mod gaussian;
pub mod simple_string;
pub mod sometimes;
pub mod spec;

pub use bitflip::BitFlip;
pub use gaussian::Gaussian;
pub use simple_string::SimpleString;
pub use sometimes::Sometimes;
pub use spec::{EmissionKind, EmissionSpec};

use crate::prng::Prng;

/// A model over `(clean, dirty)` pairs.
pub trait Emission<T> {
    /// Total incorporated weight.
    fn n(&self) -> f64;

    /// Absorb one pair with the given weight.
    fn incorporate_weighted(&mut self, clean: &T, dirty: &T, weight: f64);

    /// Release one pair with the given weight.
    fn unincorporate_weighted(&mut self, clean: &T, dirty: &T, weight: f64);

    /// Absorb one pair.
    fn incorporate(&mut self, clean: &T, dirty: &T) {
        self.incorporate_weighted(clean, dirty, 1.0);
    }

    /// Release one pair.
    fn unincorporate(&mut self, clean: &T, dirty: &T) {
        self.unincorporate_weighted(clean, dirty, 1.0);
    }

    /// Predictive log-probability of `dirty` given `clean`.
    fn logp(&self, clean: &T, dirty: &T) -> f64;

    /// Log-likelihood of all incorporated pairs.
    fn logp_score(&self) -> f64;

    /// Corrupt `clean` with a draw from the predictive.
    fn sample_corrupted(&self, clean: &T, rng: &mut Prng) -> T;

    /// Guess a clean value from several corrupted copies of it.
    fn propose_clean(&self, corrupted: &[T], rng: &mut Prng) -> Option<T>;

    /// Resample fixed hyperparameters.
    fn transition_hyperparameters(&mut self, rng: &mut Prng);
}

macro_rules! dispatch_emission {
    ($name:ident, $value:ty, [$($variant:ident),+ $(,)?]) => {
        impl Emission<$value> for $name {
            fn n(&self) -> f64 {
                match self {
                    $(Self::$variant(e) => e.n(),)+
                }
            }

            fn incorporate_weighted(&mut self, clean: &$value, dirty: &$value, weight: f64) {
                match self {
                    $(Self::$variant(e) => e.incorporate_weighted(clean, dirty, weight),)+
                }
            }

            fn unincorporate_weighted(&mut self, clean: &$value, dirty: &$value, weight: f64) {
                match self {
                    $(Self::$variant(e) => e.unincorporate_weighted(clean, dirty, weight),)+
                }
            }

            fn logp(&self, clean: &$value, dirty: &$value) -> f64 {
                match self {
                    $(Self::$variant(e) => e.logp(clean, dirty),)+
                }
            }

            fn logp_score(&self) -> f64 {
                match self {
                    $(Self::$variant(e) => e.logp_score(),)+
                }
            }

            fn sample_corrupted(&self, clean: &$value, rng: &mut Prng) -> $value {
                match self {
                    $(Self::$variant(e) => e.sample_corrupted(clean, rng),)+
                }
            }

            fn propose_clean(&self, corrupted: &[$value], rng: &mut Prng) -> Option<$value> {
                match self {
                    $(Self::$variant(e) => e.propose_clean(corrupted, rng),)+
                }
            }

            fn transition_hyperparameters(&mut self, rng: &mut Prng) {
                match self {
                    $(Self::$variant(e) => e.transition_hyperparameters(rng),)+
                }
            }
        }
    };
}

/// Emissions over booleans.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolEmission {
    /// `bitflip`
    BitFlip(BitFlip),
    /// `sometimes_bitflip`
    SometimesBitFlip(Sometimes<bool, BitFlip>),
}

/// Emissions over reals.
#[derive(Debug, Clone, PartialEq)]
pub enum RealEmission {
    /// `gaussian`
    Gaussian(Gaussian),
    /// `sometimes_gaussian`
    SometimesGaussian(Sometimes<f64, Gaussian>),
}

/// Emissions over strings.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEmission {
    /// `simple_string`
    SimpleString(SimpleString),
}

/// Emissions over integers. No kind is defined, so no value exists.
#[derive(Debug, Clone, PartialEq)]
pub enum IntEmission {}

dispatch_emission!(BoolEmission, bool, [BitFlip, SometimesBitFlip]);
dispatch_emission!(RealEmission, f64, [Gaussian, SometimesGaussian]);
dispatch_emission!(TextEmission, String, [SimpleString]);

impl Emission<i64> for IntEmission {
    fn n(&self) -> f64 {
        match *self {}
    }

    fn incorporate_weighted(&mut self, _clean: &i64, _dirty: &i64, _weight: f64) {
        match *self {}
    }

    fn unincorporate_weighted(&mut self, _clean: &i64, _dirty: &i64, _weight: f64) {
        match *self {}
    }

    fn logp(&self, _clean: &i64, _dirty: &i64) -> f64 {
        match *self {}
    }

    fn logp_score(&self) -> f64 {
        match *self {}
    }

    fn sample_corrupted(&self, _clean: &i64, _rng: &mut Prng) -> i64 {
        match *self {}
    }

    fn propose_clean(&self, _corrupted: &[i64], _rng: &mut Prng) -> Option<i64> {
        match *self {}
    }

    fn transition_hyperparameters(&mut self, _rng: &mut Prng) {
        match *self {}
    }
}

/// A freshly constructed emission of any value type.
#[derive(Debug, Clone, PartialEq)]
pub enum EmissionVariant {
    /// Boolean emission.
    Bool(BoolEmission),
    /// Real emission.
    Real(RealEmission),
    /// String emission.
    Text(TextEmission),
}
