//! Emulator-facing configuration value types.

use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

/// Which hardware to emulate when the cartridge header allows a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SystemPreference {
    /// Run CGB-enhanced and CGB-only cartridges on CGB hardware.
    #[default]
    PreferCgb,
    /// Run on DMG hardware unless the cartridge is CGB-only.
    PreferDmg,
    /// Always run on DMG hardware, even for CGB-only cartridges.
    ForceDmg,
}

impl Display for SystemPreference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferCgb => write!(f, "Prefer GBC"),
            Self::PreferDmg => write!(f, "Prefer DMG"),
            Self::ForceDmg => write!(f, "Force DMG"),
        }
    }
}

/// Host palette used to display the four DMG shades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum GbPalette {
    #[default]
    Grayscale,
    /// The yellow-green tint of the original DMG LCD.
    Classic,
    /// The softer green ramp popularized by the BGB debugger.
    BgbGreen,
    /// Palette supplied through `DmgPalettes::custom`.
    Custom,
}

impl Display for GbPalette {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grayscale => write!(f, "Grayscale"),
            Self::Classic => write!(f, "Classic"),
            Self::BgbGreen => write!(f, "BGB Green"),
            Self::Custom => write!(f, "Custom"),
        }
    }
}

/// How CGB palette-RAM colors are converted to host RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CgbColorCorrection {
    /// Plain RGB5 -> RGB8 expansion.
    None,
    /// Gambatte-style channel mixing that approximates the CGB LCD.
    #[default]
    GbcLcd,
}

impl Display for CgbColorCorrection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::GbcLcd => write!(f, "GBC LCD"),
        }
    }
}
