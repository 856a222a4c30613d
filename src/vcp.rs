//! VCP feature codes and value types.
//!
//! The set of features here is the subset the daemon actually drives; the
//! capabilities parser still reports everything the display advertises.

use std::fmt;

use serde::{Deserialize, Serialize};

/// VCP features the daemon reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureCode {
    Brightness,
    Contrast,
    ColorTemperature,
    RedGain,
    GreenGain,
    BlueGain,
    Sharpness,
    DisplayMode,
}

impl FeatureCode {
    pub const ALL: [FeatureCode; 8] = [
        FeatureCode::Brightness,
        FeatureCode::Contrast,
        FeatureCode::ColorTemperature,
        FeatureCode::RedGain,
        FeatureCode::GreenGain,
        FeatureCode::BlueGain,
        FeatureCode::Sharpness,
        FeatureCode::DisplayMode,
    ];

    pub fn code(self) -> u8 {
        match self {
            FeatureCode::Brightness => 0x10,
            FeatureCode::Contrast => 0x12,
            FeatureCode::ColorTemperature => 0x14,
            FeatureCode::RedGain => 0x16,
            FeatureCode::GreenGain => 0x18,
            FeatureCode::BlueGain => 0x1A,
            FeatureCode::Sharpness => 0x87,
            FeatureCode::DisplayMode => 0xDC,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureCode::Brightness => "brightness",
            FeatureCode::Contrast => "contrast",
            FeatureCode::ColorTemperature => "color temperature",
            FeatureCode::RedGain => "red gain",
            FeatureCode::GreenGain => "green gain",
            FeatureCode::BlueGain => "blue gain",
            FeatureCode::Sharpness => "sharpness",
            FeatureCode::DisplayMode => "display mode",
        }
    }

    /// Whether writes to this feature skip read-back verification. Some
    /// panels report a stale value immediately after a write, so
    /// verification is only kept where it is known to be reliable.
    pub fn skip_verification(self) -> bool {
        !matches!(self, FeatureCode::Sharpness)
    }

}

impl fmt::Display for FeatureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// A raw VCP reading: current value and the feature's maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpValue {
    pub current: u16,
    pub maximum: u16,
}

/// A color selection, addressed to either the display-mode or the
/// color-temperature feature.
///
/// Serialized as a single integer for config compatibility: values at or
/// above 0x1000 are color-temperature presets with the offset stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ColorValue {
    DisplayMode(u16),
    ColorTemperature(u16),
}

const COLOR_TEMP_OFFSET: u16 = 0x1000;

impl ColorValue {
    /// Feature register this value is written to.
    pub fn feature(self) -> FeatureCode {
        match self {
            ColorValue::DisplayMode(_) => FeatureCode::DisplayMode,
            ColorValue::ColorTemperature(_) => FeatureCode::ColorTemperature,
        }
    }

    /// Raw value written on the wire.
    pub fn raw(self) -> u16 {
        match self {
            ColorValue::DisplayMode(v) | ColorValue::ColorTemperature(v) => v,
        }
    }
}

impl From<u16> for ColorValue {
    fn from(v: u16) -> Self {
        if v >= COLOR_TEMP_OFFSET {
            ColorValue::ColorTemperature(v - COLOR_TEMP_OFFSET)
        } else {
            ColorValue::DisplayMode(v)
        }
    }
}

impl From<ColorValue> for u16 {
    fn from(v: ColorValue) -> u16 {
        match v {
            ColorValue::DisplayMode(m) => m,
            ColorValue::ColorTemperature(t) => t + COLOR_TEMP_OFFSET,
        }
    }
}

impl fmt::Display for ColorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorValue::DisplayMode(v) => write!(f, "mode 0x{v:02X}"),
            ColorValue::ColorTemperature(v) => write!(f, "temp 0x{v:02X}"),
        }
    }
}
