//! Vendor mode enumerations for the two supported valve models.
//!
//! The mts100 and mts100v3 hardware variants carry different mode
//! enumerations on the wire. Which one applies is resolved once, from the
//! configured model tag, and carried alongside the decoded mode as a tagged
//! union instead of being re-inspected at runtime.

use serde::Deserialize;
use strum::IntoEnumIterator;

use crate::engine::HvacMode;

/// The two supported valve models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HardwareVariant {
    Mts100,
    Mts100V3,
}

/// Mode enumeration of the mts100.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::FromRepr,
)]
#[repr(i32)]
pub enum ThermostatMode {
    Custom = 0,
    Comfort = 1,
    Economy = 2,
    Schedule = 3,
}

/// Mode enumeration of the mts100v3.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::FromRepr,
)]
#[repr(i32)]
pub enum ThermostatV3Mode {
    Custom = 0,
    Heat = 1,
    Cool = 2,
    Auto = 3,
    Economy = 4,
}

/// A decoded vendor mode, tagged by the hardware variant it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Legacy(ThermostatMode),
    V3(ThermostatV3Mode),
}

#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("unknown mode value {raw} for {variant}")]
    UnknownValue { variant: HardwareVariant, raw: i32 },

    #[error("unknown preset '{name}' for {variant}")]
    UnknownPreset { variant: HardwareVariant, name: String },
}

impl DeviceMode {
    /// Decode a raw wire value into the variant's enumeration.
    pub fn decode(variant: HardwareVariant, raw: i32) -> Result<Self, ModeError> {
        let mode = match variant {
            HardwareVariant::Mts100 => ThermostatMode::from_repr(raw).map(DeviceMode::Legacy),
            HardwareVariant::Mts100V3 => ThermostatV3Mode::from_repr(raw).map(DeviceMode::V3),
        };
        mode.ok_or(ModeError::UnknownValue { variant, raw })
    }

    /// Raw wire value of this mode.
    pub fn raw(self) -> i32 {
        match self {
            DeviceMode::Legacy(m) => m as i32,
            DeviceMode::V3(m) => m as i32,
        }
    }

    /// Preset name of this mode (the enumeration member name).
    pub fn name(self) -> String {
        match self {
            DeviceMode::Legacy(m) => m.to_string(),
            DeviceMode::V3(m) => m.to_string(),
        }
    }

    /// Host-level mode this vendor mode displays as, for a powered-on device.
    ///
    /// Schedule/auto-like members display as `Auto`; everything else,
    /// including the unmapped members (Comfort, Cool, Economy), displays as
    /// `Heat`, which is the only remaining on-state in the contract.
    pub fn hvac_mode(self) -> HvacMode {
        match self {
            DeviceMode::Legacy(ThermostatMode::Schedule) => HvacMode::Auto,
            DeviceMode::V3(ThermostatV3Mode::Auto) => HvacMode::Auto,
            _ => HvacMode::Heat,
        }
    }
}

impl HardwareVariant {
    /// The vendor mode a host-level on-state request maps to.
    ///
    /// Returns `None` for `HvacMode::Off`, which is a power command rather
    /// than a mode write.
    pub fn mode_for(self, mode: HvacMode) -> Option<DeviceMode> {
        match (self, mode) {
            (HardwareVariant::Mts100, HvacMode::Heat) => {
                Some(DeviceMode::Legacy(ThermostatMode::Custom))
            }
            (HardwareVariant::Mts100, HvacMode::Auto) => {
                Some(DeviceMode::Legacy(ThermostatMode::Schedule))
            }
            (HardwareVariant::Mts100V3, HvacMode::Heat) => {
                Some(DeviceMode::V3(ThermostatV3Mode::Custom))
            }
            (HardwareVariant::Mts100V3, HvacMode::Auto) => {
                Some(DeviceMode::V3(ThermostatV3Mode::Auto))
            }
            (_, HvacMode::Off) => None,
        }
    }

    /// Look up a preset by name in this variant's enumeration.
    pub fn preset_named(self, name: &str) -> Result<DeviceMode, ModeError> {
        let mode = match self {
            HardwareVariant::Mts100 => name.parse::<ThermostatMode>().ok().map(DeviceMode::Legacy),
            HardwareVariant::Mts100V3 => name.parse::<ThermostatV3Mode>().ok().map(DeviceMode::V3),
        };
        mode.ok_or_else(|| ModeError::UnknownPreset {
            variant: self,
            name: name.to_string(),
        })
    }

    /// All preset names of this variant's enumeration.
    pub fn preset_names(self) -> Vec<String> {
        match self {
            HardwareVariant::Mts100 => ThermostatMode::iter().map(|m| m.to_string()).collect(),
            HardwareVariant::Mts100V3 => ThermostatV3Mode::iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_values() {
        assert_eq!(
            DeviceMode::decode(HardwareVariant::Mts100, 3).unwrap(),
            DeviceMode::Legacy(ThermostatMode::Schedule)
        );
        assert_eq!(
            DeviceMode::decode(HardwareVariant::Mts100V3, 3).unwrap(),
            DeviceMode::V3(ThermostatV3Mode::Auto)
        );
        // Same raw value, different meaning per variant
        assert_eq!(
            DeviceMode::decode(HardwareVariant::Mts100, 2).unwrap(),
            DeviceMode::Legacy(ThermostatMode::Economy)
        );
        assert_eq!(
            DeviceMode::decode(HardwareVariant::Mts100V3, 2).unwrap(),
            DeviceMode::V3(ThermostatV3Mode::Cool)
        );
    }

    #[test]
    fn test_decode_unknown_value() {
        assert!(DeviceMode::decode(HardwareVariant::Mts100, 4).is_err());
        assert!(DeviceMode::decode(HardwareVariant::Mts100V3, 5).is_err());
    }

    #[test]
    fn test_raw_round_trip() {
        for raw in 0..=3 {
            let mode = DeviceMode::decode(HardwareVariant::Mts100, raw).unwrap();
            assert_eq!(mode.raw(), raw);
        }
        for raw in 0..=4 {
            let mode = DeviceMode::decode(HardwareVariant::Mts100V3, raw).unwrap();
            assert_eq!(mode.raw(), raw);
        }
    }

    #[test]
    fn test_hvac_mapping() {
        assert_eq!(
            DeviceMode::Legacy(ThermostatMode::Schedule).hvac_mode(),
            HvacMode::Auto
        );
        assert_eq!(
            DeviceMode::V3(ThermostatV3Mode::Auto).hvac_mode(),
            HvacMode::Auto
        );
        assert_eq!(
            DeviceMode::Legacy(ThermostatMode::Custom).hvac_mode(),
            HvacMode::Heat
        );
        assert_eq!(
            DeviceMode::V3(ThermostatV3Mode::Custom).hvac_mode(),
            HvacMode::Heat
        );
        // Unmapped members fall through to Heat
        assert_eq!(
            DeviceMode::V3(ThermostatV3Mode::Cool).hvac_mode(),
            HvacMode::Heat
        );
        assert_eq!(
            DeviceMode::Legacy(ThermostatMode::Comfort).hvac_mode(),
            HvacMode::Heat
        );
    }

    #[test]
    fn test_mode_for_requested_hvac_mode() {
        assert_eq!(
            HardwareVariant::Mts100V3.mode_for(HvacMode::Heat),
            Some(DeviceMode::V3(ThermostatV3Mode::Custom))
        );
        assert_eq!(
            HardwareVariant::Mts100V3.mode_for(HvacMode::Auto),
            Some(DeviceMode::V3(ThermostatV3Mode::Auto))
        );
        assert_eq!(
            HardwareVariant::Mts100.mode_for(HvacMode::Heat),
            Some(DeviceMode::Legacy(ThermostatMode::Custom))
        );
        assert_eq!(
            HardwareVariant::Mts100.mode_for(HvacMode::Auto),
            Some(DeviceMode::Legacy(ThermostatMode::Schedule))
        );
        assert_eq!(HardwareVariant::Mts100.mode_for(HvacMode::Off), None);
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(
            HardwareVariant::Mts100V3.preset_named("Economy").unwrap(),
            DeviceMode::V3(ThermostatV3Mode::Economy)
        );
        assert!(HardwareVariant::Mts100.preset_named("Heat").is_err());
        assert!(HardwareVariant::Mts100V3.preset_named("Schedule").is_err());
    }

    #[test]
    fn test_preset_names() {
        assert_eq!(
            HardwareVariant::Mts100.preset_names(),
            vec!["Custom", "Comfort", "Economy", "Schedule"]
        );
        assert_eq!(
            HardwareVariant::Mts100V3.preset_names(),
            vec!["Custom", "Heat", "Cool", "Auto", "Economy"]
        );
    }
}
