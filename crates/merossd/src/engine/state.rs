use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Host-level operating mode of a climate entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HvacMode {
    #[default]
    Off,
    Heat,
    Auto,
}

/// What a climate entity is currently doing, as opposed to what it is set to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HvacAction {
    #[default]
    Off,
    Heating,
    Idle,
}

/// State of a climate entity (thermostat, radiator valve).
///
/// Temperatures are degrees Celsius. `None` means the value has not been
/// reported yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClimateState {
    /// Whether the last contact with the device succeeded.
    pub available: bool,

    /// Displayed operating mode. `Off` when the device is powered off.
    pub hvac_mode: HvacMode,

    /// Displayed activity. `Off` when powered off, `Heating` while the
    /// valve calls for heat, `Idle` otherwise.
    pub hvac_action: HvacAction,

    /// Last sensed room temperature.
    pub current_temperature: Option<f64>,

    /// Last requested setpoint.
    pub target_temperature: Option<f64>,

    /// Name of the active vendor preset, if one has been decoded.
    pub preset: Option<String>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    pub climates: HashMap<String, ClimateState>,
}
