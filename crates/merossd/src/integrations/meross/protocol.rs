//! Wire payload shapes for the valve subdevice namespaces.
//!
//! Temperatures travel as tenths of a degree Celsius and booleans as
//! integers, matching the vendor cloud representation.

use serde::Deserialize;
use serde::Serialize;

/// Full status snapshot namespace
pub const NS_STATUS: &str = "Appliance.Hub.Mts100.All";

/// Temperature report / setpoint namespace
pub const NS_TEMPERATURE: &str = "Appliance.Hub.Mts100.Temperature";

/// Operating mode namespace
pub const NS_MODE: &str = "Appliance.Hub.Mts100.Mode";

/// Power toggle namespace
pub const NS_TOGGLEX: &str = "Appliance.Hub.ToggleX";

/// Decode a tenths-of-a-degree wire value into degrees Celsius.
pub fn decode_tenths(raw: i32) -> f64 {
    f64::from(raw) / 10.0
}

/// Encode degrees Celsius into the tenths-of-a-degree wire value.
pub fn encode_tenths(celsius: f64) -> i32 {
    (celsius * 10.0).round() as i32
}

/// Power state, boolean-as-integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleState {
    pub onoff: u8,
}

/// Raw operating mode value; meaning depends on the hardware variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeState {
    pub state: i32,
}

/// Temperature block: sensed room temperature, active setpoint, and whether
/// the valve is currently calling for heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureReport {
    pub room: i32,

    #[serde(rename = "currentSet")]
    pub current_set: i32,

    pub heating: u8,
}

/// Full status snapshot of a valve subdevice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveStatus {
    pub togglex: ToggleState,
    pub mode: ModeState,
    pub temperature: TemperatureReport,
}

/// A push notification from the vendor cloud, dispatched on its namespace.
///
/// Anything outside the two recognized kinds lands in `Other` and is logged
/// and ignored by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    TemperatureChange(TemperatureReport),
    ModeChange { state: i32 },
    Other(String),
}

impl PushEvent {
    /// Classify a push payload by namespace and decode its body.
    pub fn from_namespace(
        namespace: &str,
        payload: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match namespace {
            NS_TEMPERATURE => Ok(PushEvent::TemperatureChange(serde_json::from_value(
                payload.clone(),
            )?)),
            NS_MODE => {
                let mode: ModeState = serde_json::from_value(payload.clone())?;
                Ok(PushEvent::ModeChange { state: mode.state })
            }
            other => Ok(PushEvent::Other(other.to_string())),
        }
    }
}
