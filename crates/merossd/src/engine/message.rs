//! Type-safe message system for the engine.
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use serde::Deserialize;
use serde::Serialize;

use super::state::ClimateState;
use super::state::HvacMode;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// An entity was registered by an integration
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
    },

    /// An entity was removed by the integration that owns it
    EntityRemoved { entity_id: String },

    /// A climate entity's mirrored state changed
    ClimateStateChanged {
        entity_id: String,
        state: ClimateState,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Command for a climate entity
    ClimateCommand {
        entity_id: String,
        command: ClimateCommand,
    },
}

/// The climate-entity command vocabulary.
///
/// This is closed over what the climate contract supports; unsupported
/// controls (fan, swing, humidity, auxiliary heat) are unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClimateCommand {
    /// Set the target temperature, degrees Celsius
    SetTemperature { celsius: f64 },

    /// Set the operating mode
    SetHvacMode { mode: HvacMode },

    /// Set a vendor preset by name
    SetPreset { preset: String },
}
