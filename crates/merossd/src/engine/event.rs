use super::state::ClimateState;

/// Engine-level events, published on the engine's broadcast channel.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine
/// converts `FromIntegrationMessage` into `Event` at the boundary, after the
/// state snapshot has been updated.
#[derive(Debug, Clone)]
pub enum Event {
    ClimateStateChanged {
        entity_id: String,
        state: ClimateState,
    },

    EntityRemoved {
        entity_id: String,
    },
}
