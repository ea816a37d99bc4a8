use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::ClimateCommand;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::State;

/// merossd engine
///
/// This structure handles the flow of events from integrations, maintaining a
/// view of the world with State, and routes commands back to the integration
/// that owns the target entity.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Broadcast channel for engine-level events (state changes, removals)
    events_tx: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity for the engine event broadcast channel
const EVENT_CHANNEL_SIZE: usize = 64;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events_tx,
            integration_handles: Vec::new(),
        }
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that consults the registry and registers
    /// any integration whose factory recognizes the config.
    pub fn register_integrations_from_config(
        &mut self,
        cfg: &crate::config::Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }

        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        // Extract entity_id from command for routing
        let entity_id = match &msg {
            ToIntegrationMessage::ClimateCommand { entity_id, .. } => entity_id.clone(),
        };

        // Route to the integration that owns this entity
        let map = self
            .entity_integration_map
            .lock()
            .map_err(|e| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::other(e.to_string()))
            })?;

        let integration_name = map
            .get(&entity_id)
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("No integration found for entity: {}", entity_id),
                ))
            })?;

        let tx = self.integration_channels.get(integration_name).ok_or_else(
            || -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Integration channel not found: {}", integration_name),
                ))
            },
        )?;

        tx.send(msg)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle_event(msg).await {
                warn!("Error handling event: {}", e);
            }
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Subscribe to engine-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Send a command to a climate entity
    pub fn send_climate_command(
        &self,
        entity_id: String,
        command: ClimateCommand,
    ) -> Result<(), Box<dyn Error + Send>> {
        let cmd = ToIntegrationMessage::ClimateCommand { entity_id, command };
        self.send_command(cmd)
    }

    /// Handle an event from an integration
    async fn handle_event(&self, msg: FromIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                // State is not populated until the first state-change message arrives.
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(entity_id, integration_name);
                }
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.climates.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                // Remove from routing map
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.remove(&entity_id);
                }

                // Nobody listening is fine
                let _ = self.events_tx.send(Event::EntityRemoved { entity_id });
            }
            FromIntegrationMessage::ClimateStateChanged { entity_id, state } => {
                info!(
                    "Climate state changed: {} -> mode={}, action={}, current={:?}, target={:?}",
                    entity_id,
                    state.hvac_mode,
                    state.hvac_action,
                    state.current_temperature,
                    state.target_temperature
                );

                {
                    let mut snapshot = State::clone(&self.state.load());
                    snapshot.climates.insert(entity_id.clone(), state.clone());
                    self.state.store(Arc::new(snapshot));
                }

                let _ = self
                    .events_tx
                    .send(Event::ClimateStateChanged { entity_id, state });
            }
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ClimateState;
    use crate::engine::state::HvacAction;
    use crate::engine::state::HvacMode;

    fn sample_state() -> ClimateState {
        ClimateState {
            available: true,
            hvac_mode: HvacMode::Auto,
            hvac_action: HvacAction::Idle,
            current_temperature: Some(21.5),
            target_temperature: Some(22.0),
            preset: Some("Auto".to_string()),
        }
    }

    #[tokio::test]
    async fn test_state_change_updates_snapshot_and_broadcasts() {
        let engine = Engine::new();
        let mut events = engine.subscribe();

        engine
            .handle_event(FromIntegrationMessage::ClimateStateChanged {
                entity_id: "climate.bedroom".to_string(),
                state: sample_state(),
            })
            .await
            .unwrap();

        let snapshot = engine.state_snapshot();
        assert_eq!(
            snapshot.climates.get("climate.bedroom"),
            Some(&sample_state())
        );

        match events.try_recv().unwrap() {
            Event::ClimateStateChanged { entity_id, state } => {
                assert_eq!(entity_id, "climate.bedroom");
                assert_eq!(state, sample_state());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_entity_removed_clears_state() {
        let engine = Engine::new();

        engine
            .handle_event(FromIntegrationMessage::ClimateStateChanged {
                entity_id: "climate.bedroom".to_string(),
                state: sample_state(),
            })
            .await
            .unwrap();
        engine
            .handle_event(FromIntegrationMessage::EntityRemoved {
                entity_id: "climate.bedroom".to_string(),
            })
            .await
            .unwrap();

        assert!(engine.state_snapshot().climates.is_empty());
    }

    #[tokio::test]
    async fn test_command_routed_to_owning_integration() {
        let mut engine = Engine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .integration_channels
            .insert("meross".to_string(), tx);

        engine
            .handle_event(FromIntegrationMessage::EntityDiscovered {
                entity_id: "climate.bedroom".to_string(),
                integration_name: "meross".to_string(),
            })
            .await
            .unwrap();

        engine
            .send_climate_command(
                "climate.bedroom".to_string(),
                ClimateCommand::SetTemperature { celsius: 20.5 },
            )
            .unwrap();

        match rx.try_recv().unwrap() {
            ToIntegrationMessage::ClimateCommand { entity_id, command } => {
                assert_eq!(entity_id, "climate.bedroom");
                assert_eq!(command, ClimateCommand::SetTemperature { celsius: 20.5 });
            }
        }
    }

    #[tokio::test]
    async fn test_command_for_unknown_entity_fails() {
        let engine = Engine::new();
        let result = engine.send_climate_command(
            "climate.nowhere".to_string(),
            ClimateCommand::SetHvacMode {
                mode: HvacMode::Off,
            },
        );
        assert!(result.is_err());
    }
}
