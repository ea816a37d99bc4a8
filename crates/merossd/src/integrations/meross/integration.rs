use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::handle::ValveHandle;
use super::protocol::PushEvent;
use super::transport::CloudTransport;
use super::transport::PushMessage;
use super::valve::ValveClimate;
use crate::config::MerossConfig;
use crate::engine::ClimateCommand;
use crate::engine::ClimateState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// Type alias for the shared valves map, keyed by entity id
type ValvesMap<C> = Arc<Mutex<HashMap<String, Arc<Mutex<ValveClimate<C>>>>>>;

/// Meross cloud integration
///
/// Bridges the configured valve subdevices into the engine as climate
/// entities. Push notifications and a periodic status poll keep the mirrored
/// state current; commands from the engine are forwarded to the device
/// handles.
pub struct MerossIntegration<C: CloudTransport> {
    transport: Arc<Mutex<C>>,
    config: MerossConfig,
    valves: ValvesMap<C>,
    to_engine: Option<FromIntegrationSender>,
    /// Handle to the background push processing task
    _push_task: Option<JoinHandle<()>>,
    /// Handle to the periodic status poll task
    _poll_task: Option<JoinHandle<()>>,
}

impl<C: CloudTransport> MerossIntegration<C> {
    /// Create a new Meross integration
    pub fn new(transport: C, config: &MerossConfig) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            config: config.clone(),
            valves: Arc::new(Mutex::new(HashMap::new())),
            to_engine: None,
            _push_task: None,
            _poll_task: None,
        }
    }

    /// Process incoming push notifications in a background task
    ///
    /// This is spawned as a separate tokio task in setup() so that
    /// handle_message() can process commands concurrently.
    async fn process_push_task(
        transport: Arc<Mutex<C>>,
        valves: ValvesMap<C>,
        to_engine: FromIntegrationSender,
    ) {
        loop {
            // Poll with a short lock hold time so command requests on the
            // shared transport are not starved
            let msg = {
                let mut transport_guard = transport.lock().await;
                tokio::time::timeout(Duration::from_millis(100), transport_guard.poll_push())
                .await
                .unwrap_or_default()
            };

            match msg {
                Some(msg) => {
                    if let Err(e) = Self::handle_push(msg, &valves, &to_engine).await {
                        warn!("Error handling push notification: {}", e);
                    }
                }
                None => {
                    // No push available, yield to allow other tasks (like command handling)
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Apply one push notification to the valve it belongs to (static
    /// version for the background task)
    async fn handle_push(
        msg: PushMessage,
        valves: &ValvesMap<C>,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let event = PushEvent::from_namespace(&msg.namespace, &msg.payload)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;

        let mut found = false;
        let mut update: Option<(String, ClimateState)> = None;

        {
            let valves_guard = valves.lock().await;
            for valve_arc in valves_guard.values() {
                let mut valve = valve_arc.lock().await;
                if valve.subdevice_id() == msg.subdevice_id {
                    found = true;
                    debug!("Push on {} for {}", msg.namespace, valve.id());
                    if valve.apply_push(event.clone()) {
                        update = Some((valve.id().to_string(), valve.climate_state()));
                    }
                    break;
                }
            }
        }

        if !found {
            debug!(
                "Push for unknown subdevice {} on {}",
                msg.subdevice_id, msg.namespace
            );
            return Ok(());
        }

        // The push payload is authoritative for the fields it carried, so
        // the display state is republished without a device query
        if let Some((entity_id, state)) = update {
            Self::report_state_static(&entity_id, state, to_engine).await;
        }

        Ok(())
    }

    /// Periodically re-run the status refresh for every valve
    async fn poll_refresh_task(
        valves: ValvesMap<C>,
        to_engine: FromIntegrationSender,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately and setup already refreshed everything
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let targets: Vec<Arc<Mutex<ValveClimate<C>>>> =
                { valves.lock().await.values().cloned().collect() };

            for valve_arc in targets {
                let mut valve = valve_arc.lock().await;
                valve.refresh().await;
                let entity_id = valve.id().to_string();
                let state = valve.climate_state();
                drop(valve);

                Self::report_state_static(&entity_id, state, &to_engine).await;
            }
        }
    }

    /// Register an entity with the engine (static version)
    async fn register_entity_static(entity_id: &str, to_engine: &FromIntegrationSender) {
        let msg = FromIntegrationMessage::EntityDiscovered {
            entity_id: entity_id.to_string(),
            integration_name: "meross".to_string(),
        };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send EntityDiscovered message: {}", e);
        } else {
            info!("Registered entity: {}", entity_id);
        }
    }

    /// Report a climate state change to the engine (static version)
    async fn report_state_static(
        entity_id: &str,
        state: ClimateState,
        to_engine: &FromIntegrationSender,
    ) {
        let msg = FromIntegrationMessage::ClimateStateChanged {
            entity_id: entity_id.to_string(),
            state,
        };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send ClimateStateChanged message: {}", e);
        }
    }
}

#[async_trait]
impl<C: CloudTransport + 'static> Integration for MerossIntegration<C> {
    fn name(&self) -> &str {
        "meross"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        // Store sender for sending events to engine
        self.to_engine = Some(tx.clone());

        info!(
            "Connecting to Meross cloud broker at {}:{}",
            self.config.broker, self.config.port
        );
        {
            let mut transport = self.transport.lock().await;
            transport
                .connect()
                .await
                .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        }
        info!("Connected to Meross cloud broker");

        // Build one climate entity per configured valve. Each gets one
        // refresh before it is announced to the engine.
        for device in &self.config.devices {
            let handle = ValveHandle::new(
                self.transport.clone(),
                device.uuid.clone(),
                device.subdevice_id.clone(),
            );
            let mut valve = ValveClimate::new(device, handle);
            valve.refresh().await;

            let entity_id = valve.id().to_string();
            let state = valve.climate_state();
            info!(
                "Configured valve entity: {} ({}, {})",
                valve.name(),
                entity_id,
                device.model
            );

            {
                let mut valves_guard = self.valves.lock().await;
                valves_guard.insert(entity_id.clone(), Arc::new(Mutex::new(valve)));
            }

            Self::register_entity_static(&entity_id, &tx).await;
            Self::report_state_static(&entity_id, state, &tx).await;
        }

        // Spawn background task to process push notifications
        let transport = self.transport.clone();
        let valves = self.valves.clone();
        let push_tx = tx.clone();
        self._push_task = Some(tokio::spawn(async move {
            Self::process_push_task(transport, valves, push_tx).await;
        }));

        // Spawn the periodic status poll
        let valves = self.valves.clone();
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        self._poll_task = Some(tokio::spawn(async move {
            Self::poll_refresh_task(valves, tx, interval).await;
        }));

        info!("Meross integration ready to handle commands");
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::ClimateCommand { entity_id, command } => {
                info!("Handling climate command for {}: {:?}", entity_id, command);

                let valve_arc = {
                    let valves_guard = self.valves.lock().await;
                    valves_guard.get(&entity_id).cloned()
                }
                .ok_or_else(|| -> Box<dyn Error + Send> {
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("Climate entity not found: {}", entity_id),
                    ))
                })?;

                let mut valve = valve_arc.lock().await;
                let result = match command {
                    ClimateCommand::SetTemperature { celsius } => {
                        valve.set_target_temperature(celsius).await
                    }
                    ClimateCommand::SetHvacMode { mode } => valve.set_hvac_mode(mode).await,
                    ClimateCommand::SetPreset { preset } => valve.set_preset_mode(&preset).await,
                };

                let state = valve.climate_state();
                drop(valve); // Release lock before async send

                // The mirror was updated optimistically; publish it even when
                // the command failed partway so the display follows the cache
                if let Some(to_engine) = &self.to_engine {
                    Self::report_state_static(&entity_id, state, to_engine).await;
                }

                result.map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Meross integration shutting down");
        if let Some(task) = self._push_task.take() {
            task.abort();
        }
        if let Some(task) = self._poll_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::ValveDeviceConfig;
    use crate::engine::HvacMode;
    use crate::integrations::meross::mode::HardwareVariant;
    use crate::integrations::meross::protocol::NS_MODE;
    use crate::integrations::meross::protocol::NS_STATUS;
    use crate::integrations::meross::protocol::NS_TEMPERATURE;
    use crate::integrations::meross::transport::MockTransport;

    fn config() -> MerossConfig {
        MerossConfig {
            broker: "mqtt.example".to_string(),
            port: 443,
            client_id: "merossd-test".to_string(),
            user_id: "123456".to_string(),
            key: "secret".to_string(),
            poll_interval_secs: 300,
            devices: vec![ValveDeviceConfig {
                uuid: "1812019999".to_string(),
                subdevice_id: "0000111122".to_string(),
                name: "Bedroom valve".to_string(),
                model: HardwareVariant::Mts100V3,
            }],
        }
    }

    fn status_payload() -> serde_json::Value {
        json!({
            "togglex": { "onoff": 1 },
            "mode": { "state": 3 },
            "temperature": { "room": 215, "currentSet": 220, "heating": 1 }
        })
    }

    #[tokio::test]
    async fn test_integration_creation() {
        let integration = MerossIntegration::new(MockTransport::new(), &config());
        assert_eq!(integration.name(), "meross");

        let valves = integration.valves.lock().await;
        assert_eq!(valves.len(), 0);
    }

    #[tokio::test]
    async fn test_setup_announces_entity_with_initial_state() {
        let mut transport = MockTransport::new();
        transport.respond(NS_STATUS, status_payload());

        let mut integration = MerossIntegration::new(transport, &config());
        let (tx, mut rx) = mpsc::channel(8);
        integration.setup(tx).await.unwrap();

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                assert_eq!(entity_id, "1812019999:0000111122");
                assert_eq!(integration_name, "meross");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ClimateStateChanged { entity_id, state } => {
                assert_eq!(entity_id, "1812019999:0000111122");
                assert!(state.available);
                assert_eq!(state.hvac_mode, HvacMode::Auto);
                assert_eq!(state.current_temperature, Some(21.5));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_forwards_and_publishes_optimistic_state() {
        let mut transport = MockTransport::new();
        transport.respond(NS_STATUS, status_payload());

        let mut integration = MerossIntegration::new(transport, &config());
        let (tx, mut rx) = mpsc::channel(8);
        integration.setup(tx).await.unwrap();
        rx.recv().await.unwrap(); // EntityDiscovered
        rx.recv().await.unwrap(); // initial state

        integration
            .handle_message(ToIntegrationMessage::ClimateCommand {
                entity_id: "1812019999:0000111122".to_string(),
                command: ClimateCommand::SetPreset {
                    preset: "Economy".to_string(),
                },
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ClimateStateChanged { state, .. } => {
                assert_eq!(state.preset.as_deref(), Some("Economy"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        {
            let transport = integration.transport.lock().await;
            let writes = transport.requests_on(NS_MODE);
            assert_eq!(writes.len(), 1);
            assert_eq!(writes[0].payload["state"], 4); // V3 Economy
        }

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_for_unknown_entity_fails() {
        let mut integration = MerossIntegration::new(MockTransport::new(), &config());
        let result = integration
            .handle_message(ToIntegrationMessage::ClimateCommand {
                entity_id: "climate.nowhere".to_string(),
                command: ClimateCommand::SetTemperature { celsius: 20.0 },
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_push_routes_to_valve_and_publishes_once() {
        let mut transport = MockTransport::new();
        transport.respond(NS_STATUS, status_payload());

        let mut integration = MerossIntegration::new(transport, &config());
        let (tx, mut rx) = mpsc::channel(8);
        integration.setup(tx.clone()).await.unwrap();
        rx.recv().await.unwrap(); // EntityDiscovered
        rx.recv().await.unwrap(); // initial state

        let push = PushMessage {
            subdevice_id: "0000111122".to_string(),
            namespace: NS_TEMPERATURE.to_string(),
            payload: json!({ "id": "0000111122", "room": 190, "currentSet": 205, "heating": 0 }),
        };
        MerossIntegration::<MockTransport>::handle_push(push, &integration.valves, &tx)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ClimateStateChanged { state, .. } => {
                assert_eq!(state.current_temperature, Some(19.0));
                assert_eq!(state.target_temperature, Some(20.5));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        // The push payload was authoritative; only the setup refresh queried
        // the device
        {
            let transport = integration.transport.lock().await;
            assert_eq!(transport.requests_on(NS_STATUS).len(), 1);
        }

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_for_unknown_subdevice_is_ignored() {
        let integration = MerossIntegration::new(MockTransport::new(), &config());
        let (tx, mut rx) = mpsc::channel(8);

        let push = PushMessage {
            subdevice_id: "ffffffffff".to_string(),
            namespace: NS_MODE.to_string(),
            payload: json!({ "id": "ffffffffff", "state": 2 }),
        };
        MerossIntegration::<MockTransport>::handle_push(push, &integration.valves, &tx)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
