use tracing::error;
use tracing::warn;

use super::handle::HandleError;
use super::handle::ValveHandle;
use super::mode::DeviceMode;
use super::mode::HardwareVariant;
use super::mode::ModeError;
use super::protocol::PushEvent;
use super::protocol::TemperatureReport;
use super::protocol::decode_tenths;
use super::transport::CloudTransport;
use super::transport::TransportError;
use crate::config::ValveDeviceConfig;
use crate::engine::ClimateState;
use crate::engine::HvacAction;
use crate::engine::HvacMode;

/// Capability flag: the entity accepts a target temperature
pub const SUPPORT_TARGET_TEMPERATURE: u32 = 1 << 0;

/// Capability flag: the entity accepts vendor presets
pub const SUPPORT_PRESET_MODE: u32 = 1 << 1;

/// Granularity of the target temperature control
pub const TARGET_TEMPERATURE_STEP: f64 = 0.5;

/// Display unit for all temperatures
pub const TEMPERATURE_UNIT: &str = "°C";

/// Sentinel preset name shown before any mode has been decoded
pub const PRESET_NONE: &str = "none";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Mode(#[from] ModeError),
}

/// Climate entity backed by one valve subdevice.
///
/// Holds a best-effort cache of the device's last known attributes so
/// property getters answer without a network round trip. The device is the
/// source of truth; the cache may be stale between refreshes and is updated
/// by refreshes, push notifications, and command side effects.
pub struct ValveClimate<C> {
    /// Entity id, `uuid:subdevice_id`
    id: String,

    /// Human-readable name
    name: String,

    /// Hardware variant, resolved once from the configured model tag
    variant: HardwareVariant,

    handle: ValveHandle<C>,

    /// Capability flags
    flags: u32,

    // Mirrored device state
    online: bool,
    is_on: Option<bool>,
    mode: Option<DeviceMode>,
    current_temperature: Option<f64>,
    target_temperature: Option<f64>,
    heating: Option<bool>,
}

impl<C: CloudTransport> ValveClimate<C> {
    pub fn new(device: &ValveDeviceConfig, handle: ValveHandle<C>) -> Self {
        Self {
            id: format!("{}:{}", device.uuid, device.subdevice_id),
            name: device.name.clone(),
            variant: device.model,
            handle,
            flags: SUPPORT_TARGET_TEMPERATURE | SUPPORT_PRESET_MODE,
            online: false,
            is_on: None,
            mode: None,
            current_temperature: None,
            target_temperature: None,
            heating: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subdevice_id(&self) -> &str {
        self.handle.subdevice_id()
    }

    pub fn supported_features(&self) -> u32 {
        self.flags
    }

    /// Synchronize the mirrored state with a fresh status snapshot.
    ///
    /// Any failure (unreachable device, malformed payload, undecodable mode)
    /// marks the entity unavailable, leaves the other mirrored fields as they
    /// were, and is not surfaced to the caller.
    pub async fn refresh(&mut self) {
        match self.try_refresh().await {
            Ok(()) => self.online = true,
            Err(e) => {
                error!("Failed to update state of {}: {}", self.name, e);
                self.online = false;
            }
        }
    }

    async fn try_refresh(&mut self) -> Result<(), RefreshError> {
        let status = self.handle.get_status().await?;
        // Decode before mutating so a bad snapshot changes nothing
        let mode = DeviceMode::decode(self.variant, status.mode.state)?;

        self.is_on = Some(status.togglex.onoff == 1);
        self.mode = Some(mode);
        self.apply_temperature(&status.temperature);
        Ok(())
    }

    fn apply_temperature(&mut self, report: &TemperatureReport) {
        self.current_temperature = Some(decode_tenths(report.room));
        self.target_temperature = Some(decode_tenths(report.current_set));
        self.heating = Some(report.heating == 1);
    }

    /// Apply a push notification to the mirrored state.
    ///
    /// Returns true when the event was recognized and the displayed state
    /// should be republished; the event payload is authoritative for the
    /// fields it carries, so no device query is needed.
    pub fn apply_push(&mut self, event: PushEvent) -> bool {
        match event {
            PushEvent::TemperatureChange(report) => {
                self.apply_temperature(&report);
                true
            }
            PushEvent::ModeChange { state } => match DeviceMode::decode(self.variant, state) {
                Ok(mode) => {
                    self.mode = Some(mode);
                    true
                }
                Err(e) => {
                    warn!("Ignoring mode push for {}: {}", self.id, e);
                    false
                }
            },
            PushEvent::Other(namespace) => {
                warn!("Unhandled/ignored push event {} for {}", namespace, self.id);
                false
            }
        }
    }

    // Property surface

    /// The entity is available while the last contact succeeded
    pub fn available(&self) -> bool {
        self.online
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temperature
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.target_temperature
    }

    pub fn target_temperature_step(&self) -> f64 {
        TARGET_TEMPERATURE_STEP
    }

    pub fn temperature_unit(&self) -> &'static str {
        TEMPERATURE_UNIT
    }

    /// Displayed operating mode. Power-off dominates; an on device with a
    /// mode that never decoded displays as Heat.
    pub fn hvac_mode(&self) -> HvacMode {
        if self.is_on != Some(true) {
            return HvacMode::Off;
        }
        match self.mode {
            Some(mode) => mode.hvac_mode(),
            None => HvacMode::Heat,
        }
    }

    /// Displayed activity. Power-off dominates here too.
    pub fn hvac_action(&self) -> HvacAction {
        if self.is_on != Some(true) {
            HvacAction::Off
        } else if self.heating == Some(true) {
            HvacAction::Heating
        } else {
            HvacAction::Idle
        }
    }

    /// Name of the mirrored vendor mode
    pub fn preset_mode(&self) -> String {
        match self.mode {
            Some(mode) => mode.name(),
            None => PRESET_NONE.to_string(),
        }
    }

    /// All preset names of this device's enumeration
    pub fn preset_modes(&self) -> Vec<String> {
        self.variant.preset_names()
    }

    // Commands. Each performs the external side effect first, then updates
    // the mirrored state instead of waiting for a confirming refresh; the
    // device acknowledgement is too slow for a responsive UI.

    /// Forward a new setpoint. No local range validation.
    pub async fn set_target_temperature(&mut self, celsius: f64) -> Result<(), CommandError> {
        self.handle.set_target_temperature(celsius).await?;
        Ok(())
    }

    pub async fn set_hvac_mode(&mut self, mode: HvacMode) -> Result<(), CommandError> {
        match mode {
            HvacMode::Off => {
                self.handle.turn_off().await?;
                self.is_on = Some(false);
                Ok(())
            }
            HvacMode::Heat | HvacMode::Auto => {
                // Mirrored on regardless of how the power-on turns out
                self.is_on = Some(true);

                match self.handle.turn_on().await {
                    Ok(()) => {
                        if let Some(target) = self.variant.mode_for(mode) {
                            self.handle.set_mode(target).await?;
                            self.mode = Some(target);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        // The next refresh or push reconciles the mirror
                        warn!("Power-on of {} not acknowledged: {}", self.name, e);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Set a vendor preset by name. An unknown name is an error for the
    /// caller and performs no side effect.
    pub async fn set_preset_mode(&mut self, preset: &str) -> Result<(), CommandError> {
        let target = self.variant.preset_named(preset)?;
        self.handle.set_mode(target).await?;
        self.mode = Some(target);
        Ok(())
    }

    /// Project the mirrored state into the engine's climate vocabulary
    pub fn climate_state(&self) -> ClimateState {
        ClimateState {
            available: self.online,
            hvac_mode: self.hvac_mode(),
            hvac_action: self.hvac_action(),
            current_temperature: self.current_temperature,
            target_temperature: self.target_temperature,
            preset: self.mode.map(DeviceMode::name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Mode(#[from] ModeError),
}
