pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::LogLevel;
pub use engine::ClimateCommand;
pub use engine::ClimateState;
pub use engine::Engine;
pub use engine::Event;
pub use engine::HvacAction;
pub use engine::HvacMode;
pub use engine::State;
pub use integrations::meross::HardwareVariant;
