mod engine;
mod event;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::ClimateCommand;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::ClimateState;
pub use state::HvacAction;
pub use state::HvacMode;
pub use state::State;
