#[allow(clippy::module_inception)]
mod engine;
mod error;
mod event;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use error::CommandError;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::ColorSetting;
pub use message::CommandAck;
pub use message::FromIntegrationMessage;
pub use message::LightCommand;
pub use message::ToIntegrationMessage;
pub use state::LightState;
pub use state::State;
