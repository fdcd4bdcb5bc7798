pub mod api;
pub mod color;
pub mod config;
mod controller;
mod engine;
mod integrations;
pub mod sched;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use controller::CircadianController;
pub use controller::ControllerStatus;
pub use engine::ColorSetting;
pub use engine::CommandError;
pub use engine::Engine;
pub use engine::Event;
pub use engine::LightCommand;
pub use engine::LightState;
pub use engine::State;
