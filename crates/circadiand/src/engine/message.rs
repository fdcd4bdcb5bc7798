//! Type-safe message system for circadiand
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::error::CommandError;
use super::state::LightState;

/// Wire representation of a color target.
///
/// Exactly one representation per command; which one is used is decided by
/// the light group's configured color mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorSetting {
    /// Color temperature in mireds
    ColorTemp(u16),

    /// RGB triple
    Rgb(u8, u8, u8),

    /// CIE 1931 xy coordinates
    Xy(f64, f64),
}

/// A desired state change for one light, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    pub entity_id: String,

    /// Target power state
    pub on: bool,

    /// Brightness level (0-255); absent leaves brightness alone
    pub brightness: Option<u8>,

    /// Color target; absent leaves color alone
    pub color: Option<ColorSetting>,

    /// Transition duration hint in seconds
    pub transition: Option<f64>,
}

/// Completion channel for a dispatched command.
///
/// The integration sends exactly once, after the underlying transport has
/// accepted (or failed) the command.
pub type CommandAck = oneshot::Sender<Result<(), CommandError>>;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
    },

    /// An entity was removed (device unplugged, etc.)
    EntityRemoved { entity_id: String },

    /// A light's reported state changed
    LightStateChanged {
        entity_id: String,
        state: LightState,
    },

    /// A sensor reported a new numeric value
    SensorValueChanged { entity_id: String, value: f64 },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Command to change a light's state, acknowledged on delivery
    LightCommand {
        command: LightCommand,
        ack: CommandAck,
    },
}
