use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// State of a light entity as last reported by its integration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightState {
    /// Whether the light is on or off.
    pub on: bool,

    /// Brightness level (0-255), if supported.
    pub brightness: Option<u8>,

    /// Color temperature in mireds, if supported.
    pub color_temp: Option<u16>,
}

/// Centralized snapshot of everything circadiand has observed.
///
/// Readers load the snapshot Arc; the engine stores a new one on every
/// change. The scheduling core only ever sees this structural view, never
/// an integration's own types.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub lights: HashMap<String, LightState>,

    /// Latest numeric value per sensor entity (the circadian sources)
    pub sensors: HashMap<String, f64>,
}
