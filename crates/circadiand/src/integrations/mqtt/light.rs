use std::error::Error;

use crate::engine::ColorSetting;
use crate::engine::LightCommand;
use crate::engine::LightState;
use crate::integrations::mqtt::discovery::DiscoveryMessage;

/// Light entity backed by a Zigbee2MQTT device
#[derive(Debug, Clone)]
pub struct Light {
    /// Entity ID (e.g., "light.living_room")
    #[allow(dead_code)]
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Unique identifier from Zigbee2MQTT
    #[allow(dead_code)]
    pub unique_id: String,

    /// Last reported state of the light
    pub state: LightState,

    /// Topic to receive state updates
    pub state_topic: String,

    /// Topic to send commands
    pub command_topic: String,

    /// Whether brightness is supported
    pub supports_brightness: bool,

    /// Whether color temperature is supported
    pub supports_color_temp: bool,
}

impl Light {
    /// Create a Light entity from a Zigbee2MQTT discovery message
    pub fn from_discovery(
        discovery: DiscoveryMessage,
        id: String,
        node_id: String,
    ) -> Result<Self, Box<dyn Error>> {
        let unique_id = discovery
            .unique_id
            .unwrap_or_else(|| format!("{}_light", node_id));

        let name = discovery
            .name
            .unwrap_or_else(|| format!("Light {}", node_id));

        let state_topic = discovery
            .state_topic
            .ok_or("Missing state_topic in discovery message")?;

        let command_topic = discovery
            .command_topic
            .ok_or("Missing command_topic in discovery message")?;

        let supports_brightness = discovery.brightness.unwrap_or(false);

        // Either the legacy flag or a declared color mode counts
        let supports_color_temp = discovery.color_temp.unwrap_or(false)
            || discovery
                .supported_color_modes
                .as_ref()
                .is_some_and(|modes| modes.iter().any(|mode| mode == "color_temp"));

        Ok(Self {
            id,
            name,
            unique_id,
            state: LightState::default(),
            state_topic,
            command_topic,
            supports_brightness,
            supports_color_temp,
        })
    }

    /// Update the light state from an MQTT payload
    ///
    /// Zigbee2MQTT sends state updates as JSON, e.g.:
    /// {"state": "ON", "brightness": 128, "color_temp": 350}
    pub fn update_state(&mut self, payload: &[u8]) -> Result<(), Box<dyn Error>> {
        let state_update: serde_json::Value = serde_json::from_slice(payload)?;

        if let Some(state_str) = state_update.get("state").and_then(|v| v.as_str()) {
            self.state.on = state_str == "ON";
        }

        if self.supports_brightness {
            if let Some(brightness) = state_update.get("brightness").and_then(|v| v.as_u64()) {
                self.state.brightness = Some(brightness.min(255) as u8);
            }
        }

        if self.supports_color_temp {
            if let Some(color_temp) = state_update.get("color_temp").and_then(|v| v.as_u64()) {
                self.state.color_temp = Some(color_temp.min(u64::from(u16::MAX)) as u16);
            }
        }

        Ok(())
    }

    /// Generate the Zigbee2MQTT set-payload for a light command
    pub fn command_payload(&self, command: &LightCommand) -> Result<Vec<u8>, Box<dyn Error>> {
        let mut payload = serde_json::json!({
            "state": if command.on { "ON" } else { "OFF" }
        });

        if self.supports_brightness {
            if let Some(brightness) = command.brightness {
                payload["brightness"] = serde_json::json!(brightness);
            }
        }

        match command.color {
            Some(ColorSetting::ColorTemp(mireds)) if self.supports_color_temp => {
                payload["color_temp"] = serde_json::json!(mireds);
            }
            Some(ColorSetting::ColorTemp(_)) | None => {}
            Some(ColorSetting::Rgb(r, g, b)) => {
                payload["color"] = serde_json::json!({ "r": r, "g": g, "b": b });
            }
            Some(ColorSetting::Xy(x, y)) => {
                payload["color"] = serde_json::json!({ "x": x, "y": y });
            }
        }

        if let Some(transition) = command.transition {
            payload["transition"] = serde_json::json!(transition);
        }

        Ok(serde_json::to_vec(&payload)?)
    }
}
