use std::error::Error;

use crate::integrations::mqtt::discovery::DiscoveryMessage;

/// Numeric sensor entity backed by an MQTT topic.
///
/// The circadian sources (color temperature, brightness factor) arrive as
/// sensors like any other; the controller picks out the configured ones by
/// entity id.
#[derive(Debug, Clone)]
pub struct Sensor {
    /// Entity ID (e.g., "sensor.circadian_color_temp")
    #[allow(dead_code)]
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Unique identifier from the discovery payload
    #[allow(dead_code)]
    pub unique_id: String,

    /// Last reported value
    pub value: Option<f64>,

    /// Topic to receive state updates
    pub state_topic: String,

    /// JSON key to extract the value from, parsed from the discovery
    /// value_template; a bare numeric payload is used as-is when absent
    value_key: Option<String>,
}

impl Sensor {
    /// Create a Sensor entity from a discovery message
    pub fn from_discovery(
        discovery: DiscoveryMessage,
        id: String,
        node_id: String,
        object_id: String,
    ) -> Result<Self, Box<dyn Error>> {
        let unique_id = discovery
            .unique_id
            .unwrap_or_else(|| format!("{}_{}", node_id, object_id));

        let name = discovery
            .name
            .unwrap_or_else(|| format!("Sensor {} {}", node_id, object_id));

        let state_topic = discovery
            .state_topic
            .ok_or("Missing state_topic in discovery message")?;

        let value_key = discovery
            .value_template
            .as_deref()
            .and_then(parse_value_template_key)
            .map(str::to_string);

        Ok(Self {
            id,
            name,
            unique_id,
            value: None,
            state_topic,
            value_key,
        })
    }

    /// Update the sensor from an MQTT payload.
    ///
    /// Returns the new value if one could be extracted. Payloads are
    /// either a JSON object addressed by the value_template key, or a bare
    /// number (possibly as a string).
    pub fn update_state(&mut self, payload: &[u8]) -> Result<Option<f64>, Box<dyn Error>> {
        let parsed: serde_json::Value = serde_json::from_slice(payload)?;

        let raw = match &self.value_key {
            Some(key) => parsed.get(key).cloned(),
            None => Some(parsed),
        };

        let value = raw.as_ref().and_then(numeric_value);
        if let Some(value) = value {
            self.value = Some(value);
        }

        Ok(value)
    }
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract the JSON key from a Zigbee2MQTT value template
///
/// e.g. "{{ value_json.illuminance }}" -> Some("illuminance")
fn parse_value_template_key(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    inner.strip_prefix("value_json.").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(value_template: Option<&str>) -> DiscoveryMessage {
        DiscoveryMessage {
            name: Some("Circadian color temperature".to_string()),
            unique_id: Some("circadian_ct".to_string()),
            state_topic: Some("circadian/state".to_string()),
            command_topic: None,
            brightness: None,
            color_temp: None,
            supported_color_modes: None,
            device_class: Some("temperature".to_string()),
            unit_of_measurement: Some("K".to_string()),
            value_template: value_template.map(str::to_string),
            schema: None,
            device: None,
        }
    }

    fn sensor(value_template: Option<&str>) -> Sensor {
        Sensor::from_discovery(
            discovery(value_template),
            "sensor.circadian_color_temp".to_string(),
            "circadian".to_string(),
            "color_temp".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_update_state_with_template_key() {
        let mut sensor = sensor(Some("{{ value_json.color_temp }}"));

        let value = sensor
            .update_state(br#"{"color_temp": 3200.5, "brightness": 0.8}"#)
            .unwrap();

        assert_eq!(value, Some(3200.5));
        assert_eq!(sensor.value, Some(3200.5));
    }

    #[test]
    fn test_update_state_bare_number() {
        let mut sensor = sensor(None);

        assert_eq!(sensor.update_state(b"2700").unwrap(), Some(2700.0));
    }

    #[test]
    fn test_update_state_numeric_string() {
        let mut sensor = sensor(Some("{{ value_json.factor }}"));

        let value = sensor.update_state(br#"{"factor": "0.75"}"#).unwrap();
        assert_eq!(value, Some(0.75));
    }

    #[test]
    fn test_update_state_missing_key_keeps_last_value() {
        let mut sensor = sensor(Some("{{ value_json.color_temp }}"));
        sensor.update_state(br#"{"color_temp": 3000}"#).unwrap();

        let value = sensor.update_state(br#"{"brightness": 1}"#).unwrap();
        assert_eq!(value, None);
        assert_eq!(sensor.value, Some(3000.0));
    }

    #[test]
    fn test_parse_value_template_key() {
        assert_eq!(
            parse_value_template_key("{{ value_json.illuminance }}"),
            Some("illuminance")
        );
        assert_eq!(
            parse_value_template_key("{{value_json.color_temp}}"),
            Some("color_temp")
        );
        assert_eq!(parse_value_template_key("invalid"), None);
        assert_eq!(parse_value_template_key("{{ something_else }}"), None);
    }
}
