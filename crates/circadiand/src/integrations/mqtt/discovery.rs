use serde::Deserialize;
use serde::Serialize;

/// Deserialize a field that can be either a string or an integer.
///
/// Zigbee2MQTT sends version fields like `sw_version` as integers, but the
/// Home Assistant discovery schema defines them as strings. This helper
/// accepts both types and converts integers to strings.
fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrInt;

    impl<'de> de::Visitor<'de> for StringOrInt {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string, integer, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrInt)
}

/// Discovery payload published on `{prefix}/{component}/{node}/{object}/config`
///
/// Based on Home Assistant's MQTT discovery protocol as emitted by
/// Zigbee2MQTT. Only the fields circadiand acts on are modeled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryMessage {
    /// Human-readable name of the entity
    pub name: Option<String>,

    /// Unique identifier for this entity
    pub unique_id: Option<String>,

    /// Topic to receive state updates
    pub state_topic: Option<String>,

    /// Topic to send commands (lights)
    pub command_topic: Option<String>,

    /// Whether brightness is supported (lights)
    pub brightness: Option<bool>,

    /// Whether color temperature is supported (lights, legacy flag)
    pub color_temp: Option<bool>,

    /// Supported color modes (lights, e.g. ["color_temp", "xy"])
    pub supported_color_modes: Option<Vec<String>>,

    /// Device class (sensors, e.g. "illuminance")
    pub device_class: Option<String>,

    /// Unit for sensor values (e.g. "K", "lx")
    pub unit_of_measurement: Option<String>,

    /// Template extracting the value from a JSON payload,
    /// e.g. "{{ value_json.illuminance }}"
    pub value_template: Option<String>,

    /// Schema type (lights; Zigbee2MQTT uses "json")
    pub schema: Option<String>,

    /// Device information
    pub device: Option<DeviceInfo>,
}

/// Device information from a discovery payload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    /// List of identifiers for this device
    pub identifiers: Vec<String>,

    /// Device name
    pub name: Option<String>,

    /// Manufacturer name
    pub manufacturer: Option<String>,

    /// Model name
    pub model: Option<String>,

    /// Software version (can be string or integer in Zigbee2MQTT)
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub sw_version: Option<String>,
}

/// Parse a discovery topic into component type, node_id and object_id
///
/// Topic format: {prefix}/{component}/{node_id}/{object_id}/config
/// Example: homeassistant/light/0x00124b001234abcd/light/config
pub fn parse_discovery_topic(topic: &str, prefix: &str) -> Option<(String, String, String)> {
    let without_prefix = topic.strip_prefix(prefix)?.strip_prefix('/')?;

    let parts: Vec<&str> = without_prefix.split('/').collect();

    // component/node_id/object_id/config
    if parts.len() < 4 || parts.last() != Some(&"config") {
        return None;
    }

    Some((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
    ))
}
