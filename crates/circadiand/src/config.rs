//! Configuration file parsing and structures.
//!
//! circadiand uses TOML for declarative configuration: logging, the optional
//! HTTP API, the scheduler constants, the circadian controller (sources,
//! transitions, light groups) and the native integrations.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    pub circadian: CircadianConfig,

    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Address to listen on (e.g., "127.0.0.1")
    #[serde(default = "default_api_listen")]
    pub listen: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8533
}

/// Constants consumed by the scheduling core.
///
/// The dispatch-worthiness threshold is deliberately not configurable; see
/// `sched::DISPATCH_THRESHOLD`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on dispatched light commands per second
    #[serde(default = "default_actions_per_second")]
    pub actions_per_second: u32,

    /// Color temperature range (mireds) used to normalize color differences
    #[serde(default = "ColorTempRange::default")]
    pub color_temp_range: ColorTempRange,

    /// Brightness range (0-255 scale) used to normalize brightness differences
    #[serde(default = "BrightnessRange::default")]
    pub brightness_range: BrightnessRange,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            actions_per_second: default_actions_per_second(),
            color_temp_range: ColorTempRange::default(),
            brightness_range: BrightnessRange::default(),
        }
    }
}

fn default_actions_per_second() -> u32 {
    5
}

/// Color temperature range in mireds
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ColorTempRange {
    pub min: u16,
    pub max: u16,
}

impl ColorTempRange {
    /// Width of the range, for normalization
    pub fn span(&self) -> f64 {
        f64::from(self.max) - f64::from(self.min)
    }

    pub fn clamp(&self, mireds: u16) -> u16 {
        mireds.clamp(self.min, self.max)
    }
}

impl Default for ColorTempRange {
    fn default() -> Self {
        // Zigbee2MQTT's usual tunable-white span
        Self { min: 153, max: 500 }
    }
}

/// Brightness range on the 0-255 command scale
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct BrightnessRange {
    pub min: u8,
    pub max: u8,
}

impl BrightnessRange {
    /// Width of the range, for normalization
    pub fn span(&self) -> f64 {
        f64::from(self.max) - f64::from(self.min)
    }
}

impl Default for BrightnessRange {
    fn default() -> Self {
        Self { min: 1, max: 254 }
    }
}

/// Circadian controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircadianConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Sensor entity reporting the target color temperature in Kelvin
    pub color_temp_source: String,

    /// Sensor entity reporting the target brightness as a 0-1 factor
    pub brightness_source: String,

    /// Transition (seconds) used when a light first turns on
    #[serde(default = "default_initial_transition")]
    pub initial_transition: f64,

    /// Transition (seconds) used for periodic adjustments
    #[serde(default = "default_transition")]
    pub transition: f64,

    pub groups: Vec<GroupConfig>,
}

fn default_name() -> String {
    "Circadian Lighting".to_string()
}

fn default_initial_transition() -> f64 {
    1.0
}

fn default_transition() -> f64 {
    60.0
}

/// A group of lights sharing a color mode and brightness policy
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// Light entity ids under management (e.g., "light.living_room")
    pub lights: Vec<String>,

    /// How the color target is expressed on the wire
    #[serde(default)]
    pub color_mode: ColorMode,

    /// Whether brightness follows the brightness source
    #[serde(default = "default_brightness_adjust")]
    pub brightness_adjust: bool,

    /// Lower bound for derived brightness, percent
    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,

    /// Upper bound for derived brightness, percent
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u8,

    /// Only adjust these lights when they turn on, never periodically
    #[serde(default)]
    pub only_once: bool,
}

fn default_brightness_adjust() -> bool {
    true
}

fn default_min_brightness() -> u8 {
    1
}

fn default_max_brightness() -> u8 {
    100
}

/// Wire representation for a group's color target
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColorMode {
    /// Color temperature in mireds
    #[default]
    Ct,
    /// RGB triple derived from the color temperature
    Rgb,
    /// CIE xy coordinates derived from the color temperature
    Xy,
}

/// Integration configuration container
#[derive(Debug, Deserialize)]
pub struct IntegrationsConfig {
    /// Native MQTT integration (Zigbee2MQTT over Home Assistant discovery)
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

/// Native MQTT integration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    /// Discovery prefix (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "circadiand".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.actions_per_second == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.actions_per_second must be at least 1".to_string(),
            ));
        }

        let ct = &self.scheduler.color_temp_range;
        if ct.min >= ct.max {
            return Err(ConfigError::Invalid(format!(
                "scheduler.color_temp_range: min ({}) must be below max ({})",
                ct.min, ct.max
            )));
        }

        let bri = &self.scheduler.brightness_range;
        if bri.min >= bri.max {
            return Err(ConfigError::Invalid(format!(
                "scheduler.brightness_range: min ({}) must be below max ({})",
                bri.min, bri.max
            )));
        }

        if self.circadian.groups.is_empty() {
            return Err(ConfigError::Invalid(
                "circadian.groups must contain at least one group".to_string(),
            ));
        }

        for (idx, group) in self.circadian.groups.iter().enumerate() {
            if group.lights.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "circadian.groups[{idx}]: lights must not be empty"
                )));
            }
            if group.min_brightness > group.max_brightness {
                return Err(ConfigError::Invalid(format!(
                    "circadian.groups[{idx}]: min_brightness ({}) exceeds max_brightness ({})",
                    group.min_brightness, group.max_brightness
                )));
            }
            if group.max_brightness > 100 {
                return Err(ConfigError::Invalid(format!(
                    "circadian.groups[{idx}]: max_brightness ({}) is a percentage and must be <= 100",
                    group.max_brightness
                )));
            }
        }

        if self.circadian.initial_transition < 0.0 || self.circadian.transition < 0.0 {
            return Err(ConfigError::Invalid(
                "circadian transitions must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [circadian]
            color_temp_source = "sensor.circadian_color_temp"
            brightness_source = "sensor.circadian_brightness"

            [[circadian.groups]]
            lights = ["light.living_room"]

            [integrations]

            [integrations.mqtt]
            broker = "localhost"
        "#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.scheduler.actions_per_second, 5);
        assert_eq!(config.scheduler.color_temp_range, ColorTempRange { min: 153, max: 500 });
        assert_eq!(config.circadian.name, "Circadian Lighting");
        assert_eq!(config.circadian.transition, 60.0);

        let group = &config.circadian.groups[0];
        assert_eq!(group.color_mode, ColorMode::Ct);
        assert!(group.brightness_adjust);
        assert!(!group.only_once);
        assert_eq!(group.min_brightness, 1);
        assert_eq!(group.max_brightness, 100);

        let mqtt = config.integrations.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.discovery_prefix, "homeassistant");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [api]
            listen = "0.0.0.0"
            port = 9000

            [scheduler]
            actions_per_second = 10

            [scheduler.color_temp_range]
            min = 200
            max = 454

            [circadian]
            name = "Upstairs"
            color_temp_source = "sensor.ct"
            brightness_source = "sensor.bri"
            initial_transition = 0.5
            transition = 30.0

            [[circadian.groups]]
            lights = ["light.bedroom", "light.hall"]
            color_mode = "rgb"
            min_brightness = 20
            max_brightness = 80
            only_once = true

            [[circadian.groups]]
            lights = ["light.office"]
            color_mode = "xy"
            brightness_adjust = false

            [integrations]

            [integrations.mqtt]
            broker = "mqtt.local"
            port = 8883
            client_id = "circadiand-test"
            username = "circadian"
            password = "hunter2"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.api.as_ref().unwrap().port, 9000);
        assert_eq!(config.scheduler.actions_per_second, 10);
        assert_eq!(config.circadian.groups.len(), 2);
        assert_eq!(config.circadian.groups[0].color_mode, ColorMode::Rgb);
        assert!(config.circadian.groups[0].only_once);
        assert!(!config.circadian.groups[1].brightness_adjust);
        assert_eq!(
            config.integrations.mqtt.as_ref().unwrap().username.as_deref(),
            Some("circadian")
        );
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.scheduler.actions_per_second = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_color_range() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.scheduler.color_temp_range = ColorTempRange { min: 500, max: 153 };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.circadian.groups[0].lights.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_brightness_over_100_percent() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.circadian.groups[0].max_brightness = 120;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_color_mode_display() {
        assert_eq!(ColorMode::Ct.to_string(), "ct");
        assert_eq!(ColorMode::Rgb.to_string(), "rgb");
        assert_eq!(ColorMode::Xy.to_string(), "xy");
    }
}
