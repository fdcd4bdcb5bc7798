use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::MqttMessage;
use super::client::MqttTransport;
use super::discovery::DiscoveryMessage;
use super::discovery::parse_discovery_topic;
use super::light::Light;
use super::sensor::Sensor;
use crate::config::MqttConfig;
use crate::engine::CommandError;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::LightState;
use crate::engine::ToIntegrationMessage;

/// Shared entity maps, written by the message task and read on command
/// handling
type LightsMap = Arc<Mutex<HashMap<String, Light>>>;
type SensorsMap = Arc<Mutex<HashMap<String, Sensor>>>;

/// MQTT integration for circadiand
///
/// Talks Home Assistant-style MQTT discovery as emitted by Zigbee2MQTT:
/// discovered lights become controllable entities, discovered numeric
/// sensors feed the engine's sensor map (including the circadian sources).
pub struct MqttIntegration<T: MqttTransport> {
    transport: Arc<T>,
    config: MqttConfig,
    lights: LightsMap,
    sensors: SensorsMap,

    /// Handle to the background message processing task
    message_task: Option<JoinHandle<()>>,
}

impl<T: MqttTransport + 'static> MqttIntegration<T> {
    pub fn new(transport: T, config: &MqttConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config: config.clone(),
            lights: Arc::new(Mutex::new(HashMap::new())),
            sensors: Arc::new(Mutex::new(HashMap::new())),
            message_task: None,
        }
    }

    /// Drain the transport's message stream until it closes.
    ///
    /// Spawned as a separate task in setup() so that handle_message() can
    /// process commands concurrently.
    async fn process_messages(
        transport: Arc<T>,
        discovery_prefix: String,
        lights: LightsMap,
        sensors: SensorsMap,
        to_engine: FromIntegrationSender,
    ) {
        while let Some(msg) = transport.next_message().await {
            if msg.topic.ends_with("/config") {
                if let Err(e) = Self::handle_discovery(
                    &msg,
                    &transport,
                    &discovery_prefix,
                    &lights,
                    &sensors,
                    &to_engine,
                )
                .await
                {
                    warn!("Error handling discovery message: {}", e);
                }
            } else if let Err(e) =
                Self::handle_state_update(&msg, &lights, &sensors, &to_engine).await
            {
                warn!("Error handling state update: {}", e);
            }
        }

        info!("MQTT message stream closed");
    }

    async fn handle_discovery(
        msg: &MqttMessage,
        transport: &Arc<T>,
        discovery_prefix: &str,
        lights: &LightsMap,
        sensors: &SensorsMap,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let Some((component, node_id, object_id)) =
            parse_discovery_topic(&msg.topic, discovery_prefix)
        else {
            return Ok(());
        };

        debug!(
            "Discovery: component={}, node_id={}, object_id={}",
            component, node_id, object_id
        );

        match component.as_str() {
            "light" => {
                Self::handle_light_discovery(msg, transport, lights, to_engine, &node_id).await
            }
            "sensor" => {
                Self::handle_sensor_discovery(
                    msg, transport, sensors, to_engine, &node_id, &object_id,
                )
                .await
            }
            _ => {
                debug!("Ignoring unsupported component: {}", component);
                Ok(())
            }
        }
    }

    async fn handle_light_discovery(
        msg: &MqttMessage,
        transport: &Arc<T>,
        lights: &LightsMap,
        to_engine: &FromIntegrationSender,
        node_id: &str,
    ) -> Result<(), Box<dyn Error + Send>> {
        let entity_id = format!("light.{}", node_id);

        // An empty retained payload removes the entity
        if msg.payload.is_empty() {
            let removed = lights.lock().await.remove(&entity_id).is_some();
            if removed {
                info!("Removed light entity: {}", entity_id);
                to_engine
                    .send(FromIntegrationMessage::EntityRemoved { entity_id })
                    .await
                    .ok();
            }
            return Ok(());
        }

        let discovery: DiscoveryMessage = serde_json::from_slice(&msg.payload)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;

        let light = Light::from_discovery(discovery, entity_id.clone(), node_id.to_string())
            .map_err(invalid_data)?;

        let state_topic = light.state_topic.clone();
        info!("Discovered light entity: {} ({})", light.name, entity_id);

        lights.lock().await.insert(entity_id.clone(), light);

        // Subscribe after map insert so the retained state message finds the
        // entity already in the map, regardless of concurrency model.
        transport.subscribe(&state_topic).await?;

        to_engine
            .send(FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name: "mqtt".to_string(),
            })
            .await
            .ok();

        Ok(())
    }

    async fn handle_sensor_discovery(
        msg: &MqttMessage,
        transport: &Arc<T>,
        sensors: &SensorsMap,
        to_engine: &FromIntegrationSender,
        node_id: &str,
        object_id: &str,
    ) -> Result<(), Box<dyn Error + Send>> {
        let entity_id = format!("sensor.{}_{}", node_id, object_id);

        if msg.payload.is_empty() {
            let removed = sensors.lock().await.remove(&entity_id).is_some();
            if removed {
                info!("Removed sensor entity: {}", entity_id);
                to_engine
                    .send(FromIntegrationMessage::EntityRemoved { entity_id })
                    .await
                    .ok();
            }
            return Ok(());
        }

        let discovery: DiscoveryMessage = serde_json::from_slice(&msg.payload)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;

        let sensor = Sensor::from_discovery(
            discovery,
            entity_id.clone(),
            node_id.to_string(),
            object_id.to_string(),
        )
        .map_err(invalid_data)?;

        let state_topic = sensor.state_topic.clone();
        info!("Discovered sensor entity: {} ({})", sensor.name, entity_id);

        sensors.lock().await.insert(entity_id.clone(), sensor);

        transport.subscribe(&state_topic).await?;

        to_engine
            .send(FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name: "mqtt".to_string(),
            })
            .await
            .ok();

        Ok(())
    }

    async fn handle_state_update(
        msg: &MqttMessage,
        lights: &LightsMap,
        sensors: &SensorsMap,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        // Lights first; a state topic belongs to at most one light
        let mut light_update: Option<(String, LightState)> = None;
        {
            let mut guard = lights.lock().await;
            for (entity_id, light) in guard.iter_mut() {
                if msg.topic == light.state_topic {
                    debug!("State update for light: {}", entity_id);
                    light.update_state(&msg.payload).map_err(invalid_data)?;
                    light_update = Some((entity_id.clone(), light.state.clone()));
                    break;
                }
            }
        }

        if let Some((entity_id, state)) = light_update {
            to_engine
                .send(FromIntegrationMessage::LightStateChanged { entity_id, state })
                .await
                .ok();
            return Ok(());
        }

        // Several sensor entities can share one state topic (one device,
        // many value_template keys): update every match
        let mut sensor_updates: Vec<(String, f64)> = Vec::new();
        {
            let mut guard = sensors.lock().await;
            for (entity_id, sensor) in guard.iter_mut() {
                if msg.topic == sensor.state_topic {
                    debug!("State update for sensor: {}", entity_id);
                    if let Some(value) = sensor.update_state(&msg.payload).map_err(invalid_data)? {
                        sensor_updates.push((entity_id.clone(), value));
                    }
                }
            }
        }

        for (entity_id, value) in sensor_updates {
            to_engine
                .send(FromIntegrationMessage::SensorValueChanged { entity_id, value })
                .await
                .ok();
        }

        Ok(())
    }
}

/// Convert a non-Send entity error into the Send-able form the
/// integration boundary requires
fn invalid_data(e: Box<dyn Error>) -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}

#[async_trait]
impl<T: MqttTransport + 'static> Integration for MqttIntegration<T> {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        let discovery_topic = format!("{}/#", self.config.discovery_prefix);
        self.transport.subscribe(&discovery_topic).await?;
        info!("Subscribed to discovery topic {}", discovery_topic);

        self.message_task = Some(tokio::spawn(Self::process_messages(
            self.transport.clone(),
            self.config.discovery_prefix.clone(),
            self.lights.clone(),
            self.sensors.clone(),
            tx,
        )));

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        let ToIntegrationMessage::LightCommand { command, ack } = msg;

        // Resolve topic and payload under the lock; errors become strings
        // so nothing non-Send lives across the publish await
        let target = {
            let lights = self.lights.lock().await;
            match lights.get(&command.entity_id) {
                Some(light) => match light.command_payload(&command) {
                    Ok(payload) => Ok((light.command_topic.clone(), payload)),
                    Err(e) => Err(e.to_string()),
                },
                None => Err(format!("no discovered light named {}", command.entity_id)),
            }
        };

        match target {
            Ok((topic, payload)) => {
                debug!("Publishing command for {} to {}", command.entity_id, topic);
                let result = self
                    .transport
                    .publish(&topic, &payload)
                    .await
                    .map_err(|e| CommandError::Delivery(e.to_string()));
                if let Err(e) = &result {
                    warn!("Failed to deliver command for {}: {}", command.entity_id, e);
                }
                ack.send(result).ok();
            }
            Err(reason) => {
                warn!("Dropping command for {}: {}", command.entity_id, reason);
                ack.send(Err(CommandError::Delivery(reason))).ok();
            }
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        if let Some(task) = self.message_task.take() {
            task.abort();
        }
        info!("MQTT integration shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::oneshot;

    use super::super::client::MockTransport;
    use crate::engine::ColorSetting;
    use crate::engine::LightCommand;

    const LIGHT_DISCOVERY: &[u8] = br#"{
        "name": "Bulb",
        "unique_id": "0x1234_light",
        "state_topic": "zigbee2mqtt/bulb",
        "command_topic": "zigbee2mqtt/bulb/set",
        "brightness": true,
        "color_temp": true,
        "schema": "json"
    }"#;

    const SENSOR_DISCOVERY: &[u8] = br#"{
        "name": "Circadian color temperature",
        "unique_id": "circadian_ct",
        "state_topic": "circadian/state",
        "unit_of_measurement": "K",
        "value_template": "{{ value_json.color_temp }}"
    }"#;

    struct Fixture {
        transport: Arc<MockTransport>,
        lights: LightsMap,
        sensors: SensorsMap,
        rx: mpsc::Receiver<FromIntegrationMessage>,
        tx: FromIntegrationSender,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::channel(64);
        Fixture {
            transport: Arc::new(MockTransport::new()),
            lights: Arc::new(Mutex::new(HashMap::new())),
            sensors: Arc::new(Mutex::new(HashMap::new())),
            rx,
            tx,
        }
    }

    async fn drain_messages(f: &mut Fixture) {
        MqttIntegration::<MockTransport>::process_messages(
            f.transport.clone(),
            "homeassistant".to_string(),
            f.lights.clone(),
            f.sensors.clone(),
            f.tx.clone(),
        )
        .await;
    }

    #[tokio::test]
    async fn test_light_discovery_registers_and_subscribes() {
        let mut f = fixture();
        f.transport
            .push_message("homeassistant/light/0x1234/light/config", LIGHT_DISCOVERY)
            .await;

        drain_messages(&mut f).await;

        let lights = f.lights.lock().await;
        let light = lights.get("light.0x1234").expect("light registered");
        assert_eq!(light.command_topic, "zigbee2mqtt/bulb/set");
        assert!(light.supports_color_temp);

        let subs = f.transport.subscriptions.lock().unwrap().clone();
        assert!(subs.contains(&"zigbee2mqtt/bulb".to_string()));

        match f.rx.try_recv().unwrap() {
            FromIntegrationMessage::EntityDiscovered { entity_id, .. } => {
                assert_eq!(entity_id, "light.0x1234");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_light_state_update_reaches_engine() {
        let mut f = fixture();
        f.transport
            .push_message("homeassistant/light/0x1234/light/config", LIGHT_DISCOVERY)
            .await;
        f.transport
            .push_message(
                "zigbee2mqtt/bulb",
                br#"{"state": "ON", "brightness": 100, "color_temp": 400}"#,
            )
            .await;

        drain_messages(&mut f).await;

        f.rx.try_recv().unwrap(); // discovery
        match f.rx.try_recv().unwrap() {
            FromIntegrationMessage::LightStateChanged { entity_id, state } => {
                assert_eq!(entity_id, "light.0x1234");
                assert!(state.on);
                assert_eq!(state.brightness, Some(100));
                assert_eq!(state.color_temp, Some(400));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sensor_value_reaches_engine() {
        let mut f = fixture();
        f.transport
            .push_message(
                "homeassistant/sensor/circadian/color_temp/config",
                SENSOR_DISCOVERY,
            )
            .await;
        f.transport
            .push_message("circadian/state", br#"{"color_temp": 2700}"#)
            .await;

        drain_messages(&mut f).await;

        f.rx.try_recv().unwrap(); // discovery
        match f.rx.try_recv().unwrap() {
            FromIntegrationMessage::SensorValueChanged { entity_id, value } => {
                assert_eq!(entity_id, "sensor.circadian_color_temp");
                assert_eq!(value, 2700.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_discovery_payload_removes_entity() {
        let mut f = fixture();
        f.transport
            .push_message("homeassistant/light/0x1234/light/config", LIGHT_DISCOVERY)
            .await;
        f.transport
            .push_message("homeassistant/light/0x1234/light/config", b"")
            .await;

        drain_messages(&mut f).await;

        assert!(f.lights.lock().await.is_empty());

        f.rx.try_recv().unwrap(); // discovery
        assert!(matches!(
            f.rx.try_recv().unwrap(),
            FromIntegrationMessage::EntityRemoved { .. }
        ));
    }

    #[tokio::test]
    async fn test_command_publishes_payload_and_acks() {
        let mut f = fixture();
        f.transport
            .push_message("homeassistant/light/0x1234/light/config", LIGHT_DISCOVERY)
            .await;
        drain_messages(&mut f).await;

        let config = MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            username: None,
            password: None,
        };
        let mut integration = MqttIntegration {
            transport: f.transport.clone(),
            config,
            lights: f.lights.clone(),
            sensors: f.sensors.clone(),
            message_task: None,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::LightCommand {
                command: LightCommand {
                    entity_id: "light.0x1234".to_string(),
                    on: true,
                    brightness: Some(200),
                    color: Some(ColorSetting::ColorTemp(350)),
                    transition: Some(60.0),
                },
                ack: ack_tx,
            })
            .await
            .unwrap();

        assert!(ack_rx.await.unwrap().is_ok());

        let published = f.transport.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "zigbee2mqtt/bulb/set");

        let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(json["state"], "ON");
        assert_eq!(json["color_temp"], 350);
        assert_eq!(json["brightness"], 200);
    }

    #[tokio::test]
    async fn test_command_for_unknown_light_acks_error() {
        let f = fixture();
        let config = MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            username: None,
            password: None,
        };
        let mut integration = MqttIntegration {
            transport: f.transport.clone(),
            config,
            lights: f.lights.clone(),
            sensors: f.sensors.clone(),
            message_task: None,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::LightCommand {
                command: LightCommand {
                    entity_id: "light.ghost".to_string(),
                    on: true,
                    brightness: None,
                    color: None,
                    transition: None,
                },
                ack: ack_tx,
            })
            .await
            .unwrap();

        assert!(matches!(
            ack_rx.await.unwrap(),
            Err(CommandError::Delivery(_))
        ));
        assert!(f.transport.published.lock().unwrap().is_empty());
    }
}
