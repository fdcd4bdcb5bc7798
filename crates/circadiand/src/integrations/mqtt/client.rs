use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::config::MqttConfig;

/// MQTT message received from a subscription
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Transport seam between the integration logic and the broker.
///
/// The production implementation wraps rumqttc; tests use a mock so the
/// discovery/state/command paths can be exercised without a broker.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Subscribe to an MQTT topic (wildcards allowed)
    async fn subscribe(&self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// Publish a message to an MQTT topic
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Box<dyn Error + Send>>;

    /// Next message from any subscribed topic
    ///
    /// Returns None once the transport has closed.
    async fn next_message(&self) -> Option<MqttMessage>;
}

/// Mock transport for testing
#[cfg(test)]
#[derive(Default)]
pub struct MockTransport {
    pub messages: Mutex<std::collections::VecDeque<MqttMessage>>,
    pub subscriptions: std::sync::Mutex<Vec<String>>,
    pub published: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_message(&self, topic: &str, payload: &[u8]) {
        self.messages.lock().await.push_back(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }
}

#[cfg(test)]
#[async_trait]
impl MqttTransport for MockTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Box<dyn Error + Send>> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn next_message(&self) -> Option<MqttMessage> {
        self.messages.lock().await.pop_front()
    }
}

/// Real MQTT transport backed by rumqttc.
///
/// The rumqttc event loop is polled by a background task from the moment
/// `connect` returns; incoming publishes are fed into an internal channel
/// drained by `next_message`.
pub struct RumqttcTransport {
    client: AsyncClient,
    message_rx: Mutex<mpsc::UnboundedReceiver<MqttMessage>>,
    event_loop_task: JoinHandle<()>,
}

impl RumqttcTransport {
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        options.set_keep_alive(Duration::from_secs(30));

        // Allow large MQTT packets (2 MiB) for discovery payloads
        options.set_max_packet_size(2 * 1024 * 1024, 2 * 1024 * 1024);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let event_loop_task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };

                        // Receiver dropped means the integration is gone
                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Ignore other events (connack, puback, etc.)
                    }
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("MQTT event loop task exiting");
        });

        Self {
            client,
            message_rx: Mutex::new(message_rx),
            event_loop_task,
        }
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Box<dyn Error + Send>> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)
    }

    async fn next_message(&self) -> Option<MqttMessage> {
        self.message_rx.lock().await.recv().await
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        self.event_loop_task.abort();
    }
}
