use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::error::CommandError;
use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::LightCommand;
use super::message::ToIntegrationMessage;
use super::state::State;
use crate::engine::IntegrationContext;
use crate::sched::CommandSink;
use crate::sched::StateView;

/// circadiand engine
///
/// Plays the host-platform role: maintains a snapshot of observed entity
/// state, routes outgoing light commands to the integration that owns the
/// entity, and forwards state changes to the controller as events.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing commands
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Controller-level event stream
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Event>>>,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            integration_handles: Vec::new(),
        }
    }

    /// Take the controller-level event stream.
    ///
    /// Returns `None` if it has already been taken.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(
        &mut self,
        cfg: &crate::config::Config,
    ) -> anyhow::Result<()> {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }

        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Resolve the integration channel owning an entity.
    fn route(&self, entity_id: &str) -> Result<(String, ToIntegrationSender), CommandError> {
        let map = self
            .entity_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let integration_name = map
            .get(entity_id)
            .ok_or_else(|| CommandError::UnroutableEntity(entity_id.to_string()))?;

        let tx = self
            .integration_channels
            .get(integration_name)
            .ok_or_else(|| CommandError::ChannelClosed(integration_name.clone()))?;

        Ok((integration_name.clone(), tx.clone()))
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                // State is not populated until the first state-change message arrives.
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(entity_id, integration_name);
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.lights.remove(&entity_id);
                    state.sensors.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                // Remove from routing map
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&entity_id);
            }
            FromIntegrationMessage::LightStateChanged { entity_id, state } => {
                info!(
                    "Light state changed: {} -> on={}, brightness={:?}, color_temp={:?}",
                    entity_id, state.on, state.brightness, state.color_temp
                );

                let previous = {
                    let mut snapshot = State::clone(&self.state.load());
                    let previous = snapshot.lights.insert(entity_id.clone(), state.clone());
                    self.state.store(Arc::new(snapshot));
                    previous
                };

                self.event_tx
                    .send(Event::LightStateChanged {
                        entity_id,
                        previous,
                        state,
                    })
                    .ok();
            }
            FromIntegrationMessage::SensorValueChanged { entity_id, value } => {
                {
                    let mut snapshot = State::clone(&self.state.load());
                    snapshot.sensors.insert(entity_id.clone(), value);
                    self.state.store(Arc::new(snapshot));
                }

                self.event_tx
                    .send(Event::SensorValueChanged { entity_id, value })
                    .ok();
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateView for Engine {
    fn snapshot(&self) -> Arc<State> {
        self.state_snapshot()
    }
}

#[async_trait]
impl CommandSink for Engine {
    /// Route a light command to its integration and wait for the delivery
    /// acknowledgement. The returned future settles when the integration
    /// has accepted or rejected the command, not when the light has
    /// reached the target state.
    async fn send_light_command(&self, command: LightCommand) -> Result<(), CommandError> {
        let (integration_name, tx) = self.route(&command.entity_id)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(ToIntegrationMessage::LightCommand {
            command,
            ack: ack_tx,
        })
        .map_err(|_| CommandError::ChannelClosed(integration_name))?;

        ack_rx.await.map_err(|_| CommandError::AckDropped)?
    }
}
