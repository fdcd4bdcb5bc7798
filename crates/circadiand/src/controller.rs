//! Circadian controller
//!
//! The producer side of the scheduling engine: reacts to source sensor
//! updates and light power edges, derives per-group color and brightness
//! targets, and submits actions to the queue. Also owns the queue, the
//! pending-call tracker and the dispatch loop, and supervises the loop
//! task.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::color;
use crate::config::CircadianConfig;
use crate::config::ColorMode;
use crate::config::ColorTempRange;
use crate::config::GroupConfig;
use crate::config::SchedulerConfig;
use crate::engine::ColorSetting;
use crate::engine::Event;
use crate::engine::State;
use crate::sched::Action;
use crate::sched::ActionManager;
use crate::sched::ActionQueue;
use crate::sched::Command;
use crate::sched::CommandSink;
use crate::sched::DispatchLoop;
use crate::sched::StateView;

/// Delay before respawning a dispatch loop that exited prematurely
const LOOP_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Derived targets from the two circadian sources
struct Targets {
    kelvin: f64,
    brightness_factor: f64,
}

/// Snapshot of the controller for the status API
#[derive(Debug, Serialize)]
pub struct ControllerStatus {
    pub name: String,
    pub enabled: bool,
    pub queued: usize,
    pub in_flight: usize,
    pub loop_running: bool,
    pub color_temp_kelvin: Option<f64>,
    pub color_temp_mireds: Option<u16>,
    pub brightness_factor: Option<f64>,
}

pub struct CircadianController {
    config: CircadianConfig,
    color_temp_range: ColorTempRange,

    /// The adjustment gate: disabled means events are observed but no
    /// actions are produced
    enabled: AtomicBool,

    states: Arc<dyn StateView>,
    queue: Arc<ActionQueue>,
    actions: Arc<ActionManager>,
    dispatch: Arc<DispatchLoop>,
}

impl CircadianController {
    pub fn new(
        config: CircadianConfig,
        scheduler: &SchedulerConfig,
        states: Arc<dyn StateView>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        let queue = Arc::new(ActionQueue::new(scheduler));
        let actions = Arc::new(ActionManager::new(sink));
        let dispatch = Arc::new(DispatchLoop::new(
            queue.clone(),
            actions.clone(),
            states.clone(),
            scheduler.actions_per_second,
        ));

        Self {
            config,
            color_temp_range: scheduler.color_temp_range,
            enabled: AtomicBool::new(true),
            states,
            queue,
            actions,
            dispatch,
        }
    }

    /// Consume engine events until the stream closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<Event>) {
        info!("Circadian controller '{}' starting", self.config.name);
        self.spawn_dispatch_loop();

        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }

        info!("Event stream closed; stopping dispatch loop");
        self.dispatch.stop();
    }

    /// Spawn the dispatch loop under supervision: a loop that exits while
    /// still meant to be running is logged and explicitly respawned after
    /// a delay. A stopped loop is final.
    fn spawn_dispatch_loop(&self) {
        let dispatch = Arc::clone(&self.dispatch);
        tokio::spawn(async move {
            loop {
                let tick_loop = Arc::clone(&dispatch);
                let result = tokio::spawn(async move { tick_loop.run().await }).await;

                if !dispatch.is_running() {
                    break;
                }

                match result {
                    Ok(()) => warn!("Dispatch loop exited prematurely; rescheduling"),
                    Err(e) => error!("Dispatch loop crashed: {}; rescheduling", e),
                }
                tokio::time::sleep(LOOP_RESTART_DELAY).await;
            }
        });
    }

    /// Turn circadian adjustment on and force a full update.
    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Circadian lighting enabled");
        }
        self.update_lights(None, self.config.initial_transition, true);
    }

    /// Turn circadian adjustment off. Lights keep their last state.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("Circadian lighting disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether a command for this light is currently in flight. Exposed so
    /// external producers can avoid redundant submissions; dedup makes
    /// this an optimization, not a correctness requirement.
    pub fn is_pending(&self, entity_id: &str) -> bool {
        use crate::sched::PendingCalls;
        self.actions.is_pending(entity_id)
    }

    /// Stop the dispatch loop. In-flight commands are not aborted.
    pub fn shutdown(&self) {
        info!("Circadian controller '{}' stopping", self.config.name);
        self.dispatch.stop();
    }

    pub fn status(&self) -> ControllerStatus {
        let snapshot = self.states.snapshot();
        let targets = self.targets(&snapshot);

        ControllerStatus {
            name: self.config.name.clone(),
            enabled: self.is_enabled(),
            queued: self.queue.len(),
            in_flight: self.actions.pending_count(),
            loop_running: self.dispatch.is_running(),
            color_temp_kelvin: targets.as_ref().map(|t| t.kelvin),
            color_temp_mireds: targets.as_ref().map(|t| self.target_mireds(t)),
            brightness_factor: targets.as_ref().map(|t| t.brightness_factor),
        }
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::SensorValueChanged { entity_id, value } => {
                if entity_id == self.config.color_temp_source
                    || entity_id == self.config.brightness_source
                {
                    debug!("Source {} changed to {}; adjusting lights", entity_id, value);
                    self.update_lights(None, self.config.transition, false);
                }
            }
            Event::LightStateChanged {
                entity_id,
                previous,
                state,
            } => {
                let turned_on = state.on && !previous.is_some_and(|p| p.on);
                if turned_on && self.manages(&entity_id) {
                    debug!("{} turned on; forcing adjustment", entity_id);
                    self.update_lights(Some(&entity_id), self.config.initial_transition, true);
                }
            }
        }
    }

    /// Submit actions for managed lights that are currently on.
    ///
    /// `only` restricts the update to a single light (power-edge updates).
    /// `force` includes groups marked only_once, which are otherwise left
    /// alone on periodic source updates.
    fn update_lights(&self, only: Option<&str>, transition: f64, force: bool) {
        if !self.should_adjust() {
            return;
        }

        let snapshot = self.states.snapshot();
        let Some(targets) = self.targets(&snapshot) else {
            debug!("Circadian sources have not reported yet; skipping adjustment");
            return;
        };

        for group in &self.config.groups {
            if group.only_once && !force {
                continue;
            }

            for light in &group.lights {
                if only.is_some_and(|id| id != light) {
                    continue;
                }

                // Lights that are off (or unobserved) are left alone; the
                // power-edge handler catches them when they come on
                let lit = snapshot.lights.get(light).is_some_and(|state| state.on);
                if !lit {
                    continue;
                }

                let action = self.build_action(light, group, &targets, transition);
                debug!(
                    "Scheduling {} for {} (color={:?}, brightness={:?})",
                    action.command(),
                    light,
                    action.color(),
                    action.brightness(),
                );
                self.queue.submit(action);
            }
        }
    }

    fn should_adjust(&self) -> bool {
        self.is_enabled()
    }

    fn manages(&self, entity_id: &str) -> bool {
        self.config
            .groups
            .iter()
            .any(|group| group.lights.iter().any(|light| light == entity_id))
    }

    fn targets(&self, snapshot: &State) -> Option<Targets> {
        let kelvin = snapshot
            .sensors
            .get(&self.config.color_temp_source)
            .copied()?;
        let factor = snapshot
            .sensors
            .get(&self.config.brightness_source)
            .copied()?;

        Some(Targets {
            kelvin,
            brightness_factor: factor.clamp(0.0, 1.0),
        })
    }

    fn target_mireds(&self, targets: &Targets) -> u16 {
        let kelvin = targets.kelvin.max(1.0).round() as u32;
        self.color_temp_range.clamp(color::kelvin_to_mired(kelvin))
    }

    fn build_action(
        &self,
        entity_id: &str,
        group: &GroupConfig,
        targets: &Targets,
        transition: f64,
    ) -> Action {
        let mireds = self.target_mireds(targets);

        let color = match group.color_mode {
            ColorMode::Ct => ColorSetting::ColorTemp(mireds),
            ColorMode::Rgb => {
                let (r, g, b) = color::color_temperature_to_rgb(targets.kelvin);
                ColorSetting::Rgb(r, g, b)
            }
            ColorMode::Xy => {
                let (r, g, b) = color::color_temperature_to_rgb(targets.kelvin);
                let (x, y) = color::rgb_to_xy(r, g, b);
                ColorSetting::Xy(x, y)
            }
        };

        let brightness = group
            .brightness_adjust
            .then(|| group_brightness(group, targets.brightness_factor));

        Action::new(
            entity_id,
            color,
            mireds,
            brightness,
            transition,
            Command::TurnOn,
        )
    }
}

/// Map the 0-1 brightness factor into the group's percent window, scaled
/// to the 0-254 command range.
fn group_brightness(group: &GroupConfig, factor: f64) -> u8 {
    let min = f64::from(group.min_brightness);
    let max = f64::from(group.max_brightness);
    let percent = min + (max - min) * factor;
    (percent / 100.0 * 254.0).round() as u8
}
