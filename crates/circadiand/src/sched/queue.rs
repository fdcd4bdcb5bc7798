use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tracing::debug;

use super::action::Action;
use super::pending::PendingCalls;
use crate::config::BrightnessRange;
use crate::config::ColorTempRange;
use crate::config::SchedulerConfig;
use crate::engine::State;

/// Priority score for a light the engine has not observed yet: treated as a
/// maximally divergent refinement, behind power transitions.
const UNOBSERVED_PRIORITY: f64 = 1.0;

/// Holds not-yet-dispatched actions.
///
/// Producers append concurrently with the dispatch loop's selection; the
/// whole deduplicate, prioritize and select step runs under one lock
/// acquisition, so a submitted action is either fully considered or not
/// yet visible, never half-processed.
pub struct ActionQueue {
    actions: Mutex<Vec<Action>>,
    color_temp_range: ColorTempRange,
    brightness_range: BrightnessRange,
}

impl ActionQueue {
    pub fn new(scheduler: &SchedulerConfig) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            color_temp_range: scheduler.color_temp_range,
            brightness_range: scheduler.brightness_range,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Action>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an action to the pending set. Never blocks on anything but
    /// the queue lock; always succeeds.
    pub fn submit(&self, action: Action) {
        debug!(
            "Queueing {} for {} (ct={}, brightness={:?})",
            action.command(),
            action.entity_id(),
            action.color_temp(),
            action.brightness(),
        );
        self.lock().push(action);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pop the next dispatchable action, or `None` if the queue is empty or
    /// every queued entity currently has a call in flight.
    ///
    /// Superseded actions are discarded here; actions for in-flight
    /// entities stay queued for a later tick.
    pub fn select_next(&self, state: &State, pending: &dyn PendingCalls) -> Option<Action> {
        let mut actions = self.lock();
        if actions.is_empty() {
            return None;
        }

        let deduped = dedup(std::mem::take(&mut *actions));
        let mut ordered = self.prioritize(deduped, state);

        let selected = ordered
            .iter()
            .position(|action| !pending.is_pending(action.entity_id()))
            .map(|idx| ordered.remove(idx));

        *actions = ordered;
        selected
    }

    /// Sort ascending by priority score:
    /// - 0.0: the light is off and the action turns it on
    /// - 0.5: the light is on and the action turns it off
    /// - otherwise 3.0 minus the normalized color and brightness
    ///   differences, so far-from-target lights are scheduled before
    ///   near-converged ones but always behind power transitions
    fn prioritize(&self, actions: Vec<Action>, state: &State) -> Vec<Action> {
        let mut scored: Vec<(f64, Action)> = actions
            .into_iter()
            .map(|action| (self.priority(&action, state), action))
            .collect();

        // Stable sort keeps submission order for equal scores
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        scored.into_iter().map(|(_, action)| action).collect()
    }

    fn priority(&self, action: &Action, state: &State) -> f64 {
        let Some(light) = state.lights.get(action.entity_id()) else {
            return UNOBSERVED_PRIORITY;
        };

        if action.targets_on() && !light.on {
            0.0
        } else if !action.targets_on() && light.on {
            0.5
        } else {
            3.0 - (action.color_difference_normalized(light, &self.color_temp_range)
                + action.brightness_difference_normalized(light, &self.brightness_range))
        }
    }
}

/// Collapse the pending set so each entity is represented only by its
/// most-recently-created action. Position keeps the entity's first
/// submission slot, which makes equal-priority ordering deterministic.
fn dedup(actions: Vec<Action>) -> Vec<Action> {
    let total = actions.len();
    let mut kept: Vec<Action> = Vec::with_capacity(total);
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for action in actions {
        match index_of.get(action.entity_id()) {
            Some(&idx) => {
                if action.created_at() >= kept[idx].created_at() {
                    kept[idx] = action;
                }
            }
            None => {
                index_of.insert(action.entity_id().to_string(), kept.len());
                kept.push(action);
            }
        }
    }

    let discarded = total - kept.len();
    if discarded > 0 {
        // Expected supersession, not a failure
        debug!("Discarded {} superseded action(s)", discarded);
    }

    kept
}
