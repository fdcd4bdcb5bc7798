use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;

use super::action::Action;
use super::pending::ActionManager;
use super::queue::ActionQueue;
use crate::engine::LightState;
use crate::engine::State;

/// Minimum state delta considered worth dispatching, in raw units
/// (mireds for color, 0-255 steps for brightness). Smaller differences are
/// treated as already converged so the loop does not chase sensor jitter.
/// Boundary inclusive: a delta of exactly 5 dispatches.
pub const DISPATCH_THRESHOLD: f64 = 5.0;

/// Read-only view of live entity state, loaded once per tick.
pub trait StateView: Send + Sync {
    fn snapshot(&self) -> Arc<State>;
}

/// Fixed-rate loop that drains the action queue.
///
/// Each tick selects the highest-priority dispatchable action, checks it
/// against the live state snapshot, and either hands it to the
/// `ActionManager` (and immediately re-enters the loop to drain backlog)
/// or sleeps out the remainder of the tick.
///
/// The loop itself never restarts: when `run` returns while the loop is
/// still meant to be running, the owning controller is expected to spawn
/// it again.
pub struct DispatchLoop {
    queue: Arc<ActionQueue>,
    actions: Arc<ActionManager>,
    states: Arc<dyn StateView>,
    tick: Duration,
    running: AtomicBool,
}

impl DispatchLoop {
    pub fn new(
        queue: Arc<ActionQueue>,
        actions: Arc<ActionManager>,
        states: Arc<dyn StateView>,
        actions_per_second: u32,
    ) -> Self {
        Self {
            queue,
            actions,
            states,
            tick: Duration::from_secs_f64(1.0 / f64::from(actions_per_second.max(1))),
            running: AtomicBool::new(true),
        }
    }

    /// Request the loop to stop at the next tick boundary. Does not abort
    /// commands already in flight.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the tick cycle until stopped.
    pub async fn run(&self) {
        info!("Dispatch loop starting (tick period {:?})", self.tick);

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            let snapshot = self.states.snapshot();
            if let Some(action) = self.queue.select_next(&snapshot, self.actions.as_ref()) {
                if self.execute(action, &snapshot) {
                    // A command went out; re-enter immediately to drain
                    // the backlog faster while actions are flowing
                    continue;
                }
            }

            let elapsed = started.elapsed();
            if let Some(remaining) = self.tick.checked_sub(elapsed) {
                tokio::time::sleep(remaining).await;
            }
        }

        info!("Dispatch loop stopped");
    }

    /// Returns true if the action was dispatched.
    fn execute(&self, action: Action, state: &State) -> bool {
        let worthwhile = match state.lights.get(action.entity_id()) {
            // Never observed: unknown is not converged
            None => true,
            Some(light) => should_dispatch(&action, light),
        };

        if worthwhile {
            debug!(
                "Dispatching {} for {}",
                action.command(),
                action.entity_id()
            );
            self.actions.dispatch(action);
        } else {
            debug!(
                "{} is within the convergence threshold, skipping",
                action.entity_id()
            );
        }

        worthwhile
    }
}

/// Dispatch iff the power state differs, or the color or brightness delta
/// reaches the threshold. An unreported color or brightness counts as
/// divergent; an action without a brightness target never diverges on
/// brightness.
fn should_dispatch(action: &Action, light: &LightState) -> bool {
    if action.differs_from_state(light) {
        return true;
    }

    let color_diverged = action
        .color_difference(light)
        .is_none_or(|diff| DISPATCH_THRESHOLD <= diff);

    let brightness_diverged = action.brightness().is_some()
        && action
            .brightness_difference(light)
            .is_none_or(|diff| DISPATCH_THRESHOLD <= diff);

    color_diverged || brightness_diverged
}
