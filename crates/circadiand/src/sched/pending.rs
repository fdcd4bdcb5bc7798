use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use tracing::debug;
use tracing::warn;

use super::action::Action;
use crate::engine::CommandError;
use crate::engine::LightCommand;

/// Outgoing command transport.
///
/// Implemented by the Engine (routing to the owning integration); the
/// returned future settles when the command has been delivered or failed.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_light_command(&self, command: LightCommand) -> Result<(), CommandError>;
}

/// Read-only view of in-flight entities, consumed by the queue during
/// selection and exposed to producers.
pub trait PendingCalls: Send + Sync {
    fn is_pending(&self, entity_id: &str) -> bool;
}

/// Tracks outstanding dispatch calls keyed by entity, so that no light is
/// ever issued two concurrent commands.
///
/// A record is created synchronously when `dispatch` is called and removed
/// by the spawned completion handler when the underlying call settles,
/// success and failure alike. Failures are not retried here: producers
/// re-derive and re-submit actions on the next relevant event.
pub struct ActionManager {
    sink: Arc<dyn CommandSink>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl ActionManager {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            sink,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// A poisoned lock only means some other thread panicked mid-update;
    /// the set itself remains usable.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue the command for an action and track it as in-flight.
    ///
    /// The entity is recorded as pending before this returns, so an
    /// `is_pending` check on the same scheduling tick already sees it.
    /// The call itself is fire-and-forget; the caller never waits for
    /// completion.
    pub fn dispatch(&self, action: Action) {
        let entity_id = action.entity_id().to_string();
        let command = action.to_command();

        self.lock().insert(entity_id.clone());

        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            if let Err(e) = sink.send_light_command(command).await {
                warn!("Light command for '{}' failed: {}", entity_id, e);
            } else {
                debug!("Light command for '{}' completed", entity_id);
            }

            // Settled either way; the entity is eligible for dispatch again
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&entity_id);
        });
    }

    /// Number of commands currently in flight
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

impl PendingCalls for ActionManager {
    fn is_pending(&self, entity_id: &str) -> bool {
        self.lock().contains(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use crate::engine::ColorSetting;
    use crate::sched::action::Command;

    /// Mock command sink: holds each call until a permit is released, then
    /// records it and optionally fails.
    struct MockSink {
        commands: Mutex<Vec<LightCommand>>,
        release: Semaphore,
        fail: bool,
    }

    impl MockSink {
        fn new(permits: usize, fail: bool) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                release: Semaphore::new(permits),
                fail,
            }
        }

        fn commands(&self) -> Vec<LightCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandSink for MockSink {
        async fn send_light_command(&self, command: LightCommand) -> Result<(), CommandError> {
            let _permit = self
                .release
                .acquire()
                .await
                .map_err(|_| CommandError::AckDropped)?;
            self.commands.lock().unwrap().push(command);
            if self.fail {
                Err(CommandError::Delivery("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn test_action(entity_id: &str) -> Action {
        Action::new(
            entity_id,
            ColorSetting::ColorTemp(350),
            350,
            Some(128),
            1.0,
            Command::TurnOn,
        )
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_entity_pending_while_call_in_flight() {
        let sink = Arc::new(MockSink::new(0, false));
        let manager = Arc::new(ActionManager::new(sink.clone()));

        manager.dispatch(test_action("light.a"));

        // Recorded synchronously, before the call can even start
        assert!(manager.is_pending("light.a"));
        assert!(!manager.is_pending("light.b"));
        assert_eq!(manager.pending_count(), 1);

        // Let the gated call proceed
        sink.release.add_permits(1);
        wait_for(|| !manager.is_pending("light.a")).await;

        assert_eq!(sink.commands().len(), 1);
        assert_eq!(sink.commands()[0].entity_id, "light.a");
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_call_also_clears_record() {
        let sink = Arc::new(MockSink::new(1, true));
        let manager = Arc::new(ActionManager::new(sink.clone()));

        manager.dispatch(test_action("light.a"));
        wait_for(|| !manager.is_pending("light.a")).await;

        // The failure settled the record; the entity may be dispatched again
        assert_eq!(manager.pending_count(), 0);
        manager.dispatch(test_action("light.a"));
        assert!(manager.is_pending("light.a"));
    }

    #[tokio::test]
    async fn test_independent_entities_tracked_separately() {
        let sink = Arc::new(MockSink::new(0, false));
        let manager = Arc::new(ActionManager::new(sink.clone()));

        manager.dispatch(test_action("light.a"));
        manager.dispatch(test_action("light.b"));

        assert_eq!(manager.pending_count(), 2);

        sink.release.add_permits(2);
        wait_for(|| manager.pending_count() == 0).await;
        assert_eq!(sink.commands().len(), 2);
    }
}
