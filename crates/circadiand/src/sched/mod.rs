//! Action scheduling and dispatch.
//!
//! The engine room of circadiand: desired-state requests for individual
//! lights are queued, deduplicated per entity, prioritized by urgency and
//! drained by a fixed-rate loop that skips converged lights and never
//! issues two concurrent commands to the same entity.

mod action;
mod dispatch;
mod pending;
mod queue;

pub use action::Action;
pub use action::Command;
pub use dispatch::DISPATCH_THRESHOLD;
pub use dispatch::DispatchLoop;
pub use dispatch::StateView;
pub use pending::ActionManager;
pub use pending::CommandSink;
pub use pending::PendingCalls;
pub use queue::ActionQueue;
