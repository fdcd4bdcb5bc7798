use thiserror::Error;

/// Failures delivering a light command to its integration.
///
/// All of these are transient from the scheduler's point of view: the
/// pending record for the entity is cleared when the command settles, and
/// producers re-derive and re-submit on the next relevant event.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no integration owns entity {0}")]
    UnroutableEntity(String),

    #[error("integration {0} is no longer accepting commands")]
    ChannelClosed(String),

    #[error("integration dropped the command acknowledgement")]
    AckDropped,

    #[error("command delivery failed: {0}")]
    Delivery(String),
}
