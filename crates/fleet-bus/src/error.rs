use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no responders on {0}")]
    NoResponders(String),

    #[error("request on {subject} timed out after {after:?}")]
    TimedOut { subject: String, after: Duration },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request on {subject} failed: {reason}")]
    Request { subject: String, reason: String },

    #[error("publish on {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },
}

impl BusError {
    /// Whether the command may have reached the agent.
    pub fn maybe_delivered(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
