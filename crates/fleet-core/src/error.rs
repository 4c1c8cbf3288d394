use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("not initialized: run 'fleetctl init'")]
    NotInitialized,

    #[error("{0}")]
    Validation(String),

    #[error("previous operation '{action}' still in progress on {agent_id}/{resource}")]
    Conflict {
        agent_id: String,
        resource: String,
        action: String,
    },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("resource not found: {agent_id}/{resource}")]
    ResourceNotFound { agent_id: String, resource: String },

    #[error("agent {0} is offline")]
    Offline(String),

    #[error("timed out waiting for {agent_id} to answer '{action}'; outcome unknown")]
    Timeout { agent_id: String, action: String },

    #[error("agent {agent_id} reported an error: {message}")]
    Remote { agent_id: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("unrecognized wire message: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
