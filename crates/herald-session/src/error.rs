use herald_types::models::ConnectionStatus;
use thiserror::Error;

/// Failures of the command facade.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("WhatsApp client not initialized")]
    NotInitialized,

    #[error("WhatsApp client not ready. Current status: {0}")]
    NotReady(ConnectionStatus),

    #[error("Chat {0} is not a group")]
    NotAGroup(String),

    #[error("{0}")]
    Upstream(String),
}

/// Failures at the messaging client boundary.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("bridge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bridge returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Rejected(String),
}

impl From<ClientError> for SessionError {
    fn from(err: ClientError) -> Self {
        SessionError::Upstream(err.to_string())
    }
}
