use thiserror::Error;

/// Errors produced by the hub and its protocol layer.
#[derive(Debug, Error)]
pub enum HubError {
    /// Malformed or unrecognized inbound frame. Answered on the same connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer's outbound queue is saturated.
    #[error("outbound queue full for {0}")]
    Capacity(String),

    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Protocol(e.to_string())
    }
}

pub type HubResult<T> = Result<T, HubError>;
