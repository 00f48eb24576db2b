//! Error types for cbs-handshake

use thiserror::Error;

/// An error condition reported by the remote peer or the transport engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{condition} with description {}", .description.as_deref().unwrap_or("<none>"))]
pub struct ErrorCondition {
    /// Symbolic condition, e.g. `amqp:unauthorized-access`
    pub condition: String,
    /// Free-form description supplied alongside the condition
    pub description: Option<String>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<String>, description: Option<String>) -> Self {
        Self {
            condition: condition.into(),
            description,
        }
    }
}

/// Why the CBS session could not authenticate the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token provider failed: {0}")]
    Credential(String),

    #[error("CBS request rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },

    #[error("Failed to send CBS claim: {0}")]
    Send(String),

    #[error("CBS link closed by peer: {0}")]
    LinkClosed(ErrorCondition),
}

/// The first failure observed while the handshake was in flight.
///
/// Captured at the point of occurrence and only surfaced when the handshake
/// is verified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Proxy setup failed: {0}")]
    Proxy(String),

    #[error("WebSocket setup failed: {0}")]
    WebSocket(String),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),
}

/// Which part of the attempt a [`HandshakeError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Transport,
    Setup,
    Authentication,
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encountered exception during amqp connection: {0}")]
    TransportProtocol(ErrorCondition),

    #[error("Connection failed to be established: {0}")]
    ConnectionFailed(#[source] FailureCause),

    #[error("Amqp connection timed out waiting for service to respond")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HandshakeError {
    pub(crate) fn empty(field: &str) -> Self {
        Self::InvalidArgument(format!("{field} can not be null or empty"))
    }

    /// Classify the failure by handshake stage.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => Stage::Configuration,
            Self::TransportProtocol(_) => Stage::Transport,
            Self::ConnectionFailed(FailureCause::Authentication(_)) => Stage::Authentication,
            Self::ConnectionFailed(_) => Stage::Setup,
            Self::Timeout => Stage::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
