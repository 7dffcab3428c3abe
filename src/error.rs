use std::sync::Arc;
use thiserror::Error;

/// Result type for HEOS operations
pub type Result<T> = std::result::Result<T, HeosError>;

/// Errors that can occur when talking to a HEOS device
///
/// The type is `Clone` so a single connection outcome can be handed to every
/// caller that joined the same lifecycle transition.
#[derive(Error, Debug, Clone)]
pub enum HeosError {
    /// Socket-level failure (refused, reset, connect timeout)
    #[error("Transport error: {0}")]
    Transport(#[source] Arc<std::io::Error>),

    /// A write was attempted while no socket exists
    #[error("Not connected")]
    NotConnected,

    /// The connection was closed while a command was waiting
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame did not parse as the expected envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// The device reported a failure status
    #[error("{text}")]
    Device {
        /// Device error id, when the message carried a numeric `eid`
        eid: Option<u32>,
        /// Reason text supplied by the device
        text: String,
    },

    /// No response arrived within the command timeout
    #[error("Command timeout")]
    Timeout,

    /// Reply did not carry what the command wrapper expected
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Caller passed a value the command cannot carry
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broadcast lag or a failed background task
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl HeosError {
    /// Whether this error came from the socket rather than the device
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NotConnected | Self::ConnectionClosed
        )
    }
}

impl From<std::io::Error> for HeosError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for HeosError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
