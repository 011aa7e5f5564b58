//! Error types for the drover runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the drover runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Driver executable was not found.
    #[error("Driver executable not found. Set DROVER_DRIVER or put drover-driver on PATH.")]
    ServerNotFound,

    /// Failed to launch the driver process.
    #[error("Failed to launch driver: {0}")]
    LaunchFailed(String),

    /// Transport-level error (framing, stream closure).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Protocol-level error (malformed or unroutable message).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error response from the driver, delivered to the originating caller.
    #[error("{name}: {message}")]
    Remote {
        /// Error type name (e.g., "TimeoutError").
        name: String,
        /// Human-readable error message.
        message: String,
        /// Driver-side stack trace, if available.
        stack: Option<String>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The local wait for a response lapsed without the driver answering.
    /// Distinct from [`Error::Remote`] with a timeout name, which means the
    /// driver itself reported a timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Initializer lookup for a guid the driver never created, or already
    /// disposed. This is a caller programming error.
    #[error("Object not found: {guid}")]
    ObjectNotFound { guid: String },

    /// Wire value decode failure.
    #[error(transparent)]
    Value(#[from] drover_protocol::ValueError),

    /// Channel closed unexpectedly (session torn down).
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl Error {
    /// Returns the error name if this is a driver-reported error.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            Error::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns true for both flavors of timeout: the local wait lapsing and
    /// the driver's own timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Remote { name, .. } => name == "TimeoutError",
            _ => false,
        }
    }
}
