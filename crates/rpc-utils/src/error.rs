//! Error types for the RPC wrappers.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The client could not establish its connection.
    #[error("Failed to create RPC client for {addr}: {source}")]
    Connect {
        /// The address we tried to connect to.
        addr: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The server could not bind its listener.
    #[error("Failed to create RPC server on {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The remote side answered the call with an error response.
    #[error("RPC call failed for function '{function}': {message}")]
    Remote {
        /// Name of the called function.
        function: String,
        /// Error code reported by the server.
        code: String,
        /// Human-readable error message.
        message: String,
    },

    /// The response payload could not be decoded into the requested type.
    #[error("Failed to decode result of RPC call '{function}': {source}")]
    Decode {
        /// Name of the called function.
        function: String,
        /// The underlying codec error.
        #[source]
        source: CodecError,
    },

    /// No response arrived within the configured timeout.
    #[error("RPC call '{function}' timed out after {after:?}")]
    Timeout {
        /// Name of the called function.
        function: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The connection dropped before a response arrived.
    #[error("Connection lost while waiting for RPC call '{function}'")]
    ConnectionLost {
        /// Name of the called function.
        function: String,
    },

    /// The request could not be put on the wire; the connection is unaffected.
    #[error("Failed to send RPC call '{function}': {source}")]
    Send {
        /// Name of the called function.
        function: String,
        /// Why the request was rejected.
        #[source]
        source: ProtocolError,
    },

    /// A function with this name is already registered.
    #[error("Function '{0}' is already bound")]
    AlreadyBound(String),

    /// `run` or `async_run` was invoked on a server that is already running.
    #[error("Server is already running")]
    AlreadyRunning,

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Name of the function a call-level error refers to, if any.
    #[must_use]
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::Remote { function, .. }
            | Self::Decode { function, .. }
            | Self::Timeout { function, .. }
            | Self::ConnectionLost { function }
            | Self::Send { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Whether this error is a call timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Error code reported by the server, for remote errors.
    #[must_use]
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid frame received.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Checksum mismatch.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

/// Errors produced while dispatching a call on the server.
///
/// These never cross the wire as Rust values: the server turns them into an
/// error response carrying [`HandlerError::code`] and the display text.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No callable is registered under the requested name.
    #[error("Function '{0}' is not bound")]
    NotFound(String),

    /// Wrong number of arguments.
    #[error("Expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        /// Arity of the bound callable.
        expected: usize,
        /// Number of arguments received.
        actual: usize,
    },

    /// An argument could not be decoded into the parameter type.
    #[error("Argument {index} could not be decoded: {reason}")]
    InvalidArgument {
        /// Zero-based position of the argument.
        index: usize,
        /// Decoder message.
        reason: String,
    },

    /// The callable returned an error.
    #[error("{0}")]
    Failed(String),

    /// The encoded result does not fit in one frame.
    #[error("Result of {size} bytes exceeds the maximum frame size of {max}")]
    ResultTooLarge {
        /// Encoded result size.
        size: usize,
        /// Frame size limit.
        max: usize,
    },

    /// The callable panicked and the panic was suppressed.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ArgumentCount { .. } | Self::InvalidArgument { .. } => "INVALID_ARGUMENTS",
            Self::Failed(_) | Self::ResultTooLarge { .. } => "HANDLER_ERROR",
            Self::Panicked(_) => "HANDLER_PANICKED",
        }
    }
}

impl From<ciborium::de::Error<io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::DeserializationFailed(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
