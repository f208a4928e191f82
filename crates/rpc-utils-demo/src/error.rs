//! Error types for the demo programs.

/// Demo-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Host failed the advisory validation.
    #[error("invalid host: '{0}'")]
    InvalidHost(String),

    /// Port failed the advisory validation.
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    /// Signal handling could not be set up.
    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),

    /// RPC library error
    #[error(transparent)]
    Rpc(#[from] rpc_utils::Error),
}
