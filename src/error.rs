//! Error types for Prahari

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Prahari error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connect called while a connection is already established
    #[error("Already connected")]
    AlreadyConnected,

    /// Connect called while a previous attempt is still outstanding
    #[error("Connect attempt already in progress")]
    ConnectInProgress,

    /// Device name exceeds the configured maximum length
    #[error("Device name longer than maximal allowed length ({max}): {len}")]
    DeviceNameTooLong {
        /// Configured maximum
        max: usize,
        /// Actual length
        len: usize,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
