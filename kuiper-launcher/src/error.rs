//! Error types for kuiper-launcher.

use thiserror::Error;

/// Launch attempt error type.
///
/// Only [`Error::Timeout`] is produced by the establishment loop; every
/// transient condition before it is retried in place.
#[derive(Debug, Error)]
pub enum Error {
    /// Deadline exceeded while still waiting for the management service.
    #[error("Timed out after {waited_secs} seconds of waiting for the management service to be connected")]
    Timeout { waited_secs: u64 },

    /// A remote command exited with a nonzero status.
    #[error("{step} failed with exit code {exit_code}")]
    CommandFailed { step: &'static str, exit_code: u32 },

    /// Launch settings are unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cloud provider error that cannot be retried.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Remote transport error outside of readiness probing.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Agent payload could not be obtained.
    #[error("Agent payload error: {0}")]
    Payload(String),

    /// Controller channel could not be bound.
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Error::Channel(msg.into())
    }
}

/// Errors raised by a remote management transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote command failed: {0}")]
    Command(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the cloud provider collaborators.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("API error: {0}")]
    Api(String),

    #[error("password decryption failed: {0}")]
    Decrypt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
