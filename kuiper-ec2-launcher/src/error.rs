//! Error types for kuiper-ec2-launcher.

use thiserror::Error;

/// Launcher binary error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command line argument.
    #[error("Invalid argument: {0}")]
    Argument(String),
}

/// Result type alias for kuiper-ec2-launcher.
pub type Result<T, E = Error> = std::result::Result<T, E>;
