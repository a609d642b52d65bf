//! Common error types for signaling server components.

use thiserror::Error;

/// Common errors that can occur while parsing shared data types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A geographic coordinate could not be parsed or is out of range
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// An IP network (CIDR) could not be parsed
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
