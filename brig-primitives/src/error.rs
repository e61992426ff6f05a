//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the agent runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating agent primitive types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The provided peer identifier failed validation.
    #[error("invalid peer id `{id}`: {reason}")]
    InvalidPeerId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool descriptor failed validation.
    #[error("invalid tool descriptor: {reason}")]
    InvalidToolDescriptor {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
