//! Core shared types for Brig agents.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod tool;

/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
/// Identifiers for peers on the channel and for outstanding calls.
pub use ids::{CorrelationId, PeerId};
/// Tool descriptors advertised to peers.
pub use tool::ToolDescriptor;
