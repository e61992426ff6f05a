//! Peer-to-peer tool calling for agents on a shared channel.
//!
//! Depend on this crate via `cargo add brig`. It bundles the runtime crates
//! behind feature flags so downstream users can leave out what they do not
//! need.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use brig_primitives as primitives;

/// Channel abstraction, wire messages and the in-process hub.
pub use brig_channel as channel;

/// Agent client runtime (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use brig_kernel as kernel;

/// Local tool registry (enabled by `tools` feature).
#[cfg(feature = "tools")]
pub use brig_tools as tools;

/// Tracing subscriber setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use brig_telemetry as telemetry;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use brig_config as config;

/// Items most agents need.
#[cfg(feature = "kernel")]
pub mod prelude {
    pub use brig_channel::{Channel, MemoryHub};
    pub use brig_config::{AgentConfig, ClientConfig};
    pub use brig_kernel::{AgentClient, CallError, ClientError, Peer, PeerEvent};
    pub use brig_primitives::{PeerId, ToolDescriptor};
    pub use brig_tools::{ToolError, ToolResult};
}
