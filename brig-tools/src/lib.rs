//! Local tool registration and invocation.
//!
//! Agents register named tools together with an async handler. The registry
//! is what the dispatcher consults when a peer invokes a tool, and what the
//! agent announces to the channel as its capability set.

#![warn(missing_docs, clippy::pedantic)]

pub mod registry;

pub use registry::{ToolError, ToolHandle, ToolHandler, ToolRegistry, ToolResult};
