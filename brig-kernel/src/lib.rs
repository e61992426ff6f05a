//! Agent client runtime for shared-channel tool calling.
//!
//! This crate wires the pieces an agent needs to take part in a channel: a
//! tag-keyed message router, the registry of visible peers, the dispatcher
//! that answers inbound tool calls, and the correlator that pairs outbound
//! calls with their responses. [`AgentClient`] composes all of them.

#![warn(missing_docs, clippy::pedantic)]

mod client;
mod correlator;
mod dispatcher;
mod lifecycle;
mod peers;
mod router;
mod scheduler;

#[cfg(test)]
mod testing;

pub use client::{AgentClient, ClientError, ClientResult};
pub use correlator::{CallError, CallResult, RequestCorrelator};
pub use dispatcher::{DispatchHandle, TOOLS_LIST_METHOD, ToolDispatcher, execute};
pub use lifecycle::{ClientEvent, ClientState, Lifecycle, LifecycleError, LifecycleResult};
pub use peers::{Peer, PeerError, PeerEvent, PeerRegistry, PeerResult, PeerStatus};
pub use router::{HandlerContext, HandlerError, HandlerResult, MessageHandler, MessageRouter};
pub use scheduler::{SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler};
