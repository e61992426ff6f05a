//! Channel boundary for Brig agents.
//!
//! Agents never talk to each other directly. They share a publish/subscribe
//! channel that delivers [`Envelope`]s either to a single addressed peer or to
//! every participant. This crate defines that boundary ([`Channel`]), the wire
//! messages exchanged over it, and [`MemoryHub`], an in-process channel used by
//! tests and local simulations.

#![warn(missing_docs, clippy::pedantic)]

mod channel;
mod memory;
mod message;

pub use channel::{Channel, ChannelError, ChannelResult, InboundStream};
pub use memory::{MemoryChannel, MemoryHub};
pub use message::{
    error_codes, ChannelMessage, Envelope, InvocationRequest, InvocationResponse, MessageTag,
    PresenceEvent, PresenceStatus, RpcError,
};
