//! Transport-agnostic channel trait.

use async_trait::async_trait;
use brig_primitives::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::{ChannelMessage, Envelope};

/// Stream of inbound envelopes handed out by [`Channel::subscribe`].
pub type InboundStream = mpsc::UnboundedReceiver<Envelope>;

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors surfaced by channel implementations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is closed or was never established.
    #[error("channel is not connected")]
    NotConnected,
    /// The inbound stream was already handed to another subscriber.
    #[error("channel inbound stream already subscribed")]
    AlreadySubscribed,
    /// A wire message could not be encoded or decoded.
    #[error("channel codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Shared publish/subscribe transport all peers connect to.
///
/// Delivery is best effort: implementations may drop messages addressed to
/// unknown peers, and ordering is whatever the transport provides.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Returns the identity this connection publishes under.
    fn local_id(&self) -> &PeerId;

    /// Returns `true` while the connection is open.
    fn is_connected(&self) -> bool;

    /// Publishes a message, addressed to `to` or broadcast when `None`.
    async fn publish(&self, message: ChannelMessage, to: Option<&PeerId>) -> ChannelResult<()>;

    /// Takes the inbound stream. Only one subscriber is supported.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AlreadySubscribed`] on the second call.
    fn subscribe(&self) -> ChannelResult<InboundStream>;

    /// Tears down the connection. Closing twice is a no-op.
    async fn close(&self) -> ChannelResult<()>;
}
