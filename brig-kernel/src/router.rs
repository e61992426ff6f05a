//! Tag-keyed routing of inbound channel envelopes.
//!
//! Components subscribe to the message tags they care about; the router hands
//! each inbound envelope to every handler registered for its tag, in
//! registration order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use brig_channel::{Envelope, MessageTag};
use brig_primitives::PeerId;
use thiserror::Error;

/// Context provided to message handlers.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    local_id: PeerId,
    received_at: Instant,
    envelope: Arc<Envelope>,
}

impl HandlerContext {
    /// Constructs a context from an owned envelope.
    #[must_use]
    pub fn from_envelope(local_id: PeerId, envelope: Envelope) -> Self {
        Self::from_shared(local_id, Arc::new(envelope))
    }

    /// Constructs a context from a shared envelope.
    #[must_use]
    pub fn from_shared(local_id: PeerId, envelope: Arc<Envelope>) -> Self {
        Self {
            local_id,
            received_at: Instant::now(),
            envelope,
        }
    }

    /// Returns the identity of the receiving client.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Returns the time the envelope was received.
    #[must_use]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Returns the envelope being routed.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Returns the publisher of the envelope.
    #[must_use]
    pub fn sender(&self) -> &PeerId {
        &self.envelope.from
    }

    /// Returns the tag of the enclosed message.
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        self.envelope.tag()
    }
}

/// Errors that can occur during message handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// No handler subscribed to this tag.
    #[error("message tag `{0}` is not supported")]
    Unsupported(MessageTag),
    /// Custom handler error with human-readable context.
    #[error("handler error: {0}")]
    Custom(String),
}

impl HandlerError {
    /// Creates a custom error variant from a string-like value.
    #[must_use]
    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Trait implemented by components that consume inbound envelopes.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one envelope carrying a tag this handler subscribed to.
    async fn handle(&self, ctx: HandlerContext) -> HandlerResult;
}

/// Dispatch table from message tag to subscribed handlers.
pub struct MessageRouter {
    local_id: PeerId,
    routes: HashMap<MessageTag, Vec<Arc<dyn MessageHandler>>>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.routes.keys().map(|tag| tag.as_str()).collect();
        tags.sort_unstable();
        f.debug_struct("MessageRouter")
            .field("local_id", &self.local_id)
            .field("tags", &tags)
            .finish()
    }
}

impl MessageRouter {
    /// Creates an empty router for the given client identity.
    #[must_use]
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            routes: HashMap::new(),
        }
    }

    /// Subscribes `handler` to envelopes tagged `tag`.
    pub fn subscribe(&mut self, tag: MessageTag, handler: Arc<dyn MessageHandler>) {
        self.routes.entry(tag).or_default().push(handler);
    }

    /// Subscribes `handler` to every tag in `tags`.
    pub fn subscribe_all(&mut self, tags: &[MessageTag], handler: &Arc<dyn MessageHandler>) {
        for tag in tags {
            self.subscribe(*tag, Arc::clone(handler));
        }
    }

    /// Returns `true` if any handler is subscribed to `tag`.
    #[must_use]
    pub fn handles(&self, tag: MessageTag) -> bool {
        self.routes.contains_key(&tag)
    }

    /// Routes an envelope to its subscribers.
    ///
    /// Every subscriber runs even if an earlier one fails; the first error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Unsupported`] when nothing subscribed to the
    /// envelope's tag, or the first error raised by a subscriber.
    pub async fn route(&self, envelope: Envelope) -> HandlerResult {
        let tag = envelope.tag();
        let Some(handlers) = self.routes.get(&tag) else {
            return Err(HandlerError::Unsupported(tag));
        };

        let envelope = Arc::new(envelope);
        let mut first_error = None;
        for handler in handlers {
            let ctx = HandlerContext::from_shared(self.local_id.clone(), Arc::clone(&envelope));
            if let Err(err) = handler.handle(ctx).await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
