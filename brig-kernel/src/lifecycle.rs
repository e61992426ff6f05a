//! Connection lifecycle state machine for agent clients.

use brig_primitives::PeerId;
use thiserror::Error;
use tracing::debug;

/// States a client can occupy during its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Client constructed but not yet pumping channel traffic.
    Init,
    /// Inbound traffic is being routed and calls may be issued.
    Connected,
    /// Client torn down; no further calls are accepted.
    Disconnected,
}

impl ClientState {
    /// Returns `true` while the client is connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` once the client has been torn down.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Events that trigger lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Start routing channel traffic.
    Connect,
    /// Tear the client down.
    Disconnect,
}

/// Lifecycle state manager.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    peer_id: PeerId,
    state: ClientState,
}

impl Lifecycle {
    /// Constructs a lifecycle controller for the given client identity.
    #[must_use]
    pub const fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            state: ClientState::Init,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Applies a lifecycle event, returning the resulting state.
    ///
    /// Disconnecting is allowed from every state and repeated disconnects are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the supplied event is
    /// not allowed from the current state.
    pub fn transition(&mut self, event: ClientEvent) -> LifecycleResult<ClientState> {
        let next = match (self.state, event) {
            (ClientState::Init, ClientEvent::Connect) => Some(ClientState::Connected),
            (_, ClientEvent::Disconnect) => Some(ClientState::Disconnected),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                peer_id: self.peer_id.clone(),
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(
                peer_id = %self.peer_id,
                ?self.state,
                ?next_state,
                ?event,
                "client lifecycle transition"
            );
            self.state = next_state;
        }

        Ok(self.state)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid lifecycle transition from {from:?} via {event:?} for peer {peer_id}")]
    InvalidTransition {
        /// Identity of the client whose transition failed.
        peer_id: PeerId,
        /// State prior to the attempted transition.
        from: ClientState,
        /// Event that triggered the failure.
        event: ClientEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
