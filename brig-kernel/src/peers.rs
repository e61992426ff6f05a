//! Registry of peers currently visible on the channel.
//!
//! Peers are created by `presence joined` events only. Capability updates for
//! peers that have not joined yet are dropped, so an agent never learns about
//! a peer through its tool list alone.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use brig_channel::{ChannelMessage, PresenceStatus};
use brig_primitives::{PeerId, ToolDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::router::{HandlerContext, HandlerResult, MessageHandler};

const EVENT_CAPACITY: usize = 64;

/// Reported availability of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Peer is connected and responsive.
    Active,
    /// Peer is connected but not doing work.
    Idle,
    /// Peer is known but unreachable.
    Offline,
}

/// Snapshot of a remote participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique identity on the channel.
    pub id: PeerId,
    /// Display name; the id when the peer did not provide one.
    pub name: String,
    /// Availability.
    pub status: PeerStatus,
    /// Tools from the most recent announcement.
    pub capabilities: Vec<ToolDescriptor>,
    /// Free-form metadata attached by collaborators.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Last time a join or announcement was seen.
    pub last_seen: DateTime<Utc>,
}

impl Peer {
    /// Returns `true` if the peer advertises a tool with this name.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.capabilities.iter().any(|tool| tool.name() == name)
    }
}

/// Change notifications emitted by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A peer joined (or re-joined) the channel.
    Joined(Peer),
    /// A known peer left the channel.
    Left(Peer),
    /// A known peer replaced its capability set.
    Updated(Peer),
}

/// Result alias for peer registry operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// Errors produced by the peer registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The referenced peer never joined.
    #[error("peer `{0}` is not known")]
    UnknownPeer(PeerId),
}

/// Event-driven set of visible peers.
pub struct PeerRegistry {
    local_id: PeerId,
    peers: RwLock<HashMap<PeerId, Peer>>,
    events: broadcast::Sender<PeerEvent>,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("local_id", &self.local_id)
            .field("peers", &self.len())
            .finish()
    }
}

impl PeerRegistry {
    /// Creates an empty registry for the client identified by `local_id`.
    #[must_use]
    pub fn new(local_id: PeerId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local_id,
            peers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Inserts or overwrites a peer with status [`PeerStatus::Active`].
    pub fn on_join(
        &self,
        peer_id: PeerId,
        name: Option<String>,
        capabilities: Vec<ToolDescriptor>,
    ) -> Peer {
        let peer = Peer {
            name: name.unwrap_or_else(|| peer_id.to_string()),
            id: peer_id,
            status: PeerStatus::Active,
            capabilities,
            metadata: Map::new(),
            last_seen: Utc::now(),
        };

        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.id.clone(), peer.clone());

        debug!(peer_id = %peer.id, tools = peer.capabilities.len(), "peer joined");
        self.emit(PeerEvent::Joined(peer.clone()));
        peer
    }

    /// Removes a peer. Unknown peers are ignored.
    pub fn on_leave(&self, peer_id: &PeerId) -> Option<Peer> {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id);

        if let Some(peer) = &removed {
            debug!(peer_id = %peer.id, "peer left");
            self.emit(PeerEvent::Left(peer.clone()));
        }
        removed
    }

    /// Replaces the capability set of a known peer.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::UnknownPeer`] when the peer has not joined; the
    /// announcement is discarded.
    pub fn on_capability_announcement(
        &self,
        peer_id: &PeerId,
        tools: Vec<ToolDescriptor>,
    ) -> PeerResult<Peer> {
        let updated = {
            let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            let peer = peers
                .get_mut(peer_id)
                .ok_or_else(|| PeerError::UnknownPeer(peer_id.clone()))?;
            peer.capabilities = tools;
            peer.last_seen = Utc::now();
            peer.clone()
        };

        debug!(peer_id = %updated.id, tools = updated.capabilities.len(), "peer capabilities updated");
        self.emit(PeerEvent::Updated(updated.clone()));
        Ok(updated)
    }

    /// Attaches a metadata entry to a known peer.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::UnknownPeer`] when the peer has not joined.
    pub fn set_metadata(
        &self,
        peer_id: &PeerId,
        key: impl Into<String>,
        value: Value,
    ) -> PeerResult<()> {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let peer = peers
            .get_mut(peer_id)
            .ok_or_else(|| PeerError::UnknownPeer(peer_id.clone()))?;
        peer.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Returns a snapshot of one peer.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .cloned()
    }

    /// Returns a snapshot of every peer, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Peer> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of visible peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no peers are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every peer without emitting events.
    pub fn clear(&self) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Subscribes to join/leave/update notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PeerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MessageHandler for PeerRegistry {
    async fn handle(&self, ctx: HandlerContext) -> HandlerResult {
        match &ctx.envelope().message {
            ChannelMessage::Presence(event) => {
                if event.participant_id == self.local_id {
                    return Ok(());
                }
                match event.status {
                    PresenceStatus::Joined => {
                        self.on_join(
                            event.participant_id.clone(),
                            event.participant_name.clone(),
                            event.capabilities.clone(),
                        );
                    }
                    PresenceStatus::Left => {
                        self.on_leave(&event.participant_id);
                    }
                }
            }
            ChannelMessage::ToolsList { tools } | ChannelMessage::ToolsAnnounce { tools } => {
                if let Err(err) = self.on_capability_announcement(ctx.sender(), tools.clone()) {
                    debug!(%err, "ignoring capability announcement");
                }
            }
            _ => {}
        }
        Ok(())
    }
}
