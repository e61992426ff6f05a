//! In-process channel hub.
//!
//! [`MemoryHub`] plays the role of the shared gateway: it tracks connected
//! participants, fans broadcasts out, answers presence queries, and turns a
//! participant's `tools.announce` into a `tools.list` capability update for
//! everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use brig_primitives::{PeerId, ToolDescriptor};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelError, ChannelResult, InboundStream};
use crate::message::{ChannelMessage, Envelope, PresenceEvent};

struct Participant {
    session: u64,
    name: String,
    tools: Vec<ToolDescriptor>,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct HubState {
    next_session: u64,
    participants: HashMap<PeerId, Participant>,
}

impl HubState {
    fn deliver(&self, recipient: &PeerId, envelope: Envelope) {
        match self.participants.get(recipient) {
            Some(participant) => {
                if participant.sender.send(envelope).is_err() {
                    trace!(peer_id = %recipient, "recipient inbound stream dropped");
                }
            }
            None => debug!(peer_id = %recipient, "dropping message for unknown recipient"),
        }
    }

    fn broadcast(&self, from: &PeerId, message: &ChannelMessage) {
        for (id, participant) in &self.participants {
            if id == from {
                continue;
            }
            let envelope = Envelope::new(from.clone(), None, message.clone());
            let _ = participant.sender.send(envelope);
        }
    }

    fn is_current(&self, id: &PeerId, session: u64) -> bool {
        self.participants
            .get(id)
            .is_some_and(|participant| participant.session == session)
    }
}

/// In-process publish/subscribe hub.
///
/// Cloning the hub yields another handle to the same set of participants.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let mut ids: Vec<_> = state.participants.keys().map(PeerId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("MemoryHub").field("participants", &ids).finish()
    }
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects a participant and returns its channel.
    ///
    /// The participant receives a `welcome` message and every other
    /// participant receives a `presence joined` event. Connecting an id that is
    /// already present replaces the previous connection.
    #[must_use]
    pub fn connect(&self, id: PeerId, name: impl Into<String>) -> MemoryChannel {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();

        let session = {
            let mut state = self.lock();
            state.next_session += 1;
            let session = state.next_session;

            let _ = sender.send(Envelope::new(
                id.clone(),
                Some(id.clone()),
                ChannelMessage::Welcome {
                    participant_id: id.clone(),
                },
            ));

            state.participants.insert(
                id.clone(),
                Participant {
                    session,
                    name: name.clone(),
                    tools: Vec::new(),
                    sender,
                },
            );

            let joined = ChannelMessage::Presence(PresenceEvent::joined(
                id.clone(),
                Some(name),
                Vec::new(),
            ));
            state.broadcast(&id, &joined);
            session
        };

        debug!(peer_id = %id, session, "participant connected to memory hub");

        MemoryChannel {
            hub: self.clone(),
            id,
            session,
            connected: AtomicBool::new(true),
            inbound: Mutex::new(Some(receiver)),
        }
    }

    /// Returns the ids of every connected participant.
    #[must_use]
    pub fn participants(&self) -> Vec<PeerId> {
        self.lock().participants.keys().cloned().collect()
    }

    fn route(
        &self,
        from: &PeerId,
        session: u64,
        message: ChannelMessage,
        to: Option<&PeerId>,
    ) -> ChannelResult<()> {
        let mut state = self.lock();
        if !state.is_current(from, session) {
            return Err(ChannelError::NotConnected);
        }

        match message {
            ChannelMessage::ToolsAnnounce { tools } => {
                if let Some(participant) = state.participants.get_mut(from) {
                    participant.tools.clone_from(&tools);
                }
                let update = ChannelMessage::ToolsList { tools };
                match to {
                    Some(recipient) => state.deliver(
                        recipient,
                        Envelope::new(from.clone(), Some(recipient.clone()), update),
                    ),
                    None => state.broadcast(from, &update),
                }
            }
            ChannelMessage::PresenceQuery => {
                for (id, participant) in &state.participants {
                    if id == from {
                        continue;
                    }
                    let joined = ChannelMessage::Presence(PresenceEvent::joined(
                        id.clone(),
                        Some(participant.name.clone()),
                        participant.tools.clone(),
                    ));
                    state.deliver(from, Envelope::new(id.clone(), Some(from.clone()), joined));
                }
            }
            message => match to {
                Some(recipient) => state.deliver(
                    recipient,
                    Envelope::new(from.clone(), Some(recipient.clone()), message),
                ),
                None => state.broadcast(from, &message),
            },
        }

        Ok(())
    }

    fn disconnect(&self, id: &PeerId, session: u64) {
        let mut state = self.lock();
        if !state.is_current(id, session) {
            return;
        }
        state.participants.remove(id);
        let left = ChannelMessage::Presence(PresenceEvent::left(id.clone()));
        state.broadcast(id, &left);
        debug!(peer_id = %id, session, "participant left memory hub");
    }
}

/// A single participant's connection to a [`MemoryHub`].
pub struct MemoryChannel {
    hub: MemoryHub,
    id: PeerId,
    session: u64,
    connected: AtomicBool,
    inbound: Mutex<Option<InboundStream>>,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, message: ChannelMessage, to: Option<&PeerId>) -> ChannelResult<()> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.hub.route(&self.id, self.session, message, to)
    }

    fn subscribe(&self) -> ChannelResult<InboundStream> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::AlreadySubscribed)
    }

    async fn close(&self) -> ChannelResult<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.hub.disconnect(&self.id, self.session);
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.hub.disconnect(&self.id, self.session);
        }
    }
}
