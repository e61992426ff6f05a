//! In-crate test doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use brig_channel::{
    Channel, ChannelError, ChannelMessage, ChannelResult, Envelope, InboundStream,
    InvocationRequest, InvocationResponse,
};
use brig_primitives::PeerId;
use tokio::sync::mpsc;

type Published = (ChannelMessage, Option<PeerId>);

/// Channel that records everything published and lets tests inject inbound
/// envelopes.
pub(crate) struct RecordingChannel {
    local_id: PeerId,
    connected: AtomicBool,
    failing: AtomicBool,
    published: AtomicUsize,
    outbox: mpsc::UnboundedSender<Published>,
    sent: tokio::sync::Mutex<mpsc::UnboundedReceiver<Published>>,
    inject: mpsc::UnboundedSender<Envelope>,
    inbound: Mutex<Option<InboundStream>>,
}

impl RecordingChannel {
    pub(crate) fn new(local_id: PeerId) -> Self {
        let (outbox, sent) = mpsc::unbounded_channel();
        let (inject, inbound) = mpsc::unbounded_channel();
        Self {
            local_id,
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            published: AtomicUsize::new(0),
            outbox,
            sent: tokio::sync::Mutex::new(sent),
            inject,
            inbound: Mutex::new(Some(inbound)),
        }
    }

    pub(crate) fn fail_publishes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub(crate) fn deliver(&self, envelope: Envelope) {
        let _ = self.inject.send(envelope);
    }

    pub(crate) async fn next_message(&self) -> Published {
        let mut sent = self.sent.lock().await;
        tokio::time::timeout(Duration::from_secs(5), sent.recv())
            .await
            .expect("nothing published within 5s")
            .expect("outbox closed")
    }

    pub(crate) async fn next_request(&self) -> (InvocationRequest, Option<PeerId>) {
        loop {
            if let (ChannelMessage::Request(request), to) = self.next_message().await {
                return (request, to);
            }
        }
    }

    pub(crate) async fn next_response(&self) -> (InvocationResponse, Option<PeerId>) {
        loop {
            if let (ChannelMessage::Response(response), to) = self.next_message().await {
                return (response, to);
            }
        }
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: ChannelMessage, to: Option<&PeerId>) -> ChannelResult<()> {
        if self.failing.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        let _ = self.outbox.send((message, to.cloned()));
        Ok(())
    }

    fn subscribe(&self) -> ChannelResult<InboundStream> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::AlreadySubscribed)
    }

    async fn close(&self) -> ChannelResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
