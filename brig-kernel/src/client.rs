//! Agent client composing routing, peers, tools, dispatch and correlation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use brig_channel::{Channel, ChannelError, ChannelMessage, ChannelResult, MessageTag};
use brig_config::ClientConfig;
use brig_primitives::{PeerId, ToolDescriptor};
use brig_tools::{ToolHandler, ToolRegistry};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlator::{CallError, CallResult, RequestCorrelator};
use crate::dispatcher::{TOOLS_LIST_METHOD, ToolDispatcher};
use crate::lifecycle::{ClientEvent, ClientState, Lifecycle, LifecycleError};
use crate::peers::{Peer, PeerEvent, PeerRegistry};
use crate::router::{HandlerContext, HandlerError, HandlerResult, MessageHandler, MessageRouter};
use crate::scheduler::{SchedulerConfig, SchedulerError, TaskScheduler};

const DISCONNECT_REASON: &str = "client disconnected";

/// Errors surfaced by client operations other than peer calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel refused an operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The operation is not valid in the current lifecycle state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The dispatch scheduler is closed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The operation needs a connected client.
    #[error("client is not connected (state: {state:?})")]
    NotConnected {
        /// State the client was in.
        state: ClientState,
    },
    /// No Tokio runtime is available to run the inbound pump.
    #[error("connect requires a Tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Publishes the local tool set to the channel.
struct ToolAnnouncer {
    tools: Arc<ToolRegistry>,
    channel: Arc<dyn Channel>,
}

impl ToolAnnouncer {
    async fn announce(&self) -> ChannelResult<()> {
        let tools = self.tools.list();
        debug!(peer_id = %self.channel.local_id(), tools = tools.len(), "announcing tools");
        self.channel
            .publish(ChannelMessage::ToolsAnnounce { tools }, None)
            .await
    }
}

#[async_trait]
impl MessageHandler for ToolAnnouncer {
    async fn handle(&self, _ctx: HandlerContext) -> HandlerResult {
        self.announce()
            .await
            .map_err(|err| HandlerError::custom(format!("tool announcement failed: {err}")))
    }
}

/// A participant on a shared channel that exposes local tools and calls tools
/// on its peers.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use brig_channel::MemoryHub;
/// # use brig_config::ClientConfig;
/// # use brig_kernel::AgentClient;
/// # use brig_primitives::{PeerId, ToolDescriptor};
/// # use brig_tools::ToolError;
/// # use serde_json::{json, Value};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = MemoryHub::new();
/// let id = PeerId::new("island-1")?;
/// let client = AgentClient::new(Arc::new(hub.connect(id, "Tortuga")), ClientConfig::default());
/// client
///     .register_tool(ToolDescriptor::new("ping")?, |_: Value| async {
///         Ok::<_, ToolError>(json!({ "pong": true }))
///     })
///     .await?;
/// client.connect()?;
/// let peers = client.discover_peers().await?;
/// println!("{} peers visible", peers.len());
/// # Ok(())
/// # }
/// ```
pub struct AgentClient {
    local_id: PeerId,
    config: ClientConfig,
    channel: Arc<dyn Channel>,
    tools: Arc<ToolRegistry>,
    peers: Arc<PeerRegistry>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: Arc<ToolDispatcher>,
    announcer: Arc<ToolAnnouncer>,
    router: Arc<MessageRouter>,
    lifecycle: Mutex<Lifecycle>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("peers", &self.peers)
            .field("tools", &self.tools)
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// Composes a client on top of `channel`.
    ///
    /// Nothing is read from the channel until [`connect`](Self::connect).
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, config: ClientConfig) -> Self {
        let local_id = channel.local_id().clone();
        let tools = Arc::new(ToolRegistry::new());
        let peers = Arc::new(PeerRegistry::new(local_id.clone()));
        let correlator = Arc::new(RequestCorrelator::new(Arc::clone(&channel)));
        let scheduler =
            TaskScheduler::new(SchedulerConfig::new(config.max_concurrent_dispatches()));
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&tools),
            Arc::clone(&channel),
            scheduler,
        ));
        let announcer = Arc::new(ToolAnnouncer {
            tools: Arc::clone(&tools),
            channel: Arc::clone(&channel),
        });

        let mut router = MessageRouter::new(local_id.clone());
        let peer_handler: Arc<dyn MessageHandler> = peers.clone();
        router.subscribe_all(
            &[MessageTag::Presence, MessageTag::ToolsList, MessageTag::ToolsAnnounce],
            &peer_handler,
        );
        router.subscribe(MessageTag::Request, dispatcher.clone());
        router.subscribe(MessageTag::Response, correlator.clone());
        router.subscribe(MessageTag::Welcome, announcer.clone());

        Self {
            local_id: local_id.clone(),
            config,
            channel,
            tools,
            peers,
            correlator,
            dispatcher,
            announcer,
            router: Arc::new(router),
            lifecycle: Mutex::new(Lifecycle::new(local_id)),
            pump: Mutex::new(None),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns this client's identity on the channel.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Returns the configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.lifecycle().state()
    }

    /// Subscribes to the channel and starts routing inbound traffic.
    ///
    /// The tool set is announced when the channel's `welcome` arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Lifecycle`] unless the client is freshly
    /// constructed, [`ClientError::NoRuntime`] when called outside a Tokio
    /// runtime, or [`ClientError::Channel`] when the inbound stream cannot be
    /// taken.
    pub fn connect(&self) -> ClientResult<()> {
        let mut lifecycle = self.lifecycle();
        let mut next = lifecycle.clone();
        next.transition(ClientEvent::Connect)?;
        let runtime = Handle::try_current()?;

        let mut inbound = self.channel.subscribe()?;
        *lifecycle = next;

        let router = Arc::clone(&self.router);
        let local_id = self.local_id.clone();
        let pump = runtime.spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                let from = envelope.from.clone();
                match router.route(envelope).await {
                    Ok(()) => {}
                    Err(HandlerError::Unsupported(tag)) => {
                        debug!(peer_id = %local_id, %from, %tag, "ignoring unsupported message");
                    }
                    Err(err) => warn!(peer_id = %local_id, %from, %err, "message handling failed"),
                }
            }
            info!(peer_id = %local_id, "inbound stream closed");
        });

        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        info!(peer_id = %self.local_id, "client connected");
        Ok(())
    }

    /// Registers a local tool, replacing any tool of the same name.
    ///
    /// When connected, the full tool set is re-announced. Returns the
    /// descriptor that was replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when the re-announcement cannot be
    /// published; the tool stays registered.
    pub async fn register_tool<H>(
        &self,
        tool: ToolDescriptor,
        handler: H,
    ) -> ClientResult<Option<ToolDescriptor>>
    where
        H: ToolHandler + 'static,
    {
        let replaced = self.tools.register(tool, handler);
        if self.state().is_connected() {
            self.announcer.announce().await?;
        }
        Ok(replaced)
    }

    /// Descriptors of every locally registered tool, sorted by name.
    #[must_use]
    pub fn local_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.list()
    }

    /// Calls `tool` on `peer` with the configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`call_peer_tool_with_timeout`](Self::call_peer_tool_with_timeout).
    pub async fn call_peer_tool(
        &self,
        peer: &PeerId,
        tool: &str,
        params: Value,
    ) -> CallResult<Value> {
        self.call_peer_tool_with_timeout(peer, tool, params, self.config.call_timeout())
            .await
    }

    /// Calls `tool` on `peer`, failing with [`CallError::Timeout`] when no
    /// response arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Disconnected`] unless the client is connected, or
    /// whatever failure the call settles with.
    pub async fn call_peer_tool_with_timeout(
        &self,
        peer: &PeerId,
        tool: &str,
        params: Value,
        timeout: Duration,
    ) -> CallResult<Value> {
        let state = self.state();
        if !state.is_connected() {
            return Err(CallError::Disconnected {
                reason: format!("client is {state:?}"),
            });
        }
        self.correlator.issue(peer, tool, params, timeout).await
    }

    /// Asks every participant to re-announce itself, waits the configured
    /// discovery window and returns the peers known afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] unless the client is connected, or
    /// [`ClientError::Channel`] when the query cannot be published.
    pub async fn discover_peers(&self) -> ClientResult<Vec<Peer>> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ClientError::NotConnected { state });
        }
        self.channel
            .publish(ChannelMessage::PresenceQuery, None)
            .await?;
        tokio::time::sleep(self.config.discovery_window()).await;
        Ok(self.peers.list())
    }

    /// Fetches the tool list of a single peer.
    ///
    /// # Errors
    ///
    /// Returns the failure of the underlying `tools.list` call, or
    /// [`CallError::Decode`] when the returned `tools` array is malformed.
    pub async fn discover_peer_tools(&self, peer: &PeerId) -> CallResult<Vec<ToolDescriptor>> {
        let result = self
            .call_peer_tool(peer, TOOLS_LIST_METHOD, Value::Object(serde_json::Map::new()))
            .await?;

        match result.get("tools") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(tools) => {
                serde_json::from_value(tools.clone()).map_err(|err| CallError::Decode {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Snapshot of every currently visible peer.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.list()
    }

    /// Snapshot of one peer.
    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.get(peer_id)
    }

    /// Receives peer join, leave and capability events.
    #[must_use]
    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.peers.subscribe()
    }

    /// Number of outbound calls still awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Tears the client down.
    ///
    /// Stops routing, rejects every pending call with
    /// [`CallError::Disconnected`], forgets all peers, stops accepting
    /// dispatches and closes the channel. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when the channel fails to close.
    pub async fn disconnect(&self) -> ClientResult<()> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state().is_terminal() {
                return Ok(());
            }
            lifecycle.transition(ClientEvent::Disconnect)?;
        }

        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
        let cancelled = self.correlator.cancel_all(DISCONNECT_REASON);
        self.peers.clear();
        self.dispatcher.scheduler().close();
        self.channel.close().await?;

        info!(peer_id = %self.local_id, cancelled, "client disconnected");
        Ok(())
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }
}
