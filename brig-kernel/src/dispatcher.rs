//! Executes inbound invocation requests against the local tool registry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use brig_channel::{Channel, ChannelMessage, InvocationRequest, InvocationResponse, RpcError};
use brig_primitives::{CorrelationId, PeerId};
use brig_tools::ToolRegistry;
use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::router::{HandlerContext, HandlerResult, MessageHandler};
use crate::scheduler::TaskScheduler;

/// Method answered with the local tool list when no user tool claims it.
pub const TOOLS_LIST_METHOD: &str = "tools.list";

/// Handle to a spawned dispatch. Completes once the response is published.
pub type DispatchHandle = JoinHandle<()>;

/// Runs tool handlers for inbound requests and publishes exactly one response
/// per request.
pub struct ToolDispatcher {
    tools: Arc<ToolRegistry>,
    channel: Arc<dyn Channel>,
    scheduler: TaskScheduler,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tools)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ToolDispatcher {
    /// Creates a dispatcher answering through `channel`.
    #[must_use]
    pub fn new(
        tools: Arc<ToolRegistry>,
        channel: Arc<dyn Channel>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            tools,
            channel,
            scheduler,
        }
    }

    /// Returns the registry requests are resolved against.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Returns the scheduler handlers run on.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Spawns the handler for `request` and answers the caller once it
    /// completes.
    ///
    /// A request whose handler never gets to run because the scheduler
    /// closed is answered with a `dispatcher closed` internal error. When the
    /// scheduler is already closed that answer is published inline and `None`
    /// is returned.
    pub async fn dispatch(&self, request: InvocationRequest) -> Option<DispatchHandle> {
        let tools = Arc::clone(&self.tools);
        let channel = Arc::clone(&self.channel);
        let fallback_channel = Arc::clone(&self.channel);
        let caller = request.caller.clone();
        let id = request.id.clone();
        let (fallback_caller, fallback_id) = (caller.clone(), id.clone());

        let spawned = self.scheduler.spawn_or_else(
            async move {
                let caller = request.caller.clone();
                let response = execute(&tools, request).await;
                respond(channel.as_ref(), &caller, response).await;
            },
            move || async move {
                debug!(
                    id = %fallback_id,
                    peer_id = %fallback_caller,
                    "dispatcher closed before handler ran"
                );
                let response = closed(fallback_id);
                respond(fallback_channel.as_ref(), &fallback_caller, response).await;
            },
        );

        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                debug!(%id, peer_id = %caller, %err, "rejecting request on closed dispatcher");
                respond(self.channel.as_ref(), &caller, closed(id)).await;
                None
            }
        }
    }
}

/// Resolves one request against `tools`, turning every outcome into a
/// response.
pub async fn execute(tools: &ToolRegistry, request: InvocationRequest) -> InvocationResponse {
    let InvocationRequest {
        id, method, params, ..
    } = request;

    let Some(handle) = tools.get(&method) else {
        if method == TOOLS_LIST_METHOD {
            return match serde_json::to_value(tools.list()) {
                Ok(list) => InvocationResponse::success(id, json!({ "tools": list })),
                Err(err) => InvocationResponse::failure(id, RpcError::internal(err.to_string())),
            };
        }
        debug!(%id, method = %method, "request for unknown tool");
        return InvocationResponse::failure(id, RpcError::method_not_found(&method));
    };

    match AssertUnwindSafe(handle.invoke(params)).catch_unwind().await {
        Ok(Ok(result)) => InvocationResponse::success(id, result),
        Ok(Err(err)) => {
            warn!(%id, method = %method, %err, "tool handler failed");
            InvocationResponse::failure(id, RpcError::internal(err.to_string()))
        }
        Err(_) => {
            warn!(%id, method = %method, "tool handler panicked");
            InvocationResponse::failure(id, RpcError::internal("tool handler panicked"))
        }
    }
}

fn closed(id: CorrelationId) -> InvocationResponse {
    InvocationResponse::failure(id, RpcError::internal("dispatcher closed"))
}

async fn respond(channel: &dyn Channel, caller: &PeerId, response: InvocationResponse) {
    let id = response.id.clone();
    if let Err(err) = channel
        .publish(ChannelMessage::Response(response), Some(caller))
        .await
    {
        warn!(%id, peer_id = %caller, %err, "failed to publish response");
    }
}

#[async_trait]
impl MessageHandler for ToolDispatcher {
    async fn handle(&self, ctx: HandlerContext) -> HandlerResult {
        if let ChannelMessage::Request(request) = &ctx.envelope().message {
            self.dispatch(request.clone()).await;
        }
        Ok(())
    }
}
