//! Request/response correlation for outbound peer calls.
//!
//! Every outbound call gets a fresh [`CorrelationId`] and a pending entry
//! holding the sending half of a one-shot channel. Whoever removes the entry
//! from the pending map (a matching response, the caller's deadline, or
//! [`RequestCorrelator::cancel_all`]) is the only party able to settle the
//! call, so each call settles exactly once.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use brig_channel::{
    error_codes, Channel, ChannelError, ChannelMessage, InvocationRequest, InvocationResponse,
    RpcError,
};
use brig_primitives::{CorrelationId, PeerId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::router::{HandlerContext, HandlerResult, MessageHandler};

/// Result alias for peer calls.
pub type CallResult<T> = Result<T, CallError>;

/// Typed failures of a peer call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote peer has no tool with the requested name (`-32601`).
    #[error("{message}")]
    MethodNotFound {
        /// Message supplied by the remote peer.
        message: String,
    },
    /// The remote tool handler failed (`-32603`).
    #[error("{message}")]
    HandlerFailure {
        /// Failure message supplied by the remote handler.
        message: String,
    },
    /// The remote peer answered with an error code outside the known set.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code reported by the peer.
        code: i64,
        /// Message reported by the peer.
        message: String,
    },
    /// No response arrived before the deadline.
    #[error("Tool call timeout: {method}")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The client was torn down while the call was outstanding.
    #[error("disconnected: {reason}")]
    Disconnected {
        /// Reason supplied to the teardown.
        reason: String,
    },
    /// The request could not be published.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The remote result did not have the expected shape.
    #[error("malformed result: {reason}")]
    Decode {
        /// What was wrong with the result.
        reason: String,
    },
}

impl CallError {
    /// Returns the wire error code for remote failures.
    #[must_use]
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::MethodNotFound { .. } => Some(error_codes::METHOD_NOT_FOUND),
            Self::HandlerFailure { .. } => Some(error_codes::INTERNAL_ERROR),
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    fn from_rpc(error: RpcError) -> Self {
        match error.code {
            error_codes::METHOD_NOT_FOUND => Self::MethodNotFound {
                message: error.message,
            },
            error_codes::INTERNAL_ERROR => Self::HandlerFailure {
                message: error.message,
            },
            code => Self::Remote {
                code,
                message: error.message,
            },
        }
    }

    fn abandoned() -> Self {
        Self::Disconnected {
            reason: "call abandoned".into(),
        }
    }
}

struct PendingCall {
    peer: PeerId,
    method: String,
    settle: oneshot::Sender<CallResult<Value>>,
}

#[derive(Default)]
struct PendingState {
    calls: HashMap<CorrelationId, PendingCall>,
    closed: Option<String>,
}

/// Tracks outbound calls until their single settlement.
pub struct RequestCorrelator {
    local_id: PeerId,
    channel: Arc<dyn Channel>,
    state: Mutex<PendingState>,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RequestCorrelator")
            .field("local_id", &self.local_id)
            .field("pending", &state.calls.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

/// Removes the pending entry if the issuing future is dropped early.
struct PendingSlot<'a> {
    correlator: &'a RequestCorrelator,
    id: CorrelationId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.correlator.take(&self.id);
    }
}

impl RequestCorrelator {
    /// Creates a correlator publishing through `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            local_id: channel.local_id().clone(),
            channel,
            state: Mutex::new(PendingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        peer: &PeerId,
        method: &str,
    ) -> CallResult<(CorrelationId, oneshot::Receiver<CallResult<Value>>)> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(CallError::Disconnected {
                reason: reason.clone(),
            });
        }

        let (settle, settled) = oneshot::channel();
        let mut pending = Some(PendingCall {
            peer: peer.clone(),
            method: method.to_owned(),
            settle,
        });
        loop {
            let id = CorrelationId::random();
            if let Entry::Vacant(slot) = state.calls.entry(id.clone()) {
                if let Some(call) = pending.take() {
                    slot.insert(call);
                }
                return Ok((id, settled));
            }
        }
    }

    fn take(&self, id: &CorrelationId) -> Option<PendingCall> {
        self.lock().calls.remove(id)
    }

    /// Number of calls still awaiting settlement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Returns `true` once [`cancel_all`](Self::cancel_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Issues a call to `target` and waits for its single settlement.
    ///
    /// The deadline is fixed before the request is published, so the call
    /// never times out earlier than `timeout` after it was issued. A timeout
    /// too large to represent as a deadline waits without one.
    ///
    /// # Errors
    ///
    /// Returns the remote failure carried by the response, [`CallError::Timeout`]
    /// when the deadline passes first, [`CallError::Disconnected`] when the
    /// correlator is torn down, or [`CallError::Channel`] when publishing fails.
    pub async fn issue(
        &self,
        target: &PeerId,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> CallResult<Value> {
        let deadline = Instant::now().checked_add(timeout);
        let (id, mut settled) = self.register(target, method)?;
        let _slot = PendingSlot {
            correlator: self,
            id: id.clone(),
        };

        debug!(%id, peer_id = %target, method, "issuing peer call");
        let request = InvocationRequest {
            id: id.clone(),
            caller: self.local_id.clone(),
            method: method.to_owned(),
            params,
        };

        if let Err(err) = self
            .channel
            .publish(ChannelMessage::Request(request), Some(target))
            .await
        {
            if self.take(&id).is_some() {
                warn!(%id, peer_id = %target, method, %err, "failed to publish peer call");
                return Err(err.into());
            }
            return settled.await.unwrap_or_else(|_| Err(CallError::abandoned()));
        }

        let waited = match deadline {
            Some(deadline) => time::timeout_at(deadline, &mut settled).await,
            None => Ok((&mut settled).await),
        };
        match waited {
            Ok(outcome) => outcome.unwrap_or_else(|_| Err(CallError::abandoned())),
            Err(_) => match self.take(&id) {
                Some(call) => {
                    debug!(%id, peer_id = %call.peer, method = %call.method, "peer call timed out");
                    Err(CallError::Timeout {
                        method: call.method,
                        after: timeout,
                    })
                }
                // Settled concurrently with the deadline; the outcome is in flight.
                None => settled.await.unwrap_or_else(|_| Err(CallError::abandoned())),
            },
        }
    }

    /// Settles the pending call matching `response`.
    ///
    /// Returns `false` when no call is pending under the response's id (late,
    /// duplicate, or spoofed responses); such responses have no effect.
    pub fn on_response(&self, response: InvocationResponse) -> bool {
        let Some(call) = self.take(&response.id) else {
            debug!(id = %response.id, "dropping unmatched response");
            return false;
        };

        let outcome = response.into_outcome().map_err(CallError::from_rpc);
        debug!(
            peer_id = %call.peer,
            method = %call.method,
            ok = outcome.is_ok(),
            "peer call settled"
        );
        // The caller may have stopped waiting; nothing to do then.
        let _ = call.settle.send(outcome);
        true
    }

    /// Rejects every pending call with [`CallError::Disconnected`] and refuses
    /// further calls.
    ///
    /// Returns the number of calls that were rejected.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = Some(reason.to_owned());
            state.calls.drain().collect()
        };

        let count = drained.len();
        for (_, call) in drained {
            let _ = call.settle.send(Err(CallError::Disconnected {
                reason: reason.to_owned(),
            }));
        }
        if count > 0 {
            info!(count, reason, "cancelled pending peer calls");
        }
        count
    }
}

#[async_trait]
impl MessageHandler for RequestCorrelator {
    async fn handle(&self, ctx: HandlerContext) -> HandlerResult {
        if let ChannelMessage::Response(response) = &ctx.envelope().message {
            self.on_response(response.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingChannel;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn setup() -> (Arc<RequestCorrelator>, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::new(peer("local")));
        let correlator = Arc::new(RequestCorrelator::new(channel.clone()));
        (correlator, channel)
    }

    fn spawn_call(
        correlator: &Arc<RequestCorrelator>,
        target: &str,
        method: &str,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<CallResult<Value>> {
        let correlator = Arc::clone(correlator);
        let target = peer(target);
        let method = method.to_owned();
        tokio::spawn(async move {
            correlator
                .issue(&target, &method, json!({ "n": 1 }), timeout)
                .await
        })
    }

    #[tokio::test]
    async fn matching_response_resolves_call() {
        let (correlator, channel) = setup();
        let call = spawn_call(&correlator, "b", "ping", Duration::from_secs(5));

        let (request, to) = channel.next_request().await;
        assert_eq!(to, Some(peer("b")));
        assert_eq!(request.caller, peer("local"));
        assert_eq!(request.method, "ping");
        assert_eq!(request.params, json!({ "n": 1 }));

        assert!(correlator.on_response(InvocationResponse::success(
            request.id.clone(),
            json!({ "pong": true })
        )));
        assert_eq!(call.await.unwrap().unwrap(), json!({ "pong": true }));
        assert_eq!(correlator.pending_count(), 0);

        // A duplicate finds nothing to settle.
        assert!(!correlator.on_response(InvocationResponse::success(request.id, json!(1))));
    }

    #[tokio::test]
    async fn error_responses_map_to_typed_failures() {
        let (correlator, channel) = setup();

        for (code, message) in [(-32601, "Tool not found: nope"), (-32603, "boom"), (-1, "odd")] {
            let call = spawn_call(&correlator, "b", "nope", Duration::from_secs(5));
            let (request, _) = channel.next_request().await;
            correlator.on_response(InvocationResponse::failure(
                request.id,
                RpcError::new(code, message),
            ));

            let err = call.await.unwrap().expect_err("error response");
            assert_eq!(err.code(), Some(code));
            assert!(err.to_string().contains(message));
            match code {
                -32601 => assert!(matches!(err, CallError::MethodNotFound { .. })),
                -32603 => assert!(matches!(err, CallError::HandlerFailure { .. })),
                _ => assert!(matches!(err, CallError::Remote { .. })),
            }
        }
    }

    #[tokio::test]
    async fn times_out_after_deadline_and_drops_late_response() {
        let (correlator, channel) = setup();
        let timeout = Duration::from_millis(60);
        let started = Instant::now();
        let call = spawn_call(&correlator, "b", "slow", timeout);
        let (request, _) = channel.next_request().await;

        let err = call.await.unwrap().expect_err("should time out");

        assert!(started.elapsed() >= timeout);
        assert!(matches!(&err, CallError::Timeout { method, .. } if method == "slow"));
        assert_eq!(err.to_string(), "Tool call timeout: slow");
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.on_response(InvocationResponse::success(request.id, json!(1))));
    }

    #[tokio::test]
    async fn cancel_all_rejects_pending_and_later_calls() {
        let (correlator, channel) = setup();
        let first = spawn_call(&correlator, "b", "one", Duration::from_secs(30));
        let second = spawn_call(&correlator, "c", "two", Duration::from_secs(30));
        channel.next_request().await;
        channel.next_request().await;

        assert_eq!(correlator.cancel_all("client disconnected"), 2);

        for call in [first, second] {
            let err = call.await.unwrap().expect_err("rejected");
            assert!(
                matches!(err, CallError::Disconnected { reason } if reason == "client disconnected")
            );
        }
        assert!(correlator.is_closed());

        let err = correlator
            .issue(&peer("b"), "three", Value::Null, Duration::from_secs(1))
            .await
            .expect_err("closed correlator");
        assert!(matches!(err, CallError::Disconnected { .. }));
        assert_eq!(channel.published_count(), 2);
    }

    #[tokio::test]
    async fn unbounded_timeout_waits_until_cancelled() {
        let (correlator, channel) = setup();
        let call = spawn_call(&correlator, "b", "ping", Duration::MAX);
        channel.next_request().await;
        assert_eq!(correlator.pending_count(), 1);

        assert_eq!(correlator.cancel_all("bye"), 1);

        let err = call.await.unwrap().expect_err("cancelled");
        assert!(matches!(err, CallError::Disconnected { reason } if reason == "bye"));
    }

    #[tokio::test]
    async fn dropped_call_releases_pending_entry() {
        let (correlator, channel) = setup();
        let call = spawn_call(&correlator, "b", "ping", Duration::from_secs(30));
        channel.next_request().await;
        assert_eq!(correlator.pending_count(), 1);

        call.abort();
        let _ = call.await;

        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn publish_failure_surfaces_channel_error() {
        let (correlator, channel) = setup();
        channel.fail_publishes();

        let err = correlator
            .issue(&peer("b"), "ping", Value::Null, Duration::from_secs(1))
            .await
            .expect_err("publish fails");

        assert!(matches!(err, CallError::Channel(ChannelError::NotConnected)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn shorter_call_times_out_while_longer_call_resolves() {
        let (correlator, channel) = setup();
        let short = spawn_call(&correlator, "a", "quick", Duration::from_millis(40));
        let (short_request, _) = channel.next_request().await;
        let long = spawn_call(&correlator, "b", "patient", Duration::from_secs(5));
        let (long_request, _) = channel.next_request().await;

        let err = short.await.unwrap().expect_err("short call times out");
        assert!(matches!(err, CallError::Timeout { .. }));

        assert!(!correlator.on_response(InvocationResponse::success(short_request.id, json!(0))));
        assert!(correlator.on_response(InvocationResponse::success(long_request.id, json!(2))));
        assert_eq!(long.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_call_settles_exactly_once_under_races() {
        const CALLS: usize = 64;
        let (correlator, channel) = setup();
        let accepted = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..CALLS)
            .map(|i| spawn_call(&correlator, "b", &format!("m{i}"), Duration::from_millis(20)))
            .collect();

        let mut responders = Vec::new();
        for i in 0..CALLS {
            let (request, _) = channel.next_request().await;
            let correlator = Arc::clone(&correlator);
            let accepted = Arc::clone(&accepted);
            let delay = Duration::from_millis(u64::try_from(i % 40).unwrap());
            responders.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if correlator.on_response(InvocationResponse::success(request.id, json!(i))) {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for responder in responders {
            responder.await.unwrap();
        }

        let mut resolved = 0;
        let mut timed_out = 0;
        for call in calls {
            match call.await.unwrap() {
                Ok(_) => resolved += 1,
                Err(CallError::Timeout { .. }) => timed_out += 1,
                Err(other) => panic!("unexpected failure: {other}"),
            }
        }

        assert_eq!(resolved, accepted.load(Ordering::SeqCst));
        assert_eq!(resolved + timed_out, CALLS);
        assert_eq!(correlator.pending_count(), 0);
    }
}
