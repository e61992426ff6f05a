use std::sync::Arc;
use std::time::{Duration, Instant};

use brig_channel::{Channel, ChannelMessage, InvocationRequest, MemoryHub, error_codes};
use brig_config::ClientConfig;
use brig_kernel::{AgentClient, CallError, ClientState, PeerEvent};
use brig_primitives::{CorrelationId, PeerId, ToolDescriptor};
use brig_tools::ToolError;
use serde_json::{Value, json};

fn peer(id: &str) -> PeerId {
    PeerId::new(id).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_call_timeout(Duration::from_secs(5))
        .with_discovery_window(Duration::from_millis(50))
}

fn client(hub: &MemoryHub, id: &str, name: &str) -> AgentClient {
    AgentClient::new(Arc::new(hub.connect(peer(id), name)), config())
}

async fn island(hub: &MemoryHub, id: &str, name: &str) -> AgentClient {
    let client = client(hub, id, name);
    client
        .register_tool(
            ToolDescriptor::new("ping")
                .unwrap()
                .with_description("Answers with a pong"),
            |_: Value| async { Ok::<_, ToolError>(json!({ "pong": true })) },
        )
        .await
        .unwrap();
    client
        .register_tool(ToolDescriptor::new("scuttle").unwrap(), |_: Value| async {
            Err::<Value, _>(ToolError::execution("hull breached"))
        })
        .await
        .unwrap();
    client
        .register_tool(ToolDescriptor::new("nap").unwrap(), |params: Value| async move {
            let millis = params["millis"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, ToolError>(json!({ "slept": millis }))
        })
        .await
        .unwrap();
    client.connect().unwrap();
    client
}

#[tokio::test]
async fn ping_round_trip() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let _island = island(&hub, "island", "Tortuga").await;

    let result = caller
        .call_peer_tool(&peer("island"), "ping", json!({}))
        .await
        .unwrap();

    assert_eq!(result, json!({ "pong": true }));
    assert_eq!(caller.pending_calls(), 0);
}

#[tokio::test]
async fn response_carries_request_id() {
    let hub = MemoryHub::new();
    let _island = island(&hub, "island", "Tortuga").await;
    let raw = hub.connect(peer("raw"), "Raw");
    let mut inbound = raw.subscribe().unwrap();

    raw.publish(
        ChannelMessage::Request(InvocationRequest {
            id: CorrelationId::from_wire("req-1"),
            caller: peer("raw"),
            method: "ping".into(),
            params: json!({}),
        }),
        Some(&peer("island")),
    )
    .await
    .unwrap();

    let response = loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        if let ChannelMessage::Response(response) = envelope.message {
            assert_eq!(envelope.from, peer("island"));
            break response;
        }
    };
    assert_eq!(response.id, CorrelationId::from_wire("req-1"));
    assert_eq!(response.into_outcome().unwrap(), json!({ "pong": true }));
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let _island = island(&hub, "island", "Tortuga").await;

    let err = caller
        .call_peer_tool(&peer("island"), "treasure", Value::Null)
        .await
        .expect_err("no such tool");

    assert!(matches!(err, CallError::MethodNotFound { .. }));
    assert_eq!(err.code(), Some(error_codes::METHOD_NOT_FOUND));
    assert_eq!(err.to_string(), "Tool not found: treasure");
}

#[tokio::test]
async fn failing_tool_is_handler_failure() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let _island = island(&hub, "island", "Tortuga").await;

    let err = caller
        .call_peer_tool(&peer("island"), "scuttle", Value::Null)
        .await
        .expect_err("handler fails");

    assert!(matches!(err, CallError::HandlerFailure { ref message } if message == "hull breached"));
    assert_eq!(err.code(), Some(error_codes::INTERNAL_ERROR));
}

#[tokio::test]
async fn slow_tool_times_out_and_late_reply_is_ignored() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let _island = island(&hub, "island", "Tortuga").await;
    let timeout = Duration::from_millis(50);

    let started = Instant::now();
    let err = caller
        .call_peer_tool_with_timeout(&peer("island"), "nap", json!({ "millis": 200 }), timeout)
        .await
        .expect_err("times out");

    assert!(started.elapsed() >= timeout);
    assert!(matches!(err, CallError::Timeout { ref method, .. } if method == "nap"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(caller.pending_calls(), 0);
    assert_eq!(caller.state(), ClientState::Connected);
}

#[tokio::test]
async fn short_call_times_out_while_long_call_resolves() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let _island = island(&hub, "island", "Tortuga").await;
    let island_id = peer("island");

    let (short, long) = tokio::join!(
        caller.call_peer_tool_with_timeout(
            &island_id,
            "nap",
            json!({ "millis": 300 }),
            Duration::from_millis(50),
        ),
        caller.call_peer_tool_with_timeout(
            &island_id,
            "nap",
            json!({ "millis": 100 }),
            Duration::from_secs(2),
        ),
    );

    assert!(matches!(short, Err(CallError::Timeout { .. })));
    assert_eq!(long.unwrap(), json!({ "slept": 100 }));
}

#[tokio::test]
async fn disconnect_rejects_pending_calls_and_forgets_peers() {
    let hub = MemoryHub::new();
    let _island = island(&hub, "island", "Tortuga").await;
    let caller = Arc::new(client(&hub, "caller", "Caller"));
    caller.connect().unwrap();

    let peers = caller.discover_peers().await.unwrap();
    assert_eq!(peers.len(), 1);

    let pending = {
        let caller = Arc::clone(&caller);
        tokio::spawn(async move {
            caller
                .call_peer_tool(&peer("island"), "nap", json!({ "millis": 5_000 }))
                .await
        })
    };
    while caller.pending_calls() == 0 {
        tokio::task::yield_now().await;
    }

    caller.disconnect().await.unwrap();

    let err = pending.await.unwrap().expect_err("rejected");
    assert!(matches!(err, CallError::Disconnected { .. }));
    assert!(caller.peers().is_empty());
    assert_eq!(caller.state(), ClientState::Disconnected);
    assert!(!hub.participants().contains(&peer("caller")));

    let err = caller
        .call_peer_tool(&peer("island"), "ping", Value::Null)
        .await
        .expect_err("client is gone");
    assert!(matches!(err, CallError::Disconnected { .. }));
}

#[tokio::test]
async fn discovery_reports_peers_and_their_tools() {
    let hub = MemoryHub::new();
    let _island = island(&hub, "island", "Tortuga").await;
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();

    let peers = caller.discover_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, peer("island"));
    assert_eq!(peers[0].name, "Tortuga");
    assert!(peers[0].has_tool("ping"));

    let tools = caller.discover_peer_tools(&peer("island")).await.unwrap();
    let names: Vec<_> = tools.iter().map(ToolDescriptor::name).collect();
    assert_eq!(names, ["nap", "ping", "scuttle"]);
    assert_eq!(tools[1].description(), Some("Answers with a pong"));
}

#[tokio::test]
async fn joined_peer_learns_capabilities_from_announcement() {
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();
    let mut events = caller.subscribe_peer_events();

    let _island = island(&hub, "island", "Tortuga").await;

    let updated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let PeerEvent::Updated(peer) = events.recv().await.unwrap() {
                break peer;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(updated.id, peer("island"));
    assert!(updated.has_tool("nap"));
    assert!(caller.peer(&peer("island")).unwrap().has_tool("scuttle"));
}

#[tokio::test]
async fn announcement_without_join_is_ignored() {
    let hub = MemoryHub::new();
    let stranger = hub.connect(peer("stranger"), "Stranger");
    let mut inbound = stranger.subscribe().unwrap();
    let caller = client(&hub, "caller", "Caller");
    caller.connect().unwrap();

    stranger
        .publish(
            ChannelMessage::ToolsAnnounce {
                tools: vec![ToolDescriptor::new("smuggle").unwrap()],
            },
            None,
        )
        .await
        .unwrap();
    // The caller routes in order, so once it answers this request the
    // announcement has been handled.
    stranger
        .publish(
            ChannelMessage::Request(InvocationRequest {
                id: CorrelationId::from_wire("sync"),
                caller: peer("stranger"),
                method: "tools.list".into(),
                params: json!({}),
            }),
            Some(&peer("caller")),
        )
        .await
        .unwrap();
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(envelope.message, ChannelMessage::Response(_)) {
            break;
        }
    }

    assert!(caller.peer(&peer("stranger")).is_none());
    assert!(caller.peers().is_empty());
}
