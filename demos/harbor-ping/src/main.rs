//! Two-harbour demo: island agents expose tools on an in-process hub and a
//! navigator discovers them and calls their tools.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brig::prelude::*;
use brig::telemetry;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "harbor-ping", about = "Ping island agents over an in-process hub")]
struct Args {
    /// Optional JSON configuration for the navigator.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of island agents to start.
    #[arg(long, default_value_t = 2)]
    islands: usize,

    /// Per-call timeout in milliseconds; overrides the configuration.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(millis) = args.timeout_ms {
        config.client = config
            .client
            .with_call_timeout(Duration::from_millis(millis));
    }
    config
        .client
        .validate()
        .context("invalid client configuration")?;
    telemetry::init(&config.telemetry)?;

    let hub = MemoryHub::new();
    let mut islands = Vec::with_capacity(args.islands);
    for index in 1..=args.islands {
        islands.push(start_island(&hub, index).await?);
    }

    let navigator_id = config.identity.resolve_id()?;
    let navigator_name = config.identity.display_name(&navigator_id);
    let navigator = AgentClient::new(
        Arc::new(hub.connect(navigator_id, navigator_name)),
        config.client,
    );
    navigator.connect()?;

    let peers = navigator.discover_peers().await?;
    info!(count = peers.len(), "discovered islands");

    for peer in &peers {
        let tools = navigator.discover_peer_tools(&peer.id).await?;
        let names: Vec<_> = tools.iter().map(ToolDescriptor::name).collect();
        info!(peer_id = %peer.id, name = %peer.name, ?names, "island tools");

        let pong = navigator
            .call_peer_tool(&peer.id, "ping", json!({}))
            .await?;
        info!(peer_id = %peer.id, %pong, "ping answered");

        let forecast = navigator
            .call_peer_tool(&peer.id, "weather", json!({ "day": "tomorrow" }))
            .await?;
        info!(peer_id = %peer.id, %forecast, "weather answered");

        match navigator
            .call_peer_tool(&peer.id, "treasure", Value::Null)
            .await
        {
            Err(err @ CallError::MethodNotFound { .. }) => {
                info!(peer_id = %peer.id, code = ?err.code(), %err, "no treasure here");
            }
            other => warn!(peer_id = %peer.id, ?other, "unexpected treasure outcome"),
        }
    }

    navigator.disconnect().await?;
    for island in &islands {
        island.disconnect().await?;
    }
    info!("all agents disconnected");
    Ok(())
}

async fn start_island(hub: &MemoryHub, index: usize) -> Result<AgentClient> {
    let id = PeerId::new(format!("island-{index}"))?;
    let name = format!("Island {index}");
    let client = AgentClient::new(
        Arc::new(hub.connect(id, name.clone())),
        ClientConfig::default(),
    );

    client
        .register_tool(
            ToolDescriptor::new("ping")?.with_description("Answers with a pong"),
            |_: Value| async { Ok::<_, ToolError>(json!({ "pong": true })) },
        )
        .await?;

    let harbour = name.clone();
    client
        .register_tool(
            ToolDescriptor::new("weather")?
                .with_description("Forecast for the harbour")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": { "day": { "type": "string" } }
                })),
            move |params: Value| {
                let harbour = harbour.clone();
                async move {
                    let day = params["day"].as_str().unwrap_or("today").to_owned();
                    Ok::<_, ToolError>(json!({
                        "harbour": harbour,
                        "day": day,
                        "wind": "fair",
                    }))
                }
            },
        )
        .await?;

    client.connect()?;
    info!(peer_id = %client.local_id(), %name, "island ready");
    Ok(client)
}
