//! Meshlight Node binary
//!
//! A Generic OnOff node over UDP. Each stdin line is a command; an empty line
//! presses the button.

use meshlight_node::{Command, LogActuator, MeshNode, NodeConfig, TriggerOutcome};
use meshlight_onoff::Address;
use meshlight_transfer::UdpTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshlight_node=info,meshlight_onoff=info,meshlight_transfer=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meshlight node");

    let config = NodeConfig::from_env()?;
    let transport = UdpTransport::bind(config.udp()).await?;
    let _receiver = transport.spawn_receiver();

    let (node, handle) = MeshNode::new(&config, transport.clone(), LogActuator::default())?;
    let node_task = node.spawn();

    if !config.auto_provision {
        handle.provision().await?;
    } else {
        tracing::info!("Unprovisioned; press enter to self-provision");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = match line.parse::<Command>() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };

        let result = match command {
            Command::Trigger => handle.trigger().await.map(|outcome| match outcome {
                TriggerOutcome::Provisioned(p) => {
                    tracing::info!("Provisioned as {}", p.address)
                }
                TriggerOutcome::Sent { value, tid } => {
                    tracing::debug!(value, tid, "trigger sent")
                }
            }),
            Command::Get => handle.get(Address::ALL_NODES).await,
            Command::Attention(on) => handle.attention(on),
            Command::Provision => handle.provision().await.map(|_| ()),
            Command::Status => handle
                .status()
                .await
                .map(|s| println!("{}", serde_json::to_string_pretty(&s).unwrap_or_default())),
            Command::Quit => break,
        };
        if let Err(e) = result {
            tracing::warn!("{}", e);
        }
    }

    handle.shutdown()?;
    node_task.await?;
    tracing::info!(stats = ?transport.stats(), "Meshlight node exited");
    Ok(())
}
