//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "binary"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Binary entrypoint for the nodebus daemon."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use nodebus_can::SocketRelay;
use nodebus_common::{init_basic, init_tracing, AppConfig};
use nodebus_core::{open_transport, Node, NodeHardware};
use nodebus_msg::{ArbitrationId, Frame, Message, NodeId, MAX_PAYLOAD_LEN};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tracing::{info, Span};

#[derive(Debug, Parser)]
#[command(author, version, about = "nodebus daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_delimiter = ',',
        value_parser = parse_node,
        help = "Override the axes this node drives, e.g. gantry-x,gantry-y"
    )]
    node: Vec<NodeId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run a node against simulated hardware")]
    Run {
        #[arg(long, help = "Stop after this many seconds instead of waiting for Ctrl-C")]
        duration_secs: Option<u64>,
    },
    #[command(about = "Run the TCP relay that carries the simulated bus")]
    Relay {
        #[arg(long, default_value = "127.0.0.1:9898")]
        listen: SocketAddr,
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    #[command(about = "Decode a frame and print it as JSON")]
    Decode {
        #[arg(long, value_parser = parse_hex_u32, help = "Arbitration id in hex")]
        id: u32,
        #[arg(default_value = "", help = "Payload bytes in hex")]
        payload: String,
    },
    #[command(about = "Encode a JSON message and print its payload in hex")]
    Encode {
        json: String,
        #[arg(
            long,
            value_parser = parse_node,
            help = "Also print the arbitration id for this destination"
        )]
        to: Option<NodeId>,
    },
}

fn parse_node(value: &str) -> Result<NodeId, String> {
    serde_json::from_value(serde_json::Value::String(value.to_owned()))
        .map_err(|_| format!("unknown node `{value}`"))
}

fn parse_hex_u32(value: &str) -> Result<u32, String> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid hex id `{value}`: {err}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { duration_secs } => {
            let config = load_config(cli.config, &cli.node)?;
            let root = init_tracing("nodebusd", &config)?;
            run_node(config, duration_secs, root).await
        }
        Commands::Relay {
            listen,
            duration_secs,
        } => {
            init_basic();
            run_relay(listen, duration_secs).await
        }
        Commands::Decode { id, payload } => {
            init_basic();
            println!("{}", decode(id, &payload)?);
            Ok(())
        }
        Commands::Encode { json, to } => {
            init_basic();
            println!("{}", encode(&json, to)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>, nodes: &[NodeId]) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = path {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("configs/nodebusd.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if !nodes.is_empty() {
        config.node.axes = nodes.to_vec();
        config
            .validate()
            .context("configuration invalid after --node override")?;
    }
    eprintln!("configuration loaded from {}", loaded.source.display());
    Ok(config)
}

async fn wait_for_exit(duration_secs: Option<u64>) -> Result<()> {
    match duration_secs {
        Some(secs) => tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        },
        None => signal::ctrl_c().await?,
    }
    Ok(())
}

async fn run_node(config: AppConfig, duration_secs: Option<u64>, root: Span) -> Result<()> {
    let hub = nodebus_can::LoopbackHub::new();
    let transport = open_transport(&config, &hub)?;
    let (hardware, _sim) = NodeHardware::simulated(&config);
    let node = root.in_scope(|| Node::spawn(&config, transport, hardware))?;
    root.in_scope(|| info!(node = ?node.node(), "node running"));

    wait_for_exit(duration_secs).await?;

    let registry = node.registry().clone();
    node.shutdown()?;
    print!("{}", render_metrics(&registry)?);
    Ok(())
}

async fn run_relay(listen: SocketAddr, duration_secs: Option<u64>) -> Result<()> {
    let relay = SocketRelay::bind(listen).with_context(|| format!("failed to bind {listen}"))?;
    let handle = relay.spawn().context("failed to start relay")?;
    info!(address = %handle.local_addr(), "relay listening");
    wait_for_exit(duration_secs).await?;
    handle.shutdown().context("relay shutdown failed")?;
    Ok(())
}

fn render_metrics(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn decode(arbitration_id: u32, payload_hex: &str) -> Result<String> {
    let payload = hex::decode(payload_hex).context("payload is not valid hex")?;
    let frame = Frame::new(arbitration_id, &payload)?;
    let header = ArbitrationId::from_raw(arbitration_id);
    let message = frame.decode()?;
    let rendered = serde_json::json!({
        "arbitration_id": format!("{arbitration_id:#010x}"),
        "function_code": header.function_code,
        "destination": header.destination().ok(),
        "origin": header.origin().ok(),
        "message_id": header.message_id,
        "message": message,
    });
    Ok(serde_json::to_string_pretty(&rendered)?)
}

fn encode(json: &str, destination: Option<NodeId>) -> Result<String> {
    let message: Message = serde_json::from_str(json).context("not a message")?;
    let id = message
        .id()
        .ok_or_else(|| anyhow!("the empty message has no wire form"))?;
    let mut buffer = [0u8; MAX_PAYLOAD_LEN];
    let len = message.serialize(&mut buffer)?;
    let payload = hex::encode(&buffer[..len]);
    Ok(match destination {
        Some(destination) => {
            let arbitration = ArbitrationId::new(id, destination, NodeId::Host).raw();
            format!("{arbitration:#010x} {payload}")
        }
        None => payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebus_msg::MessageId;

    #[test]
    fn decode_renders_reference_status() {
        let id =
            ArbitrationId::new(MessageId::GetStatusResponse, NodeId::Host, NodeId::GantryX).raw();
        let rendered: serde_json::Value =
            serde_json::from_str(&decode(id, "010000002a").expect("decode")).expect("json");
        assert_eq!(rendered["message"]["message"], "get_status_response");
        assert_eq!(rendered["message"]["fields"]["status"], 1);
        assert_eq!(rendered["message"]["fields"]["data"], 42);
        assert_eq!(rendered["origin"], "gantry-x");
    }

    #[test]
    fn encode_produces_payload_hex() {
        let json = r#"{"message":"set_speed_request","fields":{"speed":1000}}"#;
        assert_eq!(encode(json, None).expect("encode"), "000003e8");
        let with_id = encode(json, Some(NodeId::GantryX)).expect("encode");
        assert!(with_id.ends_with(" 000003e8"));
    }

    #[test]
    fn cli_parses_node_overrides() {
        let cli = Cli::try_parse_from(["nodebusd", "--node", "gantry-x,gantry-y", "run"])
            .expect("parse");
        assert_eq!(cli.node, vec![NodeId::GantryX, NodeId::GantryY]);
        assert!(parse_hex_u32("0x1f").is_ok_and(|id| id == 0x1F));
    }
}
