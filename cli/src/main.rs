// meshlink: link engine demo CLI
//
// Runs two in-process mesh nodes over the loopback radio so the whole
// engine (discovery, connection, MTU negotiation, fragmentation,
// reassembly) can be watched without hardware.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshlink_core::link::frame::{self, HEADER_SIZE};
use meshlink_core::{
    LinkConfig, LinkEvent, LoopbackConfig, LoopbackRadio, MeshLink, PreferredRole,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Parser)]
#[command(name = "meshlink")]
#[command(about = "MeshLink: opportunistic short-range mesh messaging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run two in-process nodes and exchange messages both ways
    Demo {
        /// Message the initiator sends
        #[arg(long, default_value = "water and blankets needed at the school gym")]
        message: String,
        /// Message the responder broadcasts back
        #[arg(long, default_value = "received, team is on the way")]
        reply: String,
    },
    /// Show how a message fragments at a given MTU
    Fragment {
        /// Text to fragment
        message: String,
        /// Link MTU in bytes
        #[arg(long, default_value = "23")]
        mtu: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo { message, reply } => run_demo(message, reply).await,
        Commands::Fragment { message, mtu } => show_fragments(&message, mtu),
    }
}

async fn run_demo(message: String, reply: String) -> Result<()> {
    println!("{}", "Starting two loopback mesh nodes".bold());

    let ((radio_a, events_a), (radio_b, events_b)) = LoopbackRadio::pair(
        LoopbackConfig::new("node-a").with_name("Alpha"),
        LoopbackConfig::new("node-b").with_name("Bravo"),
    );
    let (alpha, rx_a) = MeshLink::start(Arc::new(radio_a), events_a, LinkConfig::default())
        .context("start node Alpha")?;
    let (bravo, rx_b) = MeshLink::start(Arc::new(radio_b), events_b, LinkConfig::default())
        .context("start node Bravo")?;

    let watch_a = tokio::spawn(watch_events("Alpha", rx_a));
    let watch_b = tokio::spawn(watch_events("Bravo", rx_b));

    bravo.start_advertising().await.context("advertise")?;
    alpha.scan().await.context("scan")?;

    // Wait for the initiator link to finish setup, then send.
    let payload = message.into_bytes();
    let mut delivered = false;
    for _ in 0..200 {
        match alpha
            .send_message(payload.clone(), PreferredRole::Initiator)
            .await
        {
            Ok(()) => {
                delivered = true;
                break;
            }
            Err(meshlink_core::LinkError::NotReady) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    if !delivered {
        bail!("initiator link never became ready");
    }
    println!(
        "{} negotiated MTU {}",
        "Link up:".green().bold(),
        alpha.mtu().to_string().cyan()
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    bravo
        .send_message(reply.into_bytes(), PreferredRole::Responder)
        .await
        .context("broadcast reply")?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = alpha.metrics();
    println!(
        "{} sent={} reassembled={} dropped={}",
        "Alpha counters:".bold(),
        stats.messages_sent,
        stats.messages_reassembled,
        stats.frames_dropped
    );

    alpha.disconnect().await.ok();
    bravo.stop().await.ok();
    watch_a.abort();
    watch_b.abort();
    println!("{}", "Demo complete".green().bold());
    Ok(())
}

async fn watch_events(name: &'static str, mut rx: mpsc::Receiver<LinkEvent>) {
    loop {
        match timeout(Duration::from_secs(30), rx.recv()).await {
            Ok(Some(LinkEvent::PeerDiscovered(peer))) => {
                println!(
                    "[{}] {} {} (rssi {:?})",
                    name.blue(),
                    "discovered".yellow(),
                    peer.addr,
                    peer.rssi
                );
            }
            Ok(Some(LinkEvent::ConnectionStateChanged { peer, state })) => {
                println!("[{}] {} is now {}", name.blue(), peer, state.to_string().cyan());
            }
            Ok(Some(LinkEvent::PayloadReceived(payload))) => {
                println!(
                    "[{}] {} {:?}",
                    name.blue(),
                    "message:".green().bold(),
                    String::from_utf8_lossy(&payload)
                );
            }
            Ok(None) | Err(_) => break,
        }
    }
}

fn show_fragments(message: &str, mtu: u16) -> Result<()> {
    let frames = frame::fragment(message.as_bytes(), mtu)
        .with_context(|| format!("cannot fragment at MTU {mtu}"))?;
    println!(
        "{} bytes at MTU {} -> {} frame(s), {} payload bytes each",
        message.len(),
        mtu,
        frames.len().to_string().bold(),
        mtu as usize - HEADER_SIZE
    );
    for f in &frames {
        let (header, chunk) = frame::FrameHeader::decode(f).context("decode frame")?;
        println!(
            "  id={:#04x} {}/{} {} bytes: {:?}",
            header.packet_id,
            header.fragment_index + 1,
            header.total_fragments,
            chunk.len(),
            String::from_utf8_lossy(chunk)
        );
    }
    Ok(())
}
