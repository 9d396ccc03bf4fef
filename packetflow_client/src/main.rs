//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p packetflow_client -- [--addr 127.0.0.1:40000]
//!
//! Connects to a packetflow host and sends every console line as a
//! reliable/ordered/unique message on channel 0, printing whatever the
//! server sends back.
//!
//! Console commands:
//!   <any text>  - send as a message
//!   quit        - disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use packetflow_core::prelude::*;
use tokio::sync::mpsc;
use tracing::info;

struct ConsoleListener;

impl PeerListener for ConsoleListener {
    fn on_connect(&self, peer: &Arc<Peer>) {
        println!("connected to {}", peer.remote_endpoint());
    }

    fn on_disconnect(&self, _peer: &Arc<Peer>, reason: DisconnectReason, payload: Option<&[u8]>) {
        println!("disconnected: {reason:?} {:?}", payload.map(String::from_utf8_lossy));
    }

    fn on_receive(&self, _peer: &Arc<Peer>, message: ReceivedMessage) {
        println!("< {}", String::from_utf8_lossy(&message.payload));
    }

    fn on_update_rtt(&self, _peer: &Arc<Peer>, rtt_ms: u16) {
        info!(rtt_ms, "rtt updated");
    }

    fn on_exception(&self, _peer: &Arc<Peer>, error: &anyhow::Error) {
        println!("error: {error:#}");
    }
}

fn parse_addr() -> String {
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    let mut addr = "127.0.0.1:40000".to_string();
    while i < args.len() {
        if args[i] == "--addr" && i + 1 < args.len() {
            addr = args[i + 1].clone();
            i += 2;
        } else {
            i += 1;
        }
    }
    addr
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let remote: std::net::SocketAddr = parse_addr().parse().context("parse --addr")?;
    info!(%remote, "starting client");

    let host = Host::new(
        HostConfig { port: 0, ..HostConfig::default() },
        HostCapabilities::default(),
        Arc::new(NullListener),
    )
    .await
    .context("bind local socket")?;

    let peer = host.connect(remote, PeerConfig::default(), Arc::new(ConsoleListener), None);

    let (console_tx, mut console_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("Connecting to {remote}. Type a message and press enter, 'quit' to exit.");

    loop {
        tokio::select! {
            Some(line) = console_rx.recv() => {
                if line == "quit" {
                    peer.disconnect().await;
                    break;
                }
                peer.send(Message::reliable_ordered_unique(line));
            }
            else => break,
        }
    }

    host.dispose().await;
    Ok(())
}
