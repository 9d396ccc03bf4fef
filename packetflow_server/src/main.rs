//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p packetflow_server -- [--addr 0.0.0.0:40000]
//!
//! Accepts every inbound connection request and echoes back whatever
//! messages it receives, on the same channel, with the same reliability
//! flags the sender used.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use packetflow_core::prelude::*;
use tracing::info;

struct EchoListener;

impl PeerListener for EchoListener {
    fn on_connect(&self, peer: &Arc<Peer>) {
        info!(remote = %peer.remote_endpoint(), "peer connected");
    }

    fn on_disconnect(&self, peer: &Arc<Peer>, reason: DisconnectReason, _payload: Option<&[u8]>) {
        info!(remote = %peer.remote_endpoint(), ?reason, "peer disconnected");
    }

    fn on_receive(&self, peer: &Arc<Peer>, message: ReceivedMessage) {
        info!(
            remote = %peer.remote_endpoint(),
            channel = message.channel,
            len = message.payload.len(),
            "echoing message",
        );
        peer.send(
            Message::new(message.payload)
                .channel(message.channel)
                .reliable()
                .ordered()
                .unique(),
        );
    }

    fn on_exception(&self, peer: &Arc<Peer>, error: &anyhow::Error) {
        tracing::warn!(remote = %peer.remote_endpoint(), %error, "peer exception");
    }
}

struct AcceptAllListener {
    host: std::sync::Mutex<Option<std::sync::Weak<Host>>>,
}

impl AcceptAllListener {
    fn bind(&self, host: std::sync::Weak<Host>) {
        *self.host.lock().unwrap() = Some(host);
    }
}

impl HostListener for AcceptAllListener {
    fn on_receive_request(&self, request: &ConnectionRequest) {
        let Some(host) = self.host.lock().unwrap().as_ref().and_then(std::sync::Weak::upgrade) else {
            return;
        };
        let peer = host.accept(request, PeerConfig::default(), Arc::new(EchoListener));
        info!(remote = %peer.remote_endpoint(), "accepted connection request");
    }

    fn on_exception(&self, remote: Option<std::net::SocketAddr>, error: &anyhow::Error) {
        tracing::warn!(?remote, %error, "host exception");
    }
}

fn parse_port() -> u16 {
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    let mut port = 40_000u16;
    while i < args.len() {
        if args[i] == "--addr" && i + 1 < args.len() {
            if let Some(p) = args[i + 1].rsplit(':').next() {
                port = p.parse().unwrap_or(port);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    port
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = parse_port();
    let listener = Arc::new(AcceptAllListener { host: std::sync::Mutex::new(None) });

    let host = Host::new(
        HostConfig { port, ..HostConfig::default() },
        HostCapabilities::default(),
        listener.clone(),
    )
    .await
    .context("bind server socket")?;
    listener.bind(Arc::downgrade(&host));

    let local = host.local_addr()?;
    info!(%local, "echo server listening");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutting down");
    host.shutdown().await;
    Ok(())
}
