//! `packetflow_core`
//!
//! Reliable peer-to-peer messaging transport over UDP: handshake with
//! pluggable key-exchange/signature/encryption, fragmentation/reassembly,
//! per-channel reliability/ordering/uniqueness, and continuous RTT sampling.
//!
//! Design goals:
//! - Deterministic wire format, documented bit-for-bit in [`wire`].
//! - Pluggable cryptographic/compression capabilities ([`crypto`], [`compress`]).
//! - No `unsafe`.

pub mod alloc;
pub mod clock;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod host;
pub mod peer;
pub mod stats;
pub mod wire;

pub mod prelude {
    //! Commonly used exports for applications embedding the transport.

    pub use crate::config::{HostCapabilities, HostConfig, PeerConfig};
    pub use crate::error::{Result, TransportError};
    pub use crate::event::{
        ConnectionRequest, DisconnectReason, HostListener, HostTick, Message, NullListener,
        PeerListener, ReceivedMessage,
    };
    pub use crate::host::Host;
    pub use crate::peer::Peer;
}

pub use prelude::*;
