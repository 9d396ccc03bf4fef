//! Error taxonomy for the transport.
//!
//! Per-packet and per-message failures are isolated: callers report them via
//! `HostListener::on_exception`/`PeerListener::on_exception` and keep going.
//! Fatal per-peer failures carry a [`DisconnectReason`](crate::event::DisconnectReason)
//! instead of unwinding anything.

use thiserror::Error;

/// Classifies a transport failure without attaching caller-specific context.
/// Wrap in `anyhow::Error` at API boundaries the way `engine_shared::net` wraps
/// `serde_json`/io errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("crc32 mismatch")]
    CrcMismatch,

    #[error("crypto failure: {0}")]
    Crypto(&'static str),

    #[error("operation timed out")]
    Timeout,

    #[error("connection rejected")]
    Rejected,

    #[error("peer disposed")]
    Disposed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
