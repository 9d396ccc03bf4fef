//! Configuration records (spec.md §6), following
//! `engine_shared::config::EngineConfig`'s shape: plain serde structs with
//! `Default` impls and a `from_json_str` constructor.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compress::{Compressor, Lz4Compressor};
use crate::crypto::default_impl::{
    ChaChaEncryptorFactory, Ed25519Signer, Ed25519Verifier, OsCsprng, X25519ExchangerFactory,
};
use crate::crypto::{Csprng, EncryptorFactory, KeyExchangerFactory, Signer, Verifier};

/// Host-level configuration (spec.md §6 "Host configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub port: u16,
    pub dual_mode: bool,
    pub broadcast: bool,
    pub encryption: bool,
    pub compression: bool,
    pub crc32: bool,
    pub receive_count: usize,
    pub receive_mtu: usize,
    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub allocator_count: usize,
    pub allocator_pooled_length: usize,
    pub allocator_pooled_expand_length: usize,
    pub allocator_expand_length: usize,
    pub allocator_max_length: usize,
    /// 32-byte Ed25519 seed. `None` generates a fresh identity key at
    /// startup (fine for demos/tests, not for a persistent deployment).
    #[serde(default)]
    pub private_key: Option<[u8; 32]>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: 0,
            dual_mode: false,
            broadcast: false,
            encryption: true,
            compression: false,
            crc32: true,
            receive_count: 1,
            receive_mtu: 1200,
            send_buffer_size: 1 << 20,
            receive_buffer_size: 1 << 20,
            allocator_count: 64,
            allocator_pooled_length: 1200,
            allocator_pooled_expand_length: 4096,
            allocator_expand_length: 1200,
            allocator_max_length: 1 << 20,
            private_key: None,
        }
    }
}

impl HostConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Per-peer configuration (spec.md §6 "Peer configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub mtu: usize,
    pub ping_delay_ms: u64,
    pub send_delay_ms: u64,
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    pub resend_count: u32,
    pub resend_delay_min_ms: u64,
    pub resend_delay_max_ms: u64,
    pub resend_delay_jitter_ms: u64,
    pub fragment_timeout_ms: u64,
    pub duplicate_timeout_ms: u64,
    pub ordered_delay_max: u32,
    pub ordered_delay_timeout_ms: u64,
    pub unsequenced_max: u32,
    pub disconnect_delay_ms: u64,
    /// Expected Ed25519 public key of the remote signer. `None` disables
    /// signature verification (authentication is opt-in, per spec.md §4.6).
    #[serde(default)]
    pub remote_public_key: Option<Vec<u8>>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            mtu: 1200,
            ping_delay_ms: 1000,
            send_delay_ms: 10,
            connect_attempts: 10,
            connect_delay_ms: 500,
            resend_count: 15,
            resend_delay_min_ms: 50,
            resend_delay_max_ms: 2000,
            resend_delay_jitter_ms: 50,
            fragment_timeout_ms: 10_000,
            duplicate_timeout_ms: 5_000,
            ordered_delay_max: 8,
            ordered_delay_timeout_ms: 200,
            unsequenced_max: 64,
            disconnect_delay_ms: 200,
            remote_public_key: None,
        }
    }
}

impl PeerConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn ping_delay(&self) -> Duration {
        Duration::from_millis(self.ping_delay_ms)
    }
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
    pub fn resend_delay_min(&self) -> Duration {
        Duration::from_millis(self.resend_delay_min_ms)
    }
    pub fn resend_delay_max(&self) -> Duration {
        Duration::from_millis(self.resend_delay_max_ms)
    }
    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }
    pub fn duplicate_timeout(&self) -> Duration {
        Duration::from_millis(self.duplicate_timeout_ms)
    }
    pub fn ordered_delay_timeout(&self) -> Duration {
        Duration::from_millis(self.ordered_delay_timeout_ms)
    }
    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }
}

/// The trait-object "factory selectors" named in spec.md §6. Kept out of
/// [`HostConfig`] because trait objects aren't serde-serializable; a Host is
/// built from a `HostConfig` plus a `HostCapabilities` bundle.
#[derive(Clone)]
pub struct HostCapabilities {
    pub csprng: Arc<dyn Csprng>,
    pub key_exchanger_factory: Arc<dyn KeyExchangerFactory>,
    pub signer: Arc<dyn Signer>,
    pub verifier: Arc<dyn Verifier>,
    pub encryptor_factory: Arc<dyn EncryptorFactory>,
    pub compressor: Arc<dyn Compressor>,
}

impl HostCapabilities {
    /// The reference capability bundle: X25519 + Ed25519 + ChaCha20-Poly1305
    /// + LZ4, all pluggable per spec.md's Non-goal on concrete algorithms.
    pub fn reference(private_key: Option<[u8; 32]>) -> Self {
        Self {
            csprng: Arc::new(OsCsprng),
            key_exchanger_factory: Arc::new(X25519ExchangerFactory),
            signer: Arc::new(Ed25519Signer::new(private_key)),
            verifier: Arc::new(Ed25519Verifier),
            encryptor_factory: Arc::new(ChaChaEncryptorFactory),
            compressor: Arc::new(Lz4Compressor),
        }
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::reference(None)
    }
}
