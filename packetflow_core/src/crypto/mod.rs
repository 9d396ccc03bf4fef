//! Pluggable cryptographic capabilities used by the handshake (spec.md §4.6).
//!
//! Concrete algorithm choice is an explicit Non-goal of the transport spec —
//! these traits are the seam; [`default_impl`] supplies a runnable default so
//! the transport works out of the box.

pub mod default_impl;

use crate::error::Result;

/// One side of an (EC)DH key exchange. A fresh instance is created per
/// handshake attempt by [`KeyExchangerFactory`].
pub trait KeyExchanger: Send + Sync {
    /// This side's public half, sent to the remote peer in the REQUEST/ACCEPT
    /// payload.
    fn public_key(&self) -> Vec<u8>;

    /// Combines this side's private half with the remote's public half into
    /// a shared secret, consuming `self` (a key exchanger is single-use).
    fn diffie_hellman(self: Box<Self>, remote_public: &[u8]) -> Result<Vec<u8>>;
}

pub trait KeyExchangerFactory: Send + Sync {
    fn new_exchanger(&self) -> Box<dyn KeyExchanger>;
}

/// Signs an arbitrary message with a long-lived identity key (the Host's
/// `private_key`). Used to answer the random-challenge during handshake.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> Vec<u8>;
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Verifies a signature produced by a remote [`Signer`], checked against the
/// `remote_public_key` configured on the connecting peer.
pub trait Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Symmetric AEAD over the derived shared secret, installed once the
/// handshake completes.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

pub trait EncryptorFactory: Send + Sync {
    fn derive(&self, shared_secret: &[u8]) -> Box<dyn Encryptor>;
}

/// Cryptographically secure random source, used for the handshake's random
/// challenge and for fresh key material.
pub trait Csprng: Send + Sync {
    fn fill_bytes(&self, out: &mut [u8]);

    fn random_vec(&self, len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        self.fill_bytes(&mut v);
        v
    }
}
