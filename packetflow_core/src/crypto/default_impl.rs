//! Reference implementations of the crypto capability traits: X25519 key
//! exchange, Ed25519 signatures, ChaCha20-Poly1305 AEAD keyed via HKDF-SHA256,
//! and an OS-backed CSPRNG. None of this is mandated by the transport spec —
//! it exists so the handshake and encryption stages are runnable end to end.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::OsRng as CoreOsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::{Result, TransportError};

use super::{Csprng, Encryptor, EncryptorFactory, KeyExchanger, KeyExchangerFactory, Signer, Verifier};

const HKDF_INFO: &[u8] = b"packetflow handshake v1";
const NONCE_LEN: usize = 12;

/// CSPRNG backed by the OS entropy source.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsCsprng;

impl Csprng for OsCsprng {
    fn fill_bytes(&self, out: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(out);
    }
}

/// One-shot X25519 exchanger: generates a fresh ephemeral keypair, exposes
/// the public half, and consumes itself on `diffie_hellman`.
pub struct X25519Exchanger {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl X25519Exchanger {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(CoreOsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

impl Default for X25519Exchanger {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchanger for X25519Exchanger {
    fn public_key(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    fn diffie_hellman(self: Box<Self>, remote_public: &[u8]) -> Result<Vec<u8>> {
        let remote: [u8; 32] = remote_public
            .try_into()
            .map_err(|_| TransportError::Crypto("x25519 public key must be 32 bytes"))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(remote));
        Ok(shared.as_bytes().to_vec())
    }
}

/// Factory handing out a fresh [`X25519Exchanger`] per handshake attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519ExchangerFactory;

impl KeyExchangerFactory for X25519ExchangerFactory {
    fn new_exchanger(&self) -> Box<dyn KeyExchanger> {
        Box::new(X25519Exchanger::new())
    }
}

/// Signs with a long-lived Ed25519 identity key (the Host's `private_key`).
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Builds a signer from a 32-byte seed (`HostConfig::private_key`). If
    /// `seed` is `None`, a fresh identity key is generated (useful for demos
    /// and tests; a real deployment should persist the seed).
    pub fn new(seed: Option<[u8; 32]>) -> Self {
        let key = match seed {
            Some(bytes) => SigningKey::from_bytes(&bytes),
            None => SigningKey::generate(&mut CoreOsRng),
        };
        Self { key }
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}

/// Verifies Ed25519 signatures against an arbitrary public key (typically
/// `PeerConfig::remote_public_key`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let sig = Signature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &sig).is_ok()
    }
}

/// AEAD encryptor over a key derived from an X25519 shared secret via
/// HKDF-SHA256. Each call to `encrypt` draws a fresh random nonce and
/// prepends it to the ciphertext so the peer can decrypt without keeping a
/// synchronized counter.
pub struct ChaChaEncryptor {
    cipher: ChaCha20Poly1305,
}

impl ChaChaEncryptor {
    pub fn from_shared_secret(shared_secret: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("32-byte okm is within HKDF-SHA256's output limit");
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&okm));
        Self { cipher }
    }
}

impl Encryptor for ChaChaEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut CoreOsRng);
        let mut out = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| TransportError::Crypto("encryption failed"))?;
        let mut framed = Vec::with_capacity(NONCE_LEN + out.len());
        framed.extend_from_slice(&nonce);
        framed.append(&mut out);
        Ok(framed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(TransportError::Crypto("ciphertext shorter than nonce"));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, body)
            .map_err(|_| TransportError::Crypto("decryption/authentication failed"))
    }
}

/// Derives a [`ChaChaEncryptor`] from the handshake's shared secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChaChaEncryptorFactory;

impl EncryptorFactory for ChaChaEncryptorFactory {
    fn derive(&self, shared_secret: &[u8]) -> Box<dyn Encryptor> {
        Box::new(ChaChaEncryptor::from_shared_secret(shared_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_exchange_agrees() {
        let a = X25519Exchanger::new();
        let b = X25519Exchanger::new();
        let a_pub = a.public_key();
        let b_pub = b.public_key();
        let secret_a = Box::new(a).diffie_hellman(&b_pub).unwrap();
        let secret_b = Box::new(b).diffie_hellman(&a_pub).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn ed25519_sign_and_verify() {
        let signer = Ed25519Signer::new(None);
        let verifier = Ed25519Verifier;
        let msg = b"random-challenge-bytes";
        let sig = signer.sign(msg);
        assert!(verifier.verify(&signer.public_key(), msg, &sig));
        assert!(!verifier.verify(&signer.public_key(), b"tampered", &sig));
    }

    #[test]
    fn chacha_roundtrip_and_tamper_detection() {
        let shared = OsCsprng.random_vec(32);
        let enc = ChaChaEncryptor::from_shared_secret(&shared);
        let ciphertext = enc.encrypt(b"hello peer").unwrap();
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), b"hello peer");

        let mut tampered = ciphertext.clone();
        *tampered.last_mut().unwrap() ^= 0xFF;
        assert!(enc.decrypt(&tampered).is_err());
    }
}
