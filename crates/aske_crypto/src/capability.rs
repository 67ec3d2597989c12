//! Crypto capability — the boundary between the ASKE/transcript core and the
//! actual cryptographic primitives.
//!
//! The core never reaches for `ed25519-dalek` or `sha2` directly; it calls
//! through the `Crypto` trait so a test harness can supply seeded,
//! deterministic keys (see `DeterministicCrypto` below) without touching the
//! production code path.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// A 32-byte Ed25519 public key, used both for per-session ephemeral keys
/// and for long-term static identity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Truncated hex fingerprint for logs, matching the identity-key
    /// fingerprint convention used elsewhere in this codebase's crypto
    /// layer — never the full key, just enough to eyeball a mismatch.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// A 32-byte Ed25519 secret key. Zeroized on drop; never implements `Debug`
/// or `Serialize` so it cannot be accidentally logged or persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A fresh Ed25519 keypair, as returned by `Crypto::ed25519_keygen`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    pub public: PublicKey,
    pub secret: SecretKey,
}

/// 64-byte raw Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(pub Vec<u8>);

/// Abstract cryptographic capability required by the ASKE core.
///
/// All operations are synchronous and pure with respect to their inputs,
/// except `random_bytes` and `ed25519_keygen`. Implementations must be
/// reentrant/thread-safe if shared across sessions (see spec §5).
pub trait Crypto: Send + Sync {
    /// SHA-256 of `data`.
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// `n` CSPRNG bytes.
    fn random_bytes(&self, n: usize) -> Vec<u8>;

    /// Fresh Ed25519 keypair.
    fn ed25519_keygen(&self) -> Result<KeyPair, CryptoError>;

    /// Sign `msg` with `secret`, returning a raw 64-byte signature.
    fn ed25519_sign(&self, secret: &SecretKey, msg: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(secret.as_bytes());
        SignatureBytes(signing_key.sign(msg).to_bytes().to_vec())
    }

    /// Verify `sig` over `msg` under `public`.
    fn ed25519_verify(
        &self,
        public: &PublicKey,
        msg: &[u8],
        sig: &SignatureBytes,
    ) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(&public.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig_bytes: [u8; 64] = sig
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature("expected 64 bytes".into()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify(msg, &signature)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

/// Production `Crypto` implementation backed by `OsRng` and `ed25519-dalek`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngCrypto;

impl Crypto for OsRngCrypto {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        buf
    }

    fn ed25519_keygen(&self) -> Result<KeyPair, CryptoError> {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public = PublicKey(signing_key.verifying_key().to_bytes());
        let secret = SecretKey(signing_key.to_bytes());
        Ok(KeyPair { public, secret })
    }
}
