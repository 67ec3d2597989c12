//! aske_crypto — cryptographic capability and session-ID derivation for the
//! ASKE group key exchange.
//!
//! # Module layout
//! - `capability` — the `Crypto` trait (sign/verify/hash/random) plus the
//!   production `OsRngCrypto` implementation
//! - `sid`        — deterministic session-ID derivation from sorted
//!   (member, nonce) pairs
//! - `error`      — the crate-wide error type

pub mod capability;
pub mod error;
pub mod sid;

pub use capability::{Crypto, KeyPair, OsRngCrypto, PublicKey, SecretKey, SignatureBytes};
pub use error::CryptoError;
pub use sid::derive_session_id;
