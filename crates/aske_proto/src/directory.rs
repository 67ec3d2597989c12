//! Long-term static key directory capability (spec §4.A, §6).
//!
//! Resolution failures surface as [`crate::error::AskeError::UnknownPeer`].

use aske_crypto::capability::PublicKey;
use std::collections::HashMap;

pub trait StaticKeyDir: Send + Sync {
    /// Resolve `pid`'s long-term static public key.
    fn get(&self, pid: &str) -> Option<PublicKey>;
}

/// An in-memory directory, convenient for tests and small deployments.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyDir(HashMap<String, PublicKey>);

impl InMemoryKeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pid: impl Into<String>, key: PublicKey) {
        self.0.insert(pid.into(), key);
    }
}

impl StaticKeyDir for InMemoryKeyDir {
    fn get(&self, pid: &str) -> Option<PublicKey> {
        self.0.get(pid).copied()
    }
}
