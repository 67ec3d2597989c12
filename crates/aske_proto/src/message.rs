//! The ASKE message value (spec §3, §4.C).
//!
//! Immutable once constructed; construction validates no structural
//! invariants of its own — those are the member state machine's job
//! (`member::Member::upflow`/`downflow`). TLV (de)serialisation is handled
//! by [`crate::codec`] plus the fixed type assignment in [`crate::wire`].

use aske_crypto::capability::{PublicKey, SignatureBytes};
use serde::{Deserialize, Serialize};

/// Direction of an ASKE message in the key-agreement chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    /// Travels member-to-member, each adding their contribution.
    Upflow,
    /// Broadcast acknowledgement phase.
    Downflow,
}

/// An ASKE protocol message — passed upflow/downflow between members.
///
/// `dest == ""` means broadcast (used for downflow messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskeMessage {
    pub source: String,
    pub dest: String,
    pub flow: Flow,
    /// Ordered, duplicate-free participant list.
    pub members: Vec<String>,
    /// Positional nonces; `len() <= members.len()`.
    pub nonces: Vec<Vec<u8>>,
    /// Positional ephemeral public keys; `len() <= members.len()`.
    pub pub_keys: Vec<PublicKey>,
    /// Present on downflow messages once the sender has computed its
    /// session-acknowledgement signature.
    pub session_signature: Option<SignatureBytes>,
}

impl AskeMessage {
    /// An empty upflow addressed to `dest`, carrying no contributions yet.
    /// Used by `Member::commit` to kick off a new key agreement.
    pub fn empty_upflow(source: &str, dest: &str, members: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            dest: dest.to_string(),
            flow: Flow::Upflow,
            members,
            nonces: Vec::new(),
            pub_keys: Vec::new(),
            session_signature: None,
        }
    }
}
