//! The transcript message value (spec §3).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Opaque message id. Callers mint these; the transcript never generates
/// one itself. Interned to a dense `u32` index internally
/// (`transcript::Entry`) so maps and successor/parent sets stay
/// cache-friendly — callers only ever see this opaque form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgId(pub Vec<u8>);

impl MsgId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An accepted-or-candidate transcript message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    pub id: MsgId,
    pub author: String,
    pub parents: BTreeSet<MsgId>,
    /// Intended recipients, excluding the author.
    pub readers: BTreeSet<String>,
    pub body: Vec<u8>,
}

impl Msg {
    pub fn new(
        id: MsgId,
        author: impl Into<String>,
        parents: BTreeSet<MsgId>,
        readers: BTreeSet<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id,
            author: author.into(),
            parents,
            readers,
            body,
        }
    }

    /// `{author} ∪ readers`.
    pub fn members(&self) -> BTreeSet<String> {
        let mut m = self.readers.clone();
        m.insert(self.author.clone());
        m
    }
}
