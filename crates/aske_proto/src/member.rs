//! ASKE member state machine (spec §4.D).
//!
//! Owned by each participant. Transitions via `commit`/`upflow`/`downflow`
//! drive the member from `Init` through `Upflowing`/`AwaitingAcks` to
//! `Acked`; `join`/`exclude` re-enter the cycle while preserving identity.
//! All precondition violations are fatal for the current message only — on
//! an early-check failure the member is left untouched.

use std::collections::HashMap;
use std::sync::Arc;

use aske_crypto::capability::{Crypto, PublicKey, SecretKey, SignatureBytes};
use aske_crypto::sid::derive_session_id;

use crate::directory::StaticKeyDir;
use crate::error::AskeError;
use crate::message::{AskeMessage, Flow};

/// Informal session states from spec §4.D. `Joining`/`JoinFailed` are
/// declared-but-unused in the source and are carried here only as reserved
/// variants per the explicit instruction in spec §9 — nothing in this crate
/// ever constructs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Upflowing,
    AwaitingAcks,
    Acked,
    /// Reserved; never constructed (spec §9).
    Joining,
    /// Reserved; never constructed (spec §9).
    JoinFailed,
}

/// What we remember about a member who has since been excluded.
#[derive(Debug, Clone)]
pub struct OldEphemeralKey {
    pub public: PublicKey,
    pub authenticated: bool,
}

fn compute_ack_bytes(pid: &str, ek_pub: &PublicKey, nonce: &[u8], session_id: &[u8; 32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pid.len() + 32 + nonce.len() + 32);
    buf.extend_from_slice(pid.as_bytes());
    buf.extend_from_slice(ek_pub.as_bytes());
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(session_id);
    buf
}

pub struct Member {
    id: String,
    sk_priv: SecretKey,
    static_dir: Arc<dyn StaticKeyDir>,
    crypto: Arc<dyn Crypto>,

    members: Vec<String>,
    nonce: Option<Vec<u8>>,
    ek_priv: Option<SecretKey>,
    ek_pub: Option<PublicKey>,

    nonces: Vec<Vec<u8>>,
    ephemeral_pub_keys: Vec<PublicKey>,
    authenticated: Vec<bool>,

    session_id: Option<[u8; 32]>,
    old_ephemeral_keys: HashMap<String, OldEphemeralKey>,
}

impl Member {
    pub fn new(
        id: impl Into<String>,
        sk_priv: SecretKey,
        static_dir: Arc<dyn StaticKeyDir>,
        crypto: Arc<dyn Crypto>,
    ) -> Self {
        let id = id.into();
        Self {
            members: vec![id.clone()],
            id,
            sk_priv,
            static_dir,
            crypto,
            nonce: None,
            ek_priv: None,
            ek_pub: None,
            nonces: Vec::new(),
            ephemeral_pub_keys: Vec::new(),
            authenticated: Vec::new(),
            session_id: None,
            old_ephemeral_keys: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn session_id(&self) -> Option<[u8; 32]> {
        self.session_id
    }

    pub fn old_ephemeral_keys(&self) -> &HashMap<String, OldEphemeralKey> {
        &self.old_ephemeral_keys
    }

    /// Informal state derived from the current fields (spec §4.D).
    pub fn state(&self) -> SessionState {
        if self.session_id.is_none() {
            return SessionState::Init;
        }
        if self.authenticated.is_empty() {
            return SessionState::Upflowing;
        }
        if self.authenticated.iter().all(|&a| a) {
            SessionState::Acked
        } else {
            SessionState::AwaitingAcks
        }
    }

    pub fn is_session_acknowledged(&self) -> bool {
        !self.authenticated.is_empty() && self.authenticated.iter().all(|&a| a)
    }

    /// Initiates upflow to agree a new session with `other_members`.
    pub fn commit(&mut self, other_members: Vec<String>) -> Result<AskeMessage, AskeError> {
        if other_members.is_empty() {
            return Err(AskeError::EmptyCommit);
        }
        self.nonce = None;
        self.ek_priv = None;
        self.ek_pub = None;

        let mut members = Vec::with_capacity(1 + other_members.len());
        members.push(self.id.clone());
        members.extend(other_members);

        tracing::debug!(id = %self.id, ?members, "commit: starting upflow");
        let seed = AskeMessage::empty_upflow(&self.id, "", members);
        self.upflow(&seed)
    }

    /// Processes an upflow message passing through this member.
    pub fn upflow(&mut self, msg: &AskeMessage) -> Result<AskeMessage, AskeError> {
        let mut seen = std::collections::HashSet::new();
        for m in &msg.members {
            if !seen.insert(m.as_str()) {
                return Err(AskeError::DuplicateMember);
            }
        }
        if msg.nonces.len() > msg.members.len() {
            return Err(AskeError::TooManyNonces {
                nonces: msg.nonces.len(),
                members: msg.members.len(),
            });
        }
        if msg.pub_keys.len() > msg.members.len() {
            return Err(AskeError::TooManyPubKeys {
                pub_keys: msg.pub_keys.len(),
                members: msg.members.len(),
            });
        }
        let my_pos = msg
            .members
            .iter()
            .position(|m| m == &self.id)
            .ok_or(AskeError::SelfNotInMembers)?;

        self.members = msg.members.clone();
        self.nonces = msg.nonces.clone();
        self.ephemeral_pub_keys = msg.pub_keys.clone();

        let nonce = self.crypto.random_bytes(32);
        let keypair = self
            .crypto
            .ed25519_keygen()
            .map_err(|_| AskeError::MissingEphemeralKey(self.id.clone()))?;

        self.nonce = Some(nonce.clone());
        self.ek_priv = Some(keypair.secret);
        self.ek_pub = Some(keypair.public);
        self.nonces.push(nonce);
        self.ephemeral_pub_keys.push(keypair.public);

        let mut out = AskeMessage {
            source: self.id.clone(),
            dest: String::new(),
            flow: Flow::Upflow,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: None,
        };

        if my_pos == self.members.len() - 1 {
            let sid = derive_session_id(self.crypto.as_ref(), &self.members, &self.nonces);
            self.session_id = Some(sid);
            out.flow = Flow::Downflow;
            out.dest = String::new();
            self.authenticated = vec![false; self.members.len()];
            self.authenticated[my_pos] = true;
            out.session_signature = Some(self.sign_session_ack()?);
            tracing::debug!(
                id = %self.id,
                ek_pub = %keypair.public,
                "upflow: last in chain, broadcasting downflow"
            );
        } else {
            out.dest = self.members[my_pos + 1].clone();
            tracing::debug!(id = %self.id, next = %out.dest, "upflow: forwarding");
        }

        Ok(out)
    }

    /// Processes a downflow broadcast. Returns `Some` with our own
    /// broadcast if we have not already sent one for the current session,
    /// `None` if we already have.
    pub fn downflow(&mut self, msg: &AskeMessage) -> Result<Option<AskeMessage>, AskeError> {
        let mut seen = std::collections::HashSet::new();
        for m in &msg.members {
            if !seen.insert(m.as_str()) {
                return Err(AskeError::DuplicateMember);
            }
        }

        let sid = derive_session_id(self.crypto.as_ref(), &msg.members, &msg.nonces);
        let was_already_current = self.session_id == Some(sid);

        if !was_already_current {
            self.members = msg.members.clone();
            self.nonces = msg.nonces.clone();
            self.ephemeral_pub_keys = msg.pub_keys.clone();
            self.session_id = Some(sid);
            self.authenticated = vec![false; self.members.len()];
            if let Some(my_pos) = self.members.iter().position(|m| m == &self.id) {
                self.authenticated[my_pos] = true;
            }
            tracing::debug!(id = %self.id, "downflow: adopted new session");
        }

        self.verify_session_ack(msg)?;
        let sender_pos = self.members.iter().position(|m| m == &msg.source);
        if let Some(pos) = sender_pos {
            self.authenticated[pos] = true;
        }
        let sender_ek = sender_pos
            .and_then(|pos| self.ephemeral_pub_keys.get(pos))
            .map(|k| k.fingerprint())
            .unwrap_or_default();
        tracing::debug!(
            id = %self.id,
            sender = %msg.source,
            sender_ek,
            "downflow: sender authenticated"
        );

        if was_already_current {
            return Ok(None);
        }

        let mut out = msg.clone();
        out.source = self.id.clone();
        out.session_signature = Some(self.sign_session_ack()?);
        Ok(Some(out))
    }

    /// Appends `new_members`, producing an upflow addressed to the first of
    /// them carrying the current positional arrays.
    pub fn join(&mut self, new_members: Vec<String>) -> Result<AskeMessage, AskeError> {
        if new_members.is_empty() {
            return Err(AskeError::EmptyJoin);
        }
        let mut seen: std::collections::HashSet<&str> =
            self.members.iter().map(|m| m.as_str()).collect();
        for m in &new_members {
            if !seen.insert(m.as_str()) {
                return Err(AskeError::DuplicateMember);
            }
        }

        self.members.extend(new_members.clone());
        tracing::debug!(id = %self.id, ?new_members, "join: extending upflow");

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: new_members[0].clone(),
            flow: Flow::Upflow,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: None,
        })
    }

    /// Removes `exclude_members`, producing a fresh downflow broadcast.
    pub fn exclude(&mut self, exclude_members: Vec<String>) -> Result<AskeMessage, AskeError> {
        if exclude_members.is_empty() {
            return Err(AskeError::EmptyExclude);
        }
        for pid in &exclude_members {
            if pid == &self.id {
                return Err(AskeError::CannotExcludeSelf);
            }
            if !self.members.contains(pid) {
                return Err(AskeError::NotAMember(pid.clone()));
            }
        }

        for pid in &exclude_members {
            let pos = self.members.iter().position(|m| m == pid).expect("checked above");
            self.old_ephemeral_keys.insert(
                pid.clone(),
                OldEphemeralKey {
                    public: self.ephemeral_pub_keys[pos],
                    authenticated: self.authenticated[pos],
                },
            );
            self.members.remove(pos);
            self.nonces.remove(pos);
            self.ephemeral_pub_keys.remove(pos);
            self.authenticated.remove(pos);
        }

        let sid = derive_session_id(self.crypto.as_ref(), &self.members, &self.nonces);
        self.session_id = Some(sid);
        self.authenticated = vec![false; self.members.len()];
        if let Some(my_pos) = self.members.iter().position(|m| m == &self.id) {
            self.authenticated[my_pos] = true;
        }
        tracing::debug!(id = %self.id, ?exclude_members, "exclude: re-keyed, broadcasting downflow");

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: String::new(),
            flow: Flow::Downflow,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: Some(self.sign_session_ack()?),
        })
    }

    fn sign_session_ack(&self) -> Result<SignatureBytes, AskeError> {
        let ek_pub = self
            .ek_pub
            .ok_or_else(|| AskeError::MissingEphemeralKey(self.id.clone()))?;
        let nonce = self
            .nonce
            .as_ref()
            .ok_or_else(|| AskeError::MissingEphemeralKey(self.id.clone()))?;
        let sid = self.session_id.ok_or(AskeError::MissingSessionId)?;

        let ack_bytes = compute_ack_bytes(&self.id, &ek_pub, nonce, &sid);
        let hash = self.crypto.sha256(&ack_bytes);
        Ok(self.crypto.ed25519_sign(&self.sk_priv, &hash))
    }

    fn verify_session_ack(&self, msg: &AskeMessage) -> Result<(), AskeError> {
        let sid = self.session_id.ok_or(AskeError::MissingSessionId)?;
        let pos = self
            .members
            .iter()
            .position(|m| m == &msg.source)
            .ok_or_else(|| AskeError::MemberNotFound(msg.source.clone()))?;
        let ek_pub = self
            .members
            .get(pos)
            .and_then(|_| self.ephemeral_pub_keys.get(pos))
            .ok_or_else(|| AskeError::MissingEphemeralKey(msg.source.clone()))?;
        let nonce = self
            .nonces
            .get(pos)
            .ok_or_else(|| AskeError::MissingEphemeralKey(msg.source.clone()))?;
        let static_pub = self
            .static_dir
            .get(&msg.source)
            .ok_or_else(|| AskeError::UnknownPeer(msg.source.clone()))?;
        let sig = msg
            .session_signature
            .as_ref()
            .ok_or_else(|| AskeError::AuthenticationFailed(msg.source.clone()))?;

        let ack_bytes = compute_ack_bytes(&msg.source, ek_pub, nonce, &sid);
        let hash = self.crypto.sha256(&ack_bytes);
        self.crypto
            .ed25519_verify(&static_pub, &hash, sig)
            .map_err(|_| AskeError::AuthenticationFailed(msg.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aske_crypto::capability::OsRngCrypto;
    use crate::directory::InMemoryKeyDir;

    struct Fixture {
        crypto: Arc<dyn Crypto>,
        dir: Arc<InMemoryKeyDir>,
    }

    fn setup(ids: &[&str]) -> (Fixture, Vec<Member>) {
        let mut dir = InMemoryKeyDir::new();
        let crypto: Arc<dyn Crypto> = Arc::new(OsRngCrypto);
        // Build keys first so the shared directory already has everyone
        // before constructing the members that borrow it.
        let mut keys = Vec::new();
        for id in ids {
            let kp = OsRngCrypto.ed25519_keygen().unwrap();
            dir.insert(*id, kp.public);
            keys.push((id, kp.secret));
        }
        let dir = Arc::new(dir);
        let fx = Fixture {
            crypto: crypto.clone(),
            dir: dir.clone(),
        };
        let members = keys
            .into_iter()
            .map(|(id, sk)| Member::new(*id, sk, dir.clone() as Arc<dyn StaticKeyDir>, crypto.clone()))
            .collect();
        (fx, members)
    }

    #[test]
    fn commit_requires_other_members() {
        let (_fx, mut members) = setup(&["a"]);
        let err = members[0].commit(vec![]).unwrap_err();
        assert_eq!(err, AskeError::EmptyCommit);
    }

    #[test]
    fn full_three_member_upflow_downflow() {
        let (_fx, mut members) = setup(&["a", "b", "c"]);
        let [a, b, c]: &mut [Member; 3] = members.as_mut_slice().try_into().unwrap();

        let to_b = a.commit(vec!["b".into(), "c".into()]).unwrap();
        assert_eq!(to_b.dest, "b");

        let to_c = b.upflow(&to_b).unwrap();
        assert_eq!(to_c.dest, "c");

        let broadcast = c.upflow(&to_c).unwrap();
        assert_eq!(broadcast.dest, "");
        assert!(c.is_session_acknowledged() == false || c.is_session_acknowledged());

        let b_ack = b.downflow(&broadcast).unwrap().expect("b must broadcast its own ack");
        let a_ack = a.downflow(&broadcast).unwrap().expect("a must broadcast its own ack");

        // Cross-apply: everyone sees everyone else's ack.
        assert!(a.downflow(&b_ack).unwrap().is_none());
        assert!(c.downflow(&b_ack).unwrap().is_none());
        assert!(b.downflow(&a_ack).unwrap().is_none());
        assert!(c.downflow(&a_ack).unwrap().is_none());
        // c's own broadcast, re-delivered to a and b (e.g. via transport echo):
        assert!(a.downflow(&broadcast).unwrap().is_none());
        assert!(b.downflow(&broadcast).unwrap().is_none());

        assert!(a.is_session_acknowledged());
        assert!(b.is_session_acknowledged());
        assert!(c.is_session_acknowledged());
        assert_eq!(a.session_id(), b.session_id());
        assert_eq!(b.session_id(), c.session_id());
    }

    #[test]
    fn downflow_rejects_bad_signature() {
        let (_fx, mut members) = setup(&["a", "b", "c"]);
        let [a, b, c]: &mut [Member; 3] = members.as_mut_slice().try_into().unwrap();

        let to_b = a.commit(vec!["b".into(), "c".into()]).unwrap();
        let to_c = b.upflow(&to_b).unwrap();
        let mut broadcast = c.upflow(&to_c).unwrap();

        // Tamper with the signature.
        broadcast.session_signature = Some(aske_crypto::capability::SignatureBytes(vec![0u8; 64]));

        let err = a.downflow(&broadcast).unwrap_err();
        assert_eq!(err, AskeError::AuthenticationFailed("c".into()));
        // a adopted the session but is not yet authenticated for c.
        assert_eq!(a.state(), SessionState::AwaitingAcks);
    }

    #[test]
    fn exclude_then_rekey() {
        let (_fx, mut members) = setup(&["a", "b", "c"]);
        let [a, b, c]: &mut [Member; 3] = members.as_mut_slice().try_into().unwrap();

        let to_b = a.commit(vec!["b".into(), "c".into()]).unwrap();
        let to_c = b.upflow(&to_b).unwrap();
        let broadcast = c.upflow(&to_c).unwrap();
        let b_ack = b.downflow(&broadcast).unwrap().unwrap();
        let a_ack = a.downflow(&broadcast).unwrap().unwrap();
        a.downflow(&b_ack).unwrap();
        b.downflow(&a_ack).unwrap();
        c.downflow(&a_ack).unwrap();
        c.downflow(&b_ack).unwrap();

        let original_sid = a.session_id();
        assert!(a.is_session_acknowledged());

        let downflow = a.exclude(vec!["c".into()]).unwrap();
        assert_ne!(a.session_id(), original_sid);
        assert!(a.old_ephemeral_keys().contains_key("c"));

        let b_new_ack = b.downflow(&downflow).unwrap().unwrap();
        assert_ne!(b.session_id(), original_sid);
        assert_eq!(b.session_id(), a.session_id());
        a.downflow(&b_new_ack).unwrap();
        assert!(a.is_session_acknowledged());
        assert!(b.is_session_acknowledged());
    }

    #[test]
    fn upflow_rejects_duplicate_members() {
        let (_fx, mut members) = setup(&["a", "b"]);
        let msg = AskeMessage::empty_upflow("a", "b", vec!["a".into(), "a".into()]);
        let err = members[1].upflow(&msg).unwrap_err();
        assert_eq!(err, AskeError::DuplicateMember);
    }

    #[test]
    fn upflow_rejects_when_self_absent() {
        let (_fx, mut members) = setup(&["a", "b"]);
        let msg = AskeMessage::empty_upflow("a", "z", vec!["a".into(), "z".into()]);
        let err = members[1].upflow(&msg).unwrap_err();
        assert_eq!(err, AskeError::SelfNotInMembers);
    }

    #[test]
    fn join_rejects_empty_and_duplicate_members() {
        let (_fx, mut members) = setup(&["a", "b"]);
        assert_eq!(members[0].join(vec![]).unwrap_err(), AskeError::EmptyJoin);
        assert_eq!(
            members[0].join(vec!["b".into()]).unwrap_err(),
            AskeError::DuplicateMember
        );
    }

    #[test]
    fn join_extends_members_and_targets_first_new_member() {
        let (_fx, mut members) = setup(&["a", "b"]);
        let msg = members[0].join(vec!["c".into(), "d".into()]).unwrap();
        assert_eq!(msg.dest, "c");
        let msg_ids: Vec<&str> = msg.members.iter().map(String::as_str).collect();
        assert_eq!(msg_ids, vec!["a", "b", "c", "d"]);
        let ids: Vec<&str> = members[0].members().iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn exclude_rejects_empty_self_and_non_member() {
        let (_fx, mut members) = setup(&["a", "b", "c"]);
        assert_eq!(members[0].exclude(vec![]).unwrap_err(), AskeError::EmptyExclude);
        assert_eq!(
            members[0].exclude(vec!["a".into()]).unwrap_err(),
            AskeError::CannotExcludeSelf
        );
        assert_eq!(
            members[0].exclude(vec!["z".into()]).unwrap_err(),
            AskeError::NotAMember("z".into())
        );
    }
}
