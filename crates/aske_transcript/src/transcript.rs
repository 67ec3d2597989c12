//! The causal transcript DAG (spec §4.E).
//!
//! Append-only: `add()` validates every invariant from spec §3 before
//! mutating anything, then commits, then propagates implicit acks. A
//! transcript that is `poisoned` rejects every future `add()` — see the
//! module-level note on poisoning below.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::TranscriptError;
use crate::msg::{Msg, MsgId};

/// Internal dense-arena record. `MsgId` is interned to its index in
/// `BaseTranscript::entries`; all parent/child/context relations are stored
/// as indices rather than repeated `MsgId` clones.
struct Entry {
    id: MsgId,
    author: String,
    parents: Vec<u32>,
    successors: Vec<u32>,
    readers: std::collections::BTreeSet<String>,
    body: Vec<u8>,
    /// For each reader, the latest (by that reader) message visible before
    /// this one. Computed once at commit time (spec §4.E step 3).
    context: HashMap<String, u32>,
    /// Readers who have not yet produced a descendant of this message.
    unackby: HashSet<String>,
    /// Position in accept-order; accept-order is a linear extension of `le`.
    accept_index: usize,
    /// Position within this author's own messages (`by_author` order).
    author_seq: usize,
}

/// A view into a transcript's shape, passed to a [`Merger`] instead of
/// closure-captured state — this is the "explicit vtable" called for in the
/// design notes, so a merge policy can be swapped without touching
/// `BaseTranscript::add`.
pub trait TranscriptView {
    fn pre(&self, id: &MsgId) -> Vec<MsgId>;
    fn suc(&self, id: &MsgId) -> Vec<MsgId>;
    fn le(&self, a: &MsgId, b: &MsgId) -> bool;
    /// `{author} ∪ readers` of the message itself (not the transcript-wide
    /// membership — that's what the merge computes).
    fn members_of(&self, id: &MsgId) -> std::collections::BTreeSet<String>;
}

/// Computes the merged membership across a set of concurrent parents.
pub trait Merger: Send + Sync {
    fn merge(
        &self,
        parents: &[MsgId],
        view: &dyn TranscriptView,
    ) -> Result<std::collections::BTreeSet<String>, TranscriptError>;
}

/// The merger used when nothing more specific is configured. Parents in a
/// validated parent set are pairwise causally unordered (the set is already
/// transitively reduced), so any disagreement between their member sets is,
/// by definition, a genuine concurrent conflict rather than a causal
/// evolution — there is nothing to arbitrate between, unlike the context
/// map's "prefer the greater value" merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMerger;

impl Merger for DefaultMerger {
    fn merge(
        &self,
        parents: &[MsgId],
        view: &dyn TranscriptView,
    ) -> Result<std::collections::BTreeSet<String>, TranscriptError> {
        let mut sets = parents.iter().map(|p| view.members_of(p));
        let Some(first) = sets.next() else {
            return Ok(std::collections::BTreeSet::new());
        };
        for s in sets {
            if s != first {
                return Err(TranscriptError::MembershipConflict);
            }
        }
        Ok(first)
    }
}

pub struct BaseTranscript {
    merger: Box<dyn Merger>,
    entries: Vec<Entry>,
    index_of: HashMap<MsgId, u32>,
    by_author: HashMap<String, Vec<u32>>,
    roots: HashSet<u32>,
    frontier: HashSet<u32>,
    poisoned: bool,
}

impl Default for BaseTranscript {
    fn default() -> Self {
        Self::new(Box::new(DefaultMerger))
    }
}

impl BaseTranscript {
    pub fn new(merger: Box<dyn Merger>) -> Self {
        Self {
            merger,
            entries: Vec::new(),
            index_of: HashMap::new(),
            by_author: HashMap::new(),
            roots: HashSet::new(),
            frontier: HashSet::new(),
            poisoned: false,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn index(&self, id: &MsgId) -> Option<u32> {
        self.index_of.get(id).copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot in accept-order. Accept-order equals insertion order here,
    /// since every commit appends exactly one entry.
    pub fn all(&self) -> Vec<MsgId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn has(&self, id: &MsgId) -> bool {
        self.index_of.contains_key(id)
    }

    pub fn min(&self) -> std::collections::BTreeSet<MsgId> {
        self.roots.iter().map(|&i| self.entries[i as usize].id.clone()).collect()
    }

    pub fn max(&self) -> std::collections::BTreeSet<MsgId> {
        self.frontier.iter().map(|&i| self.entries[i as usize].id.clone()).collect()
    }

    pub fn pre(&self, id: &MsgId) -> Vec<MsgId> {
        match self.index(id) {
            Some(i) => self.entries[i as usize]
                .parents
                .iter()
                .map(|&p| self.entries[p as usize].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn suc(&self, id: &MsgId) -> Vec<MsgId> {
        match self.index(id) {
            Some(i) => self.entries[i as usize]
                .successors
                .iter()
                .map(|&s| self.entries[s as usize].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn le(&self, a: &MsgId, b: &MsgId) -> bool {
        if a == b {
            return true;
        }
        match (self.index(a), self.index(b)) {
            (Some(ai), Some(bi)) => self.le_idx(ai, bi),
            _ => false,
        }
    }

    pub fn ge(&self, a: &MsgId, b: &MsgId) -> bool {
        self.le(b, a)
    }

    fn le_idx(&self, a: u32, b: u32) -> bool {
        if a == b {
            return true;
        }
        let ea = &self.entries[a as usize];
        let eb = &self.entries[b as usize];

        if ea.author == eb.author {
            return ea.author_seq <= eb.author_seq;
        }
        if eb.readers.contains(&ea.author) {
            return match eb.context.get(&ea.author) {
                Some(&ctx_idx) => ea.author_seq <= self.entries[ctx_idx as usize].author_seq,
                None => false,
            };
        }
        if ea.accept_index > eb.accept_index {
            return false;
        }
        let mut stack: Vec<u32> = eb.parents.clone();
        let mut visited = HashSet::new();
        while let Some(idx) = stack.pop() {
            if idx == a {
                return true;
            }
            if !visited.insert(idx) {
                continue;
            }
            stack.extend(self.entries[idx as usize].parents.iter().copied());
        }
        false
    }

    pub fn all_authors(&self) -> std::collections::BTreeSet<String> {
        self.by_author.keys().cloned().collect()
    }

    pub fn author(&self, id: &MsgId) -> Option<String> {
        self.index(id).map(|i| self.entries[i as usize].author.clone())
    }

    pub fn by(&self, u_id: &str) -> Vec<MsgId> {
        self.by_author
            .get(u_id)
            .map(|v| v.iter().map(|&i| self.entries[i as usize].id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &MsgId) -> Option<Msg> {
        let i = self.index(id)?;
        let e = &self.entries[i as usize];
        Some(Msg {
            id: e.id.clone(),
            author: e.author.clone(),
            parents: e.parents.iter().map(|&p| self.entries[p as usize].id.clone()).collect(),
            readers: e.readers.clone(),
            body: e.body.clone(),
        })
    }

    pub fn unackby(&self, id: &MsgId) -> std::collections::BTreeSet<String> {
        match self.index(id) {
            Some(i) => self.entries[i as usize].unackby.iter().cloned().collect(),
            None => std::collections::BTreeSet::new(),
        }
    }

    /// Still-unacked messages, sorted by accept-index.
    pub fn unacked(&self) -> Vec<MsgId> {
        let mut v: Vec<&Entry> = self.entries.iter().filter(|e| !e.unackby.is_empty()).collect();
        v.sort_by_key(|e| e.accept_index);
        v.into_iter().map(|e| e.id.clone()).collect()
    }

    pub fn pre_uid(&self, id: &MsgId) -> Option<MsgId> {
        let i = self.index(id)?;
        let e = &self.entries[i as usize];
        if e.author_seq == 0 {
            return None;
        }
        let prev_idx = self.by_author.get(&e.author)?[e.author_seq - 1];
        Some(self.entries[prev_idx as usize].id.clone())
    }

    pub fn pre_ruid(&self, id: &MsgId, ru_id: &str) -> Option<MsgId> {
        let i = self.index(id)?;
        let ctx_idx = *self.entries[i as usize].context.get(ru_id)?;
        Some(self.entries[ctx_idx as usize].id.clone())
    }

    /// Walks ancestors of `id`, collecting the nearest ones satisfying
    /// `pred` and skipping past (without collecting) any that don't —
    /// e.g. finding the nearest non-ignored ancestors across a run of
    /// filtered-out control messages.
    pub fn pre_pred(&self, id: &MsgId, pred: &dyn Fn(&MsgId) -> bool) -> Vec<MsgId> {
        let Some(start) = self.index(id) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<u32> = self.entries[start as usize].parents.clone();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let eid = self.entries[idx as usize].id.clone();
            if pred(&eid) {
                result.push(eid);
            } else {
                stack.extend(self.entries[idx as usize].parents.iter().copied());
            }
        }
        result
    }

    /// First descendant of `id` authored by `ru_id`, breadth-first.
    pub fn suc_ruid(&self, id: &MsgId, ru_id: &str) -> Option<MsgId> {
        let start = self.index(id)?;
        let mut queue: VecDeque<u32> = self.entries[start as usize].successors.iter().copied().collect();
        let mut visited = HashSet::new();
        while let Some(idx) = queue.pop_front() {
            if !visited.insert(idx) {
                continue;
            }
            let e = &self.entries[idx as usize];
            if e.author == ru_id {
                return Some(e.id.clone());
            }
            queue.extend(e.successors.iter().copied());
        }
        None
    }

    pub fn merge_members(
        &self,
        parents: &[MsgId],
    ) -> Result<std::collections::BTreeSet<String>, TranscriptError> {
        self.merger.merge(parents, self)
    }

    pub fn add(&mut self, msg: Msg) -> Result<Vec<MsgId>, TranscriptError> {
        if self.poisoned {
            return Err(TranscriptError::Poisoned);
        }

        if msg.parents.contains(&msg.id) {
            return Err(TranscriptError::SelfReferentialParent);
        }
        if self.has(&msg.id) {
            return Err(TranscriptError::AlreadyPresent(msg.id.clone()));
        }
        if msg.id.is_empty() || msg.author.is_empty() {
            return Err(TranscriptError::NullIdentity);
        }
        if msg.readers.contains(&msg.author) {
            return Err(TranscriptError::SelfReader);
        }

        let mut parent_indices = Vec::with_capacity(msg.parents.len());
        for p in &msg.parents {
            match self.index(p) {
                Some(i) => parent_indices.push(i),
                None => return Err(TranscriptError::ParentMissing(p.clone())),
            }
        }
        for &pi in &parent_indices {
            let p = &self.entries[pi as usize];
            let is_reader = p.author == msg.author || p.readers.contains(&msg.author);
            if !is_reader {
                return Err(TranscriptError::SecretParent(msg.author.clone(), p.id.clone()));
            }
        }
        {
            let mut seen_authors = HashSet::new();
            for &pi in &parent_indices {
                if !seen_authors.insert(self.entries[pi as usize].author.clone()) {
                    return Err(TranscriptError::NonDistinctParentAuthors);
                }
            }
        }
        if let Some(&prev_idx) = self.by_author.get(&msg.author).and_then(|v| v.last()) {
            let succeeds = parent_indices.iter().any(|&pi| self.le_idx(prev_idx, pi));
            if !succeeds {
                return Err(TranscriptError::PerAuthorTotalityViolation(msg.author.clone()));
            }
        }

        let parent_ids: Vec<MsgId> = msg.parents.iter().cloned().collect();
        self.merge_members(&parent_ids)?;

        let mut ctx: HashMap<String, u32> = HashMap::new();
        for &pi in &parent_indices {
            for (k, &v_idx) in &self.entries[pi as usize].context {
                match ctx.get(k) {
                    None => {
                        ctx.insert(k.clone(), v_idx);
                    }
                    Some(&existing) => {
                        if existing != v_idx && self.le_idx(existing, v_idx) {
                            ctx.insert(k.clone(), v_idx);
                        }
                    }
                }
            }
        }
        for &pi in &parent_indices {
            let p_author = self.entries[pi as usize].author.clone();
            ctx.insert(p_author, pi);
        }
        ctx.retain(|k, _| msg.readers.contains(k));

        let new_idx = self.entries.len() as u32;
        let accept_index = self.entries.len();
        let author_seq = self.by_author.get(&msg.author).map(|v| v.len()).unwrap_or(0);

        for &pi in &parent_indices {
            self.frontier.remove(&pi);
            self.entries[pi as usize].successors.push(new_idx);
        }
        self.frontier.insert(new_idx);
        if parent_indices.is_empty() {
            self.roots.insert(new_idx);
        }

        self.entries.push(Entry {
            id: msg.id.clone(),
            author: msg.author.clone(),
            parents: parent_indices,
            successors: Vec::new(),
            readers: msg.readers.clone(),
            body: msg.body,
            context: ctx,
            unackby: msg.readers.into_iter().collect(),
            accept_index,
            author_seq,
        });
        self.index_of.insert(msg.id.clone(), new_idx);
        self.by_author.entry(msg.author.clone()).or_default().push(new_idx);

        let newly_acked = self.propagate_acks(new_idx, &msg.author);

        tracing::trace!(
            mid = ?msg.id,
            author = %msg.author,
            newly_acked = newly_acked.len(),
            "transcript: accepted message"
        );

        Ok(newly_acked)
    }

    fn propagate_acks(&mut self, start_idx: u32, author: &str) -> Vec<MsgId> {
        let mut newly_acked_idx = Vec::new();
        let mut stack: Vec<u32> = self.entries[start_idx as usize].parents.clone();
        let mut visited = HashSet::new();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let removed = self.entries[idx as usize].unackby.remove(author);
            if removed {
                if self.entries[idx as usize].unackby.is_empty() {
                    newly_acked_idx.push(idx);
                }
                stack.extend(self.entries[idx as usize].parents.iter().copied());
            }
        }
        newly_acked_idx.sort_by_key(|&idx| self.entries[idx as usize].accept_index);
        newly_acked_idx
            .into_iter()
            .map(|idx| self.entries[idx as usize].id.clone())
            .collect()
    }
}

impl TranscriptView for BaseTranscript {
    fn pre(&self, id: &MsgId) -> Vec<MsgId> {
        BaseTranscript::pre(self, id)
    }

    fn suc(&self, id: &MsgId) -> Vec<MsgId> {
        BaseTranscript::suc(self, id)
    }

    fn le(&self, a: &MsgId, b: &MsgId) -> bool {
        BaseTranscript::le(self, a, b)
    }

    fn members_of(&self, id: &MsgId) -> std::collections::BTreeSet<String> {
        match self.get(id) {
            Some(m) => m.members(),
            None => std::collections::BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn mid(b: &[u8]) -> MsgId {
        MsgId::new(b.to_vec())
    }

    fn msg(id: &[u8], author: &str, parents: &[&[u8]], readers: &[&str]) -> Msg {
        Msg::new(
            mid(id),
            author,
            parents.iter().map(|p| mid(p)).collect(),
            readers.iter().map(|r| r.to_string()).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn per_author_totality_rejects_non_succeeding_message() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b"])).unwrap();
        t.add(msg(b"m2", "a", &[b"m1"], &["b"])).unwrap();

        let err = t.add(msg(b"m3", "a", &[], &["b"])).unwrap_err();
        assert_eq!(err, TranscriptError::PerAuthorTotalityViolation("a".into()));
        assert_eq!(t.size(), 2);
    }

    #[test]
    fn self_referential_parent_rejected() {
        let mut t = BaseTranscript::default();
        let m = msg(b"m1", "a", &[b"m1"], &["b"]);
        assert_eq!(t.add(m).unwrap_err(), TranscriptError::SelfReferentialParent);
    }

    #[test]
    fn author_cannot_be_reader() {
        let mut t = BaseTranscript::default();
        let m = msg(b"m1", "a", &[], &["a"]);
        assert_eq!(t.add(m).unwrap_err(), TranscriptError::SelfReader);
    }

    #[test]
    fn missing_parent_rejected() {
        let mut t = BaseTranscript::default();
        let m = msg(b"m1", "a", &[b"nope"], &["b"]);
        assert_eq!(t.add(m).unwrap_err(), TranscriptError::ParentMissing(mid(b"nope")));
    }

    #[test]
    fn secret_parent_rejected_when_author_not_a_reader() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["c"])).unwrap(); // b is not a reader of m1
        let m = msg(b"m2", "b", &[b"m1"], &["c"]);
        assert_eq!(
            t.add(m).unwrap_err(),
            TranscriptError::SecretParent("b".into(), mid(b"m1"))
        );
    }

    #[test]
    fn duplicate_parent_authors_rejected() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b", "c"])).unwrap();
        t.add(msg(b"m2", "a", &[b"m1"], &["b", "c"])).unwrap();
        // two parents both authored by "a" (m1 and m2) -- not distinct.
        let m = msg(b"m3", "b", &[b"m1", b"m2"], &["c"]);
        assert_eq!(t.add(m).unwrap_err(), TranscriptError::NonDistinctParentAuthors);
    }

    #[test]
    fn ack_propagation_marks_ancestors_fully_acked() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b"])).unwrap();
        assert_eq!(t.unackby(&mid(b"m1")), BTreeSet::from(["b".to_string()]));

        let acked = t.add(msg(b"m2", "b", &[b"m1"], &["a"])).unwrap();
        assert_eq!(acked, vec![mid(b"m1")]);
        assert!(t.unackby(&mid(b"m1")).is_empty());
        assert!(!t.unacked().contains(&mid(b"m1")));
    }

    #[test]
    fn le_is_reflexive_and_respects_author_order() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b"])).unwrap();
        t.add(msg(b"m2", "a", &[b"m1"], &["b"])).unwrap();
        assert!(t.le(&mid(b"m1"), &mid(b"m1")));
        assert!(t.le(&mid(b"m1"), &mid(b"m2")));
        assert!(!t.le(&mid(b"m2"), &mid(b"m1")));
    }

    #[test]
    fn conflicting_concurrent_membership_rejected() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"root", "a", &[], &["b", "c"])).unwrap();
        // Two concurrent children of root, disagreeing on membership.
        t.add(msg(b"b1", "b", &[b"root"], &["a"])).unwrap();
        t.add(msg(b"c1", "c", &[b"root"], &["a", "d"])).unwrap();

        let m = msg(b"m2", "a", &[b"b1", b"c1"], &["b", "c"]);
        assert_eq!(t.add(m).unwrap_err(), TranscriptError::MembershipConflict);
    }

    #[test]
    fn poisoned_transcript_rejects_everything() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b"])).unwrap();
        t.poisoned = true;
        let err = t.add(msg(b"m2", "a", &[b"m1"], &["b"])).unwrap_err();
        assert_eq!(err, TranscriptError::Poisoned);
    }

    #[test]
    fn already_present_rejected() {
        let mut t = BaseTranscript::default();
        t.add(msg(b"m1", "a", &[], &["b"])).unwrap();
        assert_eq!(
            t.add(msg(b"m1", "a", &[], &["b"])).unwrap_err(),
            TranscriptError::AlreadyPresent(mid(b"m1"))
        );
    }
}
