//! The derived linear message log (spec §4.F).
//!
//! A `DefaultMessageLog` tracks one or more transcripts over their lifetime
//! (e.g. a session rekey spawns a fresh transcript while the log continues),
//! flattening accepted messages into one observable, linearly-indexed
//! sequence. Ownership of the tracked `BaseTranscript`s stays with the
//! caller; the log is driven explicitly via [`DefaultMessageLog::ingest`]
//! rather than holding stored subscriber callbacks, since the latter would
//! require interior mutability the rest of this crate avoids.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::msg::{Msg, MsgId};
use crate::transcript::BaseTranscript;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageLogError {
    #[error("message log subscriptions accept at most one parent transcript")]
    MultipleParentTranscripts,
    #[error("unknown transcript handle")]
    UnknownTranscript,
    #[error("message {0:?} not found in its transcript")]
    MessageNotFound(MsgId),
}

/// Opaque handle identifying one of the transcripts a log is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranscriptHandle(usize);

struct TrackedTranscript {
    parent: Option<TranscriptHandle>,
    /// The latest resolved payload-parent frontier for this transcript —
    /// handed off to a child transcript's first message when its own
    /// frontier is empty.
    frontier: BTreeSet<MsgId>,
}

struct LogEntry {
    mid: MsgId,
    transcript: TranscriptHandle,
    parents: BTreeSet<MsgId>,
}

pub struct DefaultMessageLog {
    should_ignore: Box<dyn Fn(&Msg) -> bool + Send + Sync>,
    transcripts: Vec<TrackedTranscript>,
    entries: Vec<LogEntry>,
    index_of: std::collections::HashMap<MsgId, usize>,
}

impl DefaultMessageLog {
    /// `should_ignore` is the domain predicate distinguishing control
    /// traffic (session key-agreement chatter) from user-visible payload
    /// messages.
    pub fn new(should_ignore: impl Fn(&Msg) -> bool + Send + Sync + 'static) -> Self {
        Self {
            should_ignore: Box::new(should_ignore),
            transcripts: Vec::new(),
            entries: Vec::new(),
            index_of: std::collections::HashMap::new(),
        }
    }

    /// Registers a new transcript to track, optionally chained from a
    /// previously-registered parent transcript for frontier hand-off.
    /// Declaring more than one parent is rejected — multi-parent topologies
    /// are out of scope for this log.
    pub fn get_subscriber_for(
        &mut self,
        parents: &[TranscriptHandle],
    ) -> Result<TranscriptHandle, MessageLogError> {
        if parents.len() > 1 {
            return Err(MessageLogError::MultipleParentTranscripts);
        }
        if let Some(p) = parents.first() {
            if p.0 >= self.transcripts.len() {
                return Err(MessageLogError::UnknownTranscript);
            }
        }
        let handle = TranscriptHandle(self.transcripts.len());
        self.transcripts.push(TrackedTranscript {
            parent: parents.first().copied(),
            frontier: BTreeSet::new(),
        });
        Ok(handle)
    }

    fn should_ignore_id(&self, transcript: &BaseTranscript, id: &MsgId) -> bool {
        match transcript.get(id) {
            Some(m) => (self.should_ignore)(&m),
            None => false,
        }
    }

    /// Processes one message that was just accepted by `transcript` under
    /// `handle`. Returns the `(index, mId)` notification pair for the
    /// caller to fan out to its own subscribers, or `None` if the message
    /// was ignored (a control message, never surfaced in the log).
    pub fn ingest(
        &mut self,
        transcript: &BaseTranscript,
        handle: TranscriptHandle,
        mid: &MsgId,
    ) -> Result<Option<(usize, MsgId)>, MessageLogError> {
        if handle.0 >= self.transcripts.len() {
            return Err(MessageLogError::UnknownTranscript);
        }
        let msg = transcript.get(mid).ok_or_else(|| MessageLogError::MessageNotFound(mid.clone()))?;
        if (self.should_ignore)(&msg) {
            return Ok(None);
        }

        let mut payload_parents: BTreeSet<MsgId> = transcript
            .pre_pred(mid, &|cand| !self.should_ignore_id(transcript, cand))
            .into_iter()
            .collect();

        if payload_parents.is_empty() {
            if let Some(parent_handle) = self.transcripts[handle.0].parent {
                payload_parents = self.transcripts[parent_handle.0].frontier.clone();
            }
        }

        let tracked = &mut self.transcripts[handle.0];
        for p in &payload_parents {
            tracked.frontier.remove(p);
        }
        tracked.frontier.insert(mid.clone());

        let index = self.entries.len();
        self.entries.push(LogEntry {
            mid: mid.clone(),
            transcript: handle,
            parents: payload_parents,
        });
        self.index_of.insert(mid.clone(), index);

        tracing::trace!(mid = ?mid, index, "message log: appended");

        Ok(Some((index, mid.clone())))
    }

    pub fn length(&self) -> usize {
        self.entries.len()
    }

    /// Supports negative indices counting back from the end, Python-slice
    /// style.
    pub fn at(&self, i: isize) -> Option<&MsgId> {
        let idx = Self::resolve_index(i, self.entries.len())?;
        self.entries.get(idx).map(|e| &e.mid)
    }

    fn resolve_index(i: isize, len: usize) -> Option<usize> {
        let idx = if i < 0 { len as isize + i } else { i };
        if idx < 0 || idx as usize >= len {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn index_of(&self, mid: &MsgId) -> Option<usize> {
        self.index_of.get(mid).copied()
    }

    pub fn cur_parents(&self, handle: TranscriptHandle) -> BTreeSet<MsgId> {
        self.transcripts
            .get(handle.0)
            .map(|t| t.frontier.clone())
            .unwrap_or_default()
    }

    pub fn has(&self, mid: &MsgId) -> bool {
        self.index_of.contains_key(mid)
    }

    pub fn get(&self, mid: &MsgId) -> Option<&MsgId> {
        self.index_of.get(mid).map(|&i| &self.entries[i].mid)
    }

    pub fn parents(&self, mid: &MsgId) -> Option<BTreeSet<MsgId>> {
        let &i = self.index_of.get(mid)?;
        Some(self.entries[i].parents.clone())
    }

    pub fn slice(&self, start: isize, end: isize) -> Vec<MsgId> {
        let len = self.entries.len();
        let start = Self::clamp_index(start, len);
        let end = Self::clamp_index(end, len);
        if start >= end {
            return Vec::new();
        }
        self.entries[start..end].iter().map(|e| e.mid.clone()).collect()
    }

    fn clamp_index(i: isize, len: usize) -> usize {
        let idx = if i < 0 { len as isize + i } else { i };
        idx.clamp(0, len as isize) as usize
    }

    pub fn unackby(&self, transcript: &BaseTranscript, mid: &MsgId) -> BTreeSet<String> {
        transcript.unackby(mid)
    }

    /// `unacked()` merged across every tracked transcript and sorted by
    /// this log's own index — callers pass the transcripts in the same
    /// order their handles were issued.
    pub fn unacked(&self, transcripts: &[&BaseTranscript]) -> Vec<MsgId> {
        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<(usize, MsgId)> = Vec::new();
        for t in transcripts.iter() {
            for mid in t.unacked() {
                if self.has(&mid) && seen.insert(mid.clone()) {
                    if let Some(idx) = self.index_of(&mid) {
                        out.push((idx, mid));
                    }
                }
            }
        }
        out.sort_by_key(|(idx, _)| *idx);
        out.into_iter().map(|(_, mid)| mid).collect()
    }
}
