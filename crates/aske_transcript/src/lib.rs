//! aske_transcript — causally-ordered transcript DAG and the derived
//! linear message log built on top of it.
//!
//! # Module layout
//! - `msg`        — `Msg`/`MsgId`, the transcript's data model
//! - `transcript`  — `BaseTranscript`, the append-only causal DAG, plus the
//!   `Merger`/`TranscriptView` vtable used to resolve concurrent membership
//! - `log`        — `DefaultMessageLog`, the derived linear view
//! - `error`      — the crate-wide error type

pub mod error;
pub mod log;
pub mod msg;
pub mod transcript;

pub use error::TranscriptError;
pub use log::{DefaultMessageLog, MessageLogError, TranscriptHandle};
pub use msg::{Msg, MsgId};
pub use transcript::{BaseTranscript, DefaultMerger, Merger, TranscriptView};
