use thiserror::Error;

use crate::msg::MsgId;

/// Error taxonomy for the transcript DAG (spec §7, the subset that applies
/// to this component). `Poisoned` is terminal and sticky: once returned, every
/// later call to `BaseTranscript::add` returns it again.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("message references itself as a parent")]
    SelfReferentialParent,

    #[error("message {0:?} already present")]
    AlreadyPresent(MsgId),

    #[error("author and message id must be non-empty")]
    NullIdentity,

    #[error("author cannot be a reader of their own message")]
    SelfReader,

    #[error("parent {0:?} is missing from the transcript")]
    ParentMissing(MsgId),

    #[error("author {0} was not a reader of parent {1:?}")]
    SecretParent(String, MsgId),

    #[error("parents must be authored by distinct participants")]
    NonDistinctParentAuthors,

    #[error("message from {0} does not transitively succeed their previous message")]
    PerAuthorTotalityViolation(String),

    #[error("parents have conflicting, non-causally-ordered membership changes")]
    MembershipConflict,

    #[error("transcript is poisoned after a prior internal failure")]
    Poisoned,

    #[error("not implemented: {0}")]
    NotImplemented(String),
}
