use thiserror::Error;

/// Error taxonomy for the ASKE member state machine (spec §7).
///
/// All precondition violations are fatal for the current message only — the
/// member state is not mutated if an early check fails. `AuthenticationFailed`
/// aborts the message but leaves the member in `AwaitingAcks` so later valid
/// downflows may still complete authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AskeError {
    #[error("duplicate member in member list")]
    DuplicateMember,

    #[error("self not found in member list")]
    SelfNotInMembers,

    #[error("more nonces ({nonces}) than members ({members})")]
    TooManyNonces { nonces: usize, members: usize },

    #[error("more public keys ({pub_keys}) than members ({members})")]
    TooManyPubKeys { pub_keys: usize, members: usize },

    #[error("commit requires at least one other member")]
    EmptyCommit,

    #[error("join requires at least one new member")]
    EmptyJoin,

    #[error("exclude requires at least one member to exclude")]
    EmptyExclude,

    #[error("cannot exclude self")]
    CannotExcludeSelf,

    #[error("cannot exclude {0}: not a current member")]
    NotAMember(String),

    #[error("session-ack signature missing session id")]
    MissingSessionId,

    #[error("session-ack signature references member {0} not present in member list")]
    MemberNotFound(String),

    #[error("session-ack signature references member {0} with no ephemeral public key yet")]
    MissingEphemeralKey(String),

    #[error("no static public key on file for {0}")]
    UnknownPeer(String),

    #[error("signature verification failed for {0}")]
    AuthenticationFailed(String),
}
