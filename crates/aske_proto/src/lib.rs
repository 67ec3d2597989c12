//! ASKE: Authenticated Signature Key Exchange.
//!
//! Group key agreement producing a shared session id and, per member, a
//! session-authenticated ephemeral Ed25519 keypair. Built on the primitives
//! in [`aske_crypto`]; wire framing in [`codec`].

pub mod codec;
pub mod directory;
pub mod error;
pub mod member;
pub mod message;
pub mod wire;

pub use directory::{InMemoryKeyDir, StaticKeyDir};
pub use error::AskeError;
pub use member::{Member, OldEphemeralKey, SessionState};
pub use message::{AskeMessage, Flow};
pub use wire::WireError;
