//! Types shared by every meshchat crate: identifiers, identities and the
//! JSON wire protocol spoken over peer channels.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, ProtocolError};
pub use identity::{IdentityKind, PeerIdentity};
pub use protocol::{ChatMessage, HistoryEntry, Presence, SystemNotice, WireMessage};
pub use types::{ChannelDirection, ChannelId, MessageId, PeerId};
