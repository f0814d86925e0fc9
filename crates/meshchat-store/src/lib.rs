//! # meshchat-store
//!
//! Small key-value persistence for the mesh: the shared peer roster used
//! for bootstrap and the locally remembered account identity.
//!
//! The store is deliberately dumb. Many peers may write the same keys with
//! no coordination; last writer wins.

pub mod identity;
pub mod kv;
pub mod roster;

mod error;

pub use error::{Result, StoreError};
pub use identity::SavedAccount;
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use roster::Roster;
