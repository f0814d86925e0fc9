//! Shared roster of recently seen peer ids.
//!
//! Stored as a JSON array under [`ROSTER_KEY`], oldest first. Entries are
//! only ever appended or evicted from the front, never touched on use, so
//! concurrent writers can lose each other's entries but never corrupt one.

use std::sync::Arc;

use meshchat_shared::constants::{ROSTER_CAPACITY, ROSTER_KEY};
use meshchat_shared::types::PeerId;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kv::KeyValueStore;

#[derive(Clone)]
pub struct Roster {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
}

impl Roster {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, ROSTER_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Current snapshot, oldest to newest.
    pub fn list(&self) -> Result<Vec<PeerId>> {
        let Some(raw) = self.store.get(ROSTER_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<PeerId>>(&raw) {
            Ok(peers) => Ok(peers),
            Err(e) => {
                warn!(error = %e, "Roster entry is not a JSON array of ids, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Append `peer` if absent and evict the oldest entries beyond capacity.
    /// Returns the snapshot as written.
    pub fn register(&self, peer: &PeerId) -> Result<Vec<PeerId>> {
        let mut peers = self.list()?;
        let mut changed = false;

        if !peers.contains(peer) {
            peers.push(peer.clone());
            changed = true;
            debug!(peer = %peer, "Added self to roster");
        }

        if peers.len() > self.capacity {
            let excess = peers.len() - self.capacity;
            peers.drain(..excess);
            changed = true;
            debug!(evicted = excess, "Evicted oldest roster entries");
        }

        if changed {
            self.store.set(ROSTER_KEY, &serde_json::to_string(&peers)?)?;
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn peer(n: usize) -> PeerId {
        PeerId(format!("peer{n}"))
    }

    #[test]
    fn test_register_is_idempotent() {
        let roster = Roster::new(Arc::new(MemoryStore::new()));
        roster.register(&peer(1)).unwrap();
        roster.register(&peer(2)).unwrap();
        let snapshot = roster.register(&peer(1)).unwrap();

        assert_eq!(snapshot, vec![peer(1), peer(2)]);
        assert_eq!(roster.list().unwrap(), snapshot);
    }

    #[test]
    fn test_eleventh_entry_evicts_oldest() {
        let roster = Roster::new(Arc::new(MemoryStore::new()));
        for n in 0..10 {
            roster.register(&peer(n)).unwrap();
        }
        assert_eq!(roster.list().unwrap().len(), 10);

        let snapshot = roster.register(&peer(10)).unwrap();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot.first(), Some(&peer(1)));
        assert_eq!(snapshot.last(), Some(&peer(10)));
        assert!(!snapshot.contains(&peer(0)));
    }

    #[test]
    fn test_reregistering_does_not_refresh_position() {
        let roster = Roster::with_capacity(Arc::new(MemoryStore::new()), 3);
        roster.register(&peer(1)).unwrap();
        roster.register(&peer(2)).unwrap();
        roster.register(&peer(3)).unwrap();
        roster.register(&peer(1)).unwrap();

        let snapshot = roster.register(&peer(4)).unwrap();
        assert_eq!(snapshot, vec![peer(2), peer(3), peer(4)]);
    }

    #[test]
    fn test_shared_between_handles() {
        let store = Arc::new(MemoryStore::new());
        let a = Roster::new(store.clone());
        let b = Roster::new(store);

        a.register(&peer(1)).unwrap();
        let snapshot = b.register(&peer(2)).unwrap();
        assert_eq!(snapshot, vec![peer(1), peer(2)]);
    }

    #[test]
    fn test_garbage_is_treated_as_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(ROSTER_KEY, "{not an array").unwrap();

        let roster = Roster::new(store.clone());
        assert!(roster.list().unwrap().is_empty());
        assert_eq!(roster.register(&peer(7)).unwrap(), vec![peer(7)]);
        assert_eq!(store.get(ROSTER_KEY).unwrap().as_deref(), Some("[\"peer7\"]"));
    }
}
