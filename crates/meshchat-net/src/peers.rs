//! Peer connection tracking.
//!
//! Maintains the table of open channels keyed by peer id, plus outbound
//! dials still waiting for their `open` event. Every entry remembers which
//! physical channel it holds, so a late close from a replaced channel
//! never evicts the channel that superseded it.

use std::collections::HashMap;
use std::sync::Arc;

use meshchat_shared::protocol::WireMessage;
use meshchat_shared::types::{ChannelDirection, ChannelId, PeerId};
use tracing::debug;

use crate::transport::DataChannel;

/// Information about an open channel.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub channel: Arc<dyn DataChannel>,
    /// Who dialed whom.
    pub direction: ChannelDirection,
    /// Timestamp of when the channel was registered (Unix epoch millis).
    pub connected_at: u64,
}

/// Tracks all channels owned by this node.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    open: HashMap<PeerId, ConnectionInfo>,
    pending: HashMap<PeerId, Arc<dyn DataChannel>>,
}

impl ConnectionTable {
    /// Create a new, empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an outbound dial until it opens.
    pub fn add_pending(&mut self, channel: Arc<dyn DataChannel>) {
        debug!(peer = %channel.peer(), channel = %channel.id(), "Tracking outbound dial");
        self.pending.insert(channel.peer().clone(), channel);
    }

    /// Move a pending dial into the open table once its `open` event fires.
    /// Returns the channel if `channel_id` matched the pending dial.
    pub fn promote(&mut self, peer: &PeerId, channel_id: ChannelId) -> Option<Arc<dyn DataChannel>> {
        if self.pending.get(peer).map(|ch| ch.id()) != Some(channel_id) {
            return None;
        }
        let channel = self.pending.remove(peer)?;
        self.insert(channel.clone(), ChannelDirection::Outbound);
        Some(channel)
    }

    /// Accept a channel a remote peer opened to us.
    pub fn accept_inbound(&mut self, channel: Arc<dyn DataChannel>) {
        self.insert(channel, ChannelDirection::Inbound);
    }

    fn insert(&mut self, channel: Arc<dyn DataChannel>, direction: ChannelDirection) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let peer = channel.peer().clone();
        debug!(
            peer = %peer,
            channel = %channel.id(),
            direction = ?direction,
            "Tracking new peer channel"
        );

        let id = channel.id();
        let replaced = self.open.insert(
            peer.clone(),
            ConnectionInfo {
                channel,
                direction,
                connected_at: now,
            },
        );

        // both sides dialed at once; the later channel wins
        if let Some(old) = replaced.filter(|old| old.channel.id() != id) {
            debug!(peer = %peer, channel = %old.channel.id(), "Closing superseded channel");
            old.channel.close();
        }
    }

    /// Drop the entry for `peer` if it still holds `channel_id`.
    /// Returns true when an open channel was removed.
    pub fn remove(&mut self, peer: &PeerId, channel_id: ChannelId) -> bool {
        if self.pending.get(peer).map(|ch| ch.id()) == Some(channel_id) {
            self.pending.remove(peer);
            debug!(peer = %peer, "Dropped pending dial");
        }

        if self.open.get(peer).map(|info| info.channel.id()) == Some(channel_id) {
            self.open.remove(peer);
            debug!(peer = %peer, "Removed peer from table");
            return true;
        }
        false
    }

    /// Whether `peer` is open or being dialed.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.open.contains_key(peer) || self.pending.contains_key(peer)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.open.contains_key(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&ConnectionInfo> {
        self.open.get(peer)
    }

    /// Sorted ids of peers with an open entry.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.open.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn peer_count(&self) -> usize {
        self.open.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send to every open channel. Returns how many accepted the frame.
    pub fn broadcast(&self, message: &WireMessage) -> usize {
        self.fan_out(message, None)
    }

    /// Send to every open channel except the one to `except`.
    pub fn broadcast_except(&self, except: &PeerId, message: &WireMessage) -> usize {
        self.fan_out(message, Some(except))
    }

    fn fan_out(&self, message: &WireMessage, except: Option<&PeerId>) -> usize {
        let mut delivered = 0;
        for (peer, info) in &self.open {
            if Some(peer) == except || !info.channel.is_open() {
                continue;
            }
            match info.channel.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(peer = %peer, error = %e, kind = message.kind(), "Send failed");
                }
            }
        }
        delivered
    }

    /// Send to one peer. No-op (false) if absent or closed.
    pub fn send_to(&self, peer: &PeerId, message: &WireMessage) -> bool {
        let Some(info) = self.open.get(peer) else {
            return false;
        };
        if !info.channel.is_open() {
            return false;
        }
        match info.channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer, error = %e, kind = message.kind(), "Send failed");
                false
            }
        }
    }

    /// Close and forget every channel, pending ones included.
    pub fn close_all(&mut self) {
        for (_, info) in self.open.drain() {
            info.channel.close();
        }
        for (_, channel) in self.pending.drain() {
            channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::error::ChannelError;

    #[derive(Debug)]
    struct FakeChannel {
        id: ChannelId,
        peer: PeerId,
        open: AtomicBool,
        sent: Mutex<Vec<WireMessage>>,
    }

    impl FakeChannel {
        fn new(peer: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ChannelId::new(),
                peer: PeerId::from(peer),
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl DataChannel for FakeChannel {
        fn id(&self) -> ChannelId {
            self.id
        }
        fn peer(&self) -> &PeerId {
            &self.peer
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn send(&self, message: &WireMessage) -> Result<(), ChannelError> {
            if !self.is_open() {
                return Err(ChannelError::Closed);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_pending_then_promote() {
        let mut table = ConnectionTable::new();
        let ch = FakeChannel::new("b");

        table.add_pending(ch.clone());
        assert!(table.contains(&ch.peer));
        assert!(!table.is_connected(&ch.peer));

        assert!(table.promote(&ch.peer, ChannelId::new()).is_none());
        assert!(table.promote(&ch.peer, ch.id).is_some());
        assert!(table.is_connected(&ch.peer));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(
            table.get(&ch.peer).map(|info| info.direction),
            Some(ChannelDirection::Outbound)
        );
    }

    #[test]
    fn test_stale_close_keeps_newer_channel() {
        let mut table = ConnectionTable::new();
        let old = FakeChannel::new("b");
        let new = FakeChannel::new("b");

        table.accept_inbound(old.clone());
        table.accept_inbound(new.clone());

        assert!(!old.is_open());
        assert!(new.is_open());

        assert!(!table.remove(&old.peer, old.id));
        assert!(table.is_connected(&new.peer));

        assert!(table.remove(&new.peer, new.id));
        assert_eq!(table.peer_count(), 0);
    }

    #[test]
    fn test_crossed_dials_keep_one_channel() {
        let mut table = ConnectionTable::new();
        let ours = FakeChannel::new("b");
        let theirs = FakeChannel::new("b");

        table.add_pending(ours.clone());
        table.accept_inbound(theirs.clone());
        assert!(table.promote(&ours.peer, ours.id).is_some());

        assert_eq!(table.peer_count(), 1);
        assert!(!theirs.is_open());
        assert!(ours.is_open());

        // re-registering the same channel never closes it
        table.accept_inbound(ours.clone());
        assert!(ours.is_open());

        table.close_all();
        assert!(!ours.is_open());
    }

    #[test]
    fn test_broadcast_skips_sender_and_closed() {
        let mut table = ConnectionTable::new();
        let b = FakeChannel::new("b");
        let c = FakeChannel::new("c");
        let d = FakeChannel::new("d");
        table.accept_inbound(b.clone());
        table.accept_inbound(c.clone());
        table.accept_inbound(d.clone());
        d.close();

        let delivered = table.broadcast_except(&b.peer, &WireMessage::RequestHistory);
        assert_eq!(delivered, 1);
        assert_eq!(b.sent(), 0);
        assert_eq!(c.sent(), 1);
        assert_eq!(d.sent(), 0);

        assert_eq!(table.broadcast(&WireMessage::RequestHistory), 2);
    }

    #[test]
    fn test_send_to_absent_peer_is_noop() {
        let table = ConnectionTable::new();
        assert!(!table.send_to(&PeerId::from("nobody"), &WireMessage::RequestHistory));
    }

    #[test]
    fn test_close_all() {
        let mut table = ConnectionTable::new();
        let b = FakeChannel::new("b");
        let c = FakeChannel::new("c");
        table.accept_inbound(b.clone());
        table.add_pending(c.clone());

        table.close_all();
        assert!(!b.is_open());
        assert!(!c.is_open());
        assert_eq!(table.peer_count(), 0);
        assert!(!table.contains(&c.peer));
    }
}
