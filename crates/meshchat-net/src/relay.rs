//! Flood-fill relay with duplicate suppression.
//!
//! [`RelayEngine`] owns the seen-id set, the history buffer and the local
//! rate limiter. It never touches a channel itself: every decision comes
//! back as a list of [`RelayAction`]s for the node loop to carry out, which
//! keeps dedup-then-forward a single uninterrupted step.

use chrono::Utc;
use meshchat_shared::identity::PeerIdentity;
use meshchat_shared::protocol::{ChatMessage, HistoryEntry, SystemNotice, WireMessage};
use meshchat_shared::types::{MessageId, PeerId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HistoryPolicy, MeshConfig};
use crate::error::SendError;
use crate::history::{HistoryBuffer, SeenSet};
use crate::rate_limit::SlidingWindowLimiter;

/// What the node must do in response to a relay decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Show a line and keep it in history.
    Display(HistoryEntry),
    /// Throw away the current view and show these lines instead.
    ReplaceDisplay(Vec<HistoryEntry>),
    /// Send to every open channel.
    Broadcast(WireMessage),
    /// Send to every open channel but the one to `except`.
    Forward { except: PeerId, message: WireMessage },
    /// Send on the channel to `to` only.
    Reply { to: PeerId, message: WireMessage },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Chat messages received from peers, duplicates included.
    pub received: u64,
    pub duplicates: u64,
    /// Novel chat messages passed on to neighbours.
    pub forwarded: u64,
    pub originated: u64,
    pub rate_limited: u64,
    pub history_served: u64,
    pub history_applied: u64,
}

pub struct RelayEngine {
    identity: PeerIdentity,
    seen: SeenSet,
    history: HistoryBuffer,
    limiter: SlidingWindowLimiter,
    history_policy: HistoryPolicy,
    stats: RelayStats,
}

impl RelayEngine {
    pub fn new(identity: PeerIdentity, config: &MeshConfig) -> Self {
        Self {
            identity,
            seen: SeenSet::new(config.seen_capacity),
            history: HistoryBuffer::new(config.history_capacity),
            limiter: SlidingWindowLimiter::new(config.rate_limit_max, config.rate_limit_window),
            history_policy: config.history_policy,
            stats: RelayStats::default(),
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Create a chat message from local input.
    ///
    /// The id is marked seen before anything is sent so the message is
    /// suppressed if a relay cycle brings it back.
    pub fn originate(&mut self, content: &str, now: Instant) -> Result<Vec<RelayAction>, SendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::Empty);
        }

        if !self.limiter.try_acquire(now) {
            self.stats.rate_limited += 1;
            warn!(user = %self.identity.username, "Local rate limit hit");
            return Err(SendError::RateLimited);
        }

        let message = ChatMessage::new(&self.identity, content, Utc::now());
        self.seen.insert(message.id.clone());

        let entry = HistoryEntry::Chat(message.clone());
        self.history.push(entry.clone());
        self.stats.originated += 1;

        debug!(id = %message.id, "Originated chat message");

        Ok(vec![
            RelayAction::Display(entry),
            RelayAction::Broadcast(WireMessage::Chat(message)),
        ])
    }

    /// Decide what to do with a frame that arrived on the channel to `from`.
    pub fn handle_inbound(&mut self, from: &PeerId, message: WireMessage) -> Vec<RelayAction> {
        match message {
            WireMessage::Chat(chat) => self.on_chat(from, chat),
            WireMessage::System(notice) => vec![self.record(HistoryEntry::System(notice))],
            WireMessage::UserJoined(presence) => {
                info!(peer = %from, username = %presence.username, "Peer announced itself");
                vec![self.record(HistoryEntry::System(SystemNotice::joined(
                    &presence.username,
                )))]
            }
            WireMessage::RequestHistory => self.on_history_request(from),
            WireMessage::History { messages } => self.on_history_response(from, messages),
        }
    }

    fn on_chat(&mut self, from: &PeerId, chat: ChatMessage) -> Vec<RelayAction> {
        self.stats.received += 1;

        if !self.seen.insert(chat.id.clone()) {
            self.stats.duplicates += 1;
            debug!(id = %chat.id, from = %from, "Suppressed duplicate message");
            return Vec::new();
        }

        let entry = HistoryEntry::Chat(chat.clone());
        self.history.push(entry.clone());
        self.stats.forwarded += 1;

        debug!(id = %chat.id, from = %from, "Relaying novel message");

        vec![
            RelayAction::Display(entry),
            RelayAction::Forward {
                except: from.clone(),
                message: WireMessage::Chat(chat),
            },
        ]
    }

    fn on_history_request(&mut self, from: &PeerId) -> Vec<RelayAction> {
        if self.history.is_empty() {
            debug!(peer = %from, "History requested but buffer is empty");
            return Vec::new();
        }

        let messages = self.history.snapshot();
        self.stats.history_served += 1;
        debug!(peer = %from, count = messages.len(), "Sending message history to peer");

        vec![RelayAction::Reply {
            to: from.clone(),
            message: WireMessage::History { messages },
        }]
    }

    fn on_history_response(&mut self, from: &PeerId, messages: Vec<HistoryEntry>) -> Vec<RelayAction> {
        if messages.is_empty() {
            return Vec::new();
        }

        if self.history_policy == HistoryPolicy::FirstOnly && self.stats.history_applied > 0 {
            debug!(peer = %from, "Ignoring history response, one was already applied");
            return Vec::new();
        }

        for id in messages.iter().filter_map(HistoryEntry::chat_id) {
            self.seen.insert(id.clone());
        }
        self.history.replace(messages);
        self.stats.history_applied += 1;

        info!(peer = %from, count = self.history.len(), "Replaced view with received history");

        vec![RelayAction::ReplaceDisplay(self.history.snapshot())]
    }

    fn record(&mut self, entry: HistoryEntry) -> RelayAction {
        self.history.push(entry.clone());
        RelayAction::Display(entry)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.snapshot()
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}
