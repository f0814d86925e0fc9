//! Contract with the signaling/transport collaborator.
//!
//! The mesh never negotiates connections itself. A [`Transport`] attaches
//! the node to a signaling server and hands back an [`Attachment`]: a link
//! for dialing peers plus one queue carrying every event for this node.
//! All channel and signaling events flow through that single queue and
//! are handled to completion one at a time, so the relay logic never
//! needs a lock.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use meshchat_shared::protocol::WireMessage;
use meshchat_shared::types::{ChannelId, PeerId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ChannelError, SignalingError};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach to the signaling server as `self_id`.
    ///
    /// Once `cancel` fires the implementation must give up and must not
    /// keep `self_id` registered; the caller has already stopped waiting.
    async fn open(
        &self,
        self_id: &PeerId,
        cancel: CancellationToken,
    ) -> Result<Attachment, SignalingError>;
}

/// Handle on a live signaling attachment.
pub trait SignalingLink: Send + Sync {
    /// Start dialing `peer`. Returns immediately; the channel reports
    /// `Open`, `Close` or `Error` later on the event queue.
    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn DataChannel>, SignalingError>;

    /// Re-attach after a `Disconnected` event. Reports `SignalingOpen` on
    /// success and `Disconnected` again on failure.
    fn reconnect(&self);

    /// Leave the signaling server for good.
    fn destroy(&self);
}

/// One reliable, ordered duplex channel to a single peer.
pub trait DataChannel: Send + Sync + Debug {
    fn id(&self) -> ChannelId;
    fn peer(&self) -> &PeerId;
    fn is_open(&self) -> bool;
    fn send(&self, message: &WireMessage) -> Result<(), ChannelError>;
    fn close(&self);
}

/// Result of a successful [`Transport::open`].
pub struct Attachment {
    /// Identity confirmed by the signaling server.
    pub id: PeerId,
    pub link: Arc<dyn SignalingLink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
pub enum TransportEvent {
    /// The signaling attachment came back after a reconnect.
    SignalingOpen,
    /// The signaling attachment dropped. Open data channels are unaffected.
    Disconnected,
    /// Error raised on the attachment rather than on a channel.
    SignalingError(SignalingError),
    /// A remote peer dialed us.
    IncomingChannel(Arc<dyn DataChannel>),
    /// Something happened on one channel.
    Channel {
        peer: PeerId,
        channel: ChannelId,
        event: ChannelEvent,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    /// Raw frame as received; decoded with [`decode_frame`].
    Data(String),
    Close,
    Error(String),
}

/// Decode a raw frame, logging and dropping anything malformed.
pub fn decode_frame(peer: &PeerId, data: &str) -> Option<WireMessage> {
    match WireMessage::from_json(data) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(peer = %peer, error = %e, len = data.len(), "Discarding malformed frame");
            None
        }
    }
}
