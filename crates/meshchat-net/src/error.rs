use std::time::Duration;

use meshchat_shared::error::ProtocolError;
use meshchat_shared::types::PeerId;
use thiserror::Error;

/// Failures reported by the signaling attachment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Network error. Please check your internet connection.")]
    Network,

    #[error("Unable to connect to the signaling server. The server may be down.")]
    ServerUnavailable,

    #[error("Signaling socket failed or closed unexpectedly.")]
    Socket,

    #[error("This ID is already in use. Please try again.")]
    IdTaken,

    #[error("Secure connection unavailable.")]
    TlsUnavailable,

    #[error("Peer-to-peer channels are not supported here.")]
    Unsupported,

    #[error("Peer {0} is not available")]
    PeerUnavailable(PeerId),

    #[error("Unknown signaling error: {0}")]
    Unknown(String),
}

impl SignalingError {
    /// An offline roster peer is routine and never shown to the user.
    pub fn is_benign(&self) -> bool {
        matches!(self, SignalingError::PeerUnavailable(_))
    }
}

/// Why one attempt to attach to the signaling server failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("Connection timeout after {0:?}: unable to reach the signaling server")]
    Timeout(Duration),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Every join attempt failed. Terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to join the mesh after {attempts} attempt(s): {last_cause}")]
pub struct JoinError {
    pub attempts: u32,
    pub last_cause: AttemptFailure,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
}

/// Rejections of a locally originated chat message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Message is empty")]
    Empty,

    #[error("Not connected to the mesh")]
    NotConnected,

    #[error("Please slow down. You are sending messages too quickly.")]
    RateLimited,

    #[error("Node has stopped")]
    NodeStopped,
}
