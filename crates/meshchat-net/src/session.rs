//! Signaling attachment lifecycle and the table of peer channels.
//!
//! ```text
//! Idle -> Connecting -> Open -> Disconnected -> Connecting -> Open
//!                                                          \-> Failed
//! ```
//!
//! Losing the signaling attachment never touches open data channels; they
//! live in [`ConnectionTable`] and are only removed by their own close or
//! error events.

use std::sync::Arc;
use std::time::Duration;

use meshchat_shared::protocol::WireMessage;
use meshchat_shared::types::PeerId;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{AttemptFailure, JoinError, SignalingError};
use crate::peers::ConnectionTable;
use crate::transport::{Attachment, SignalingLink, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { attempt: u32 },
    Open,
    Disconnected,
    /// Terminal. Retries are exhausted.
    Failed,
}

pub struct SessionManager {
    self_id: PeerId,
    policy: RetryPolicy,
    state: SessionState,
    link: Option<Arc<dyn SignalingLink>>,
    connections: ConnectionTable,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
}

impl SessionManager {
    pub fn new(self_id: PeerId, policy: RetryPolicy) -> Self {
        Self {
            self_id,
            policy,
            state: SessionState::Idle,
            link: None,
            connections: ConnectionTable::new(),
            reconnect_at: None,
            reconnect_attempts: 0,
        }
    }

    /// Attach to the signaling server, retrying with backoff.
    ///
    /// `on_retry` runs after every failed attempt that will be retried,
    /// with the 1-based attempt number and its cause. On success the
    /// attachment's event queue is returned for the caller to drain.
    pub async fn join(
        &mut self,
        transport: &dyn Transport,
        mut on_retry: impl FnMut(u32, &AttemptFailure),
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, JoinError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.state = SessionState::Connecting { attempt };
            info!(peer = %self.self_id, attempt, max_attempts, "Connecting to signaling server");

            match open_once(transport, &self.self_id, self.policy.attempt_timeout).await {
                Ok(attachment) => {
                    info!(peer = %attachment.id, attempt, "Signaling attachment open");
                    self.self_id = attachment.id;
                    self.link = Some(attachment.link);
                    self.state = SessionState::Open;
                    self.reconnect_attempts = 0;
                    return Ok(attachment.events);
                }
                Err(cause) => {
                    if attempt >= max_attempts {
                        warn!(attempt, error = %cause, "All connection attempts failed");
                        self.state = SessionState::Failed;
                        return Err(JoinError {
                            attempts: attempt,
                            last_cause: cause,
                        });
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(attempt, error = %cause, ?delay, "Connection attempt failed, retrying");
                    on_retry(attempt, &cause);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// The signaling attachment dropped. Schedules a reconnect, or gives up
    /// once the attempt budget is spent.
    pub fn on_signaling_lost(&mut self, now: Instant) -> SessionState {
        if matches!(self.state, SessionState::Idle | SessionState::Failed) {
            return self.state;
        }

        if self.reconnect_attempts >= self.policy.max_attempts {
            warn!(attempts = self.reconnect_attempts, "Signaling reconnect budget exhausted");
            self.state = SessionState::Failed;
            self.reconnect_at = None;
            return self.state;
        }

        let delay = self.policy.reconnect_delay;
        info!(?delay, open_channels = self.connections.peer_count(), "Signaling lost, will reconnect");
        self.state = SessionState::Disconnected;
        self.reconnect_at = Some(now + delay);
        self.state
    }

    /// When the pending reconnect is due, if one is scheduled.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Ask the link to re-attach. The outcome arrives later as
    /// `SignalingOpen` or another `Disconnected`.
    pub fn fire_reconnect(&mut self) -> SessionState {
        self.reconnect_at = None;
        let Some(link) = &self.link else {
            return self.state;
        };

        self.reconnect_attempts += 1;
        self.state = SessionState::Connecting {
            attempt: self.reconnect_attempts,
        };
        debug!(attempt = self.reconnect_attempts, "Reconnecting signaling");
        link.reconnect();
        self.state
    }

    pub fn on_signaling_open(&mut self) -> SessionState {
        if self.state != SessionState::Failed {
            info!(peer = %self.self_id, "Signaling attachment restored");
            self.state = SessionState::Open;
            self.reconnect_attempts = 0;
        }
        self.state
    }

    /// Dial `peer`. The channel waits in the pending set until it opens.
    pub fn connect(&mut self, peer: &PeerId) -> Result<(), SignalingError> {
        let link = self.link.as_ref().ok_or(SignalingError::Socket)?;
        let channel = link.connect(peer)?;
        self.connections.add_pending(channel);
        Ok(())
    }

    pub fn broadcast(&self, message: &WireMessage) -> usize {
        self.connections.broadcast(message)
    }

    pub fn send_to(&self, peer: &PeerId, message: &WireMessage) -> bool {
        self.connections.send_to(peer, message)
    }

    /// Close every channel and detach from signaling for good.
    pub fn leave(&mut self) {
        self.connections.close_all();
        if let Some(link) = self.link.take() {
            link.destroy();
        }
        self.reconnect_at = None;
        self.state = SessionState::Idle;
        info!(peer = %self.self_id, "Left the mesh");
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut self.connections
    }
}

/// One attempt bounded by `timeout`. On timeout the attempt's token is
/// cancelled and its future dropped, so it can never complete later.
async fn open_once(
    transport: &dyn Transport,
    self_id: &PeerId,
    timeout: Duration,
) -> Result<Attachment, AttemptFailure> {
    let cancel = CancellationToken::new();

    tokio::select! {
        result = transport.open(self_id, cancel.clone()) => result.map_err(AttemptFailure::from),
        _ = sleep(timeout) => {
            cancel.cancel();
            Err(AttemptFailure::Timeout(timeout))
        }
    }
}
