//! In-process transport.
//!
//! [`MemoryHub`] plays the signaling server for any number of nodes living
//! in one process. Channels are pairs of queues; frames cross them as JSON
//! text exactly as they would over a real data channel. The hub can also
//! inject the failures a real signaling server produces: refused or
//! hanging opens, dropped signaling links, severed channels.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use meshchat_shared::protocol::WireMessage;
use meshchat_shared::types::{ChannelId, PeerId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ChannelError, SignalingError};
use crate::transport::{Attachment, ChannelEvent, DataChannel, SignalingLink, Transport, TransportEvent};

type EventTx = mpsc::UnboundedSender<TransportEvent>;

struct Endpoint {
    events: EventTx,
    attached: bool,
}

struct ChannelRecord {
    id: ChannelId,
    a: PeerId,
    b: PeerId,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, Endpoint>,
    channels: Vec<ChannelRecord>,
    scripted_failures: VecDeque<SignalingError>,
    open_delay: Option<Duration>,
    hang_opens: bool,
    server_down: bool,
}

/// Shared signaling server for in-process nodes. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next opens fail with these errors, in order.
    pub fn fail_next_opens(&self, errors: impl IntoIterator<Item = SignalingError>) {
        self.state().scripted_failures.extend(errors);
    }

    /// Every open waits this long before completing.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.state().open_delay = delay;
    }

    /// Opens never complete on their own; only cancellation ends them.
    pub fn set_hang_opens(&self, hang: bool) {
        self.state().hang_opens = hang;
    }

    /// Refuse opens and reconnects with `ServerUnavailable`.
    pub fn set_server_down(&self, down: bool) {
        self.state().server_down = down;
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.state().endpoints.contains_key(peer)
    }

    pub fn registered_count(&self) -> usize {
        self.state().endpoints.len()
    }

    /// Channels the hub still tracks as open.
    pub fn channel_count(&self) -> usize {
        let mut state = self.state();
        state.prune_closed();
        state.channels.len()
    }

    /// Drop `peer`'s signaling link. Its data channels stay up.
    pub fn drop_signaling(&self, peer: &PeerId) {
        let mut state = self.state();
        if let Some(endpoint) = state.endpoints.get_mut(peer) {
            endpoint.attached = false;
            let _ = endpoint.events.send(TransportEvent::Disconnected);
            info!(peer = %peer, "Hub dropped signaling link");
        }
    }

    /// Fail every open channel between `a` and `b`, notifying both ends.
    pub fn sever(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.state();
        for record in state.channels.iter().filter(|r| {
            (&r.a == a && &r.b == b) || (&r.a == b && &r.b == a)
        }) {
            if !record.open.swap(false, Ordering::SeqCst) {
                continue;
            }
            for (local, remote) in [(&record.a, &record.b), (&record.b, &record.a)] {
                if let Some(endpoint) = state.endpoints.get(local) {
                    let _ = endpoint.events.send(TransportEvent::Channel {
                        peer: remote.clone(),
                        channel: record.id,
                        event: ChannelEvent::Error("connection severed".to_string()),
                    });
                }
            }
            debug!(channel = %record.id, "Hub severed channel");
        }
        state.prune_closed();
    }
}

impl HubState {
    fn prune_closed(&mut self) {
        self.channels.retain(|record| record.open.load(Ordering::SeqCst));
    }
}

#[async_trait]
impl Transport for MemoryHub {
    async fn open(
        &self,
        self_id: &PeerId,
        cancel: CancellationToken,
    ) -> Result<Attachment, SignalingError> {
        let (delay, hang) = {
            let mut state = self.state();
            if let Some(err) = state.scripted_failures.pop_front() {
                return Err(err);
            }
            if state.server_down {
                return Err(SignalingError::ServerUnavailable);
            }
            (state.open_delay, state.hang_opens)
        };

        if hang {
            cancel.cancelled().await;
            return Err(SignalingError::Unknown("open cancelled".to_string()));
        }

        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SignalingError::Unknown("open cancelled".to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(SignalingError::Unknown("open cancelled".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            if state.endpoints.contains_key(self_id) {
                return Err(SignalingError::IdTaken);
            }
            state.endpoints.insert(
                self_id.clone(),
                Endpoint {
                    events: tx,
                    attached: true,
                },
            );
        }

        debug!(peer = %self_id, "Hub registered peer");

        Ok(Attachment {
            id: self_id.clone(),
            link: Arc::new(MemoryLink {
                hub: self.clone(),
                id: self_id.clone(),
            }),
            events: rx,
        })
    }
}

struct MemoryLink {
    hub: MemoryHub,
    id: PeerId,
}

impl SignalingLink for MemoryLink {
    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn DataChannel>, SignalingError> {
        let mut state = self.hub.state();

        let own_events = match state.endpoints.get(&self.id) {
            Some(endpoint) if endpoint.attached => endpoint.events.clone(),
            _ => return Err(SignalingError::Socket),
        };

        let id = ChannelId::new();
        let open = Arc::new(AtomicBool::new(false));

        let remote_events = match state.endpoints.get(peer) {
            Some(endpoint) if endpoint.attached => endpoint.events.clone(),
            _ => {
                // Report asynchronously like a real server would.
                let _ = own_events.send(TransportEvent::SignalingError(
                    SignalingError::PeerUnavailable(peer.clone()),
                ));
                let _ = own_events.send(TransportEvent::Channel {
                    peer: peer.clone(),
                    channel: id,
                    event: ChannelEvent::Error("peer unavailable".to_string()),
                });
                let (dead_tx, _) = mpsc::unbounded_channel();
                return Ok(Arc::new(MemoryChannel {
                    id,
                    local: self.id.clone(),
                    remote: peer.clone(),
                    open,
                    remote_events: dead_tx,
                }));
            }
        };

        open.store(true, Ordering::SeqCst);

        let remote_end = Arc::new(MemoryChannel {
            id,
            local: peer.clone(),
            remote: self.id.clone(),
            open: open.clone(),
            remote_events: own_events.clone(),
        });
        let _ = remote_events.send(TransportEvent::IncomingChannel(remote_end));
        let _ = remote_events.send(TransportEvent::Channel {
            peer: self.id.clone(),
            channel: id,
            event: ChannelEvent::Open,
        });
        let _ = own_events.send(TransportEvent::Channel {
            peer: peer.clone(),
            channel: id,
            event: ChannelEvent::Open,
        });

        state.prune_closed();
        state.channels.push(ChannelRecord {
            id,
            a: self.id.clone(),
            b: peer.clone(),
            open: open.clone(),
        });

        Ok(Arc::new(MemoryChannel {
            id,
            local: self.id.clone(),
            remote: peer.clone(),
            open,
            remote_events,
        }))
    }

    fn reconnect(&self) {
        let mut state = self.hub.state();
        let server_down = state.server_down;
        let Some(endpoint) = state.endpoints.get_mut(&self.id) else {
            return;
        };
        if server_down {
            let _ = endpoint
                .events
                .send(TransportEvent::SignalingError(SignalingError::ServerUnavailable));
            let _ = endpoint.events.send(TransportEvent::Disconnected);
            return;
        }
        endpoint.attached = true;
        let _ = endpoint.events.send(TransportEvent::SignalingOpen);
        debug!(peer = %self.id, "Hub re-attached peer");
    }

    fn destroy(&self) {
        let mut state = self.hub.state();
        state.endpoints.remove(&self.id);
        state.prune_closed();
        debug!(peer = %self.id, "Hub removed peer");
    }
}

/// One end of an in-memory channel.
struct MemoryChannel {
    id: ChannelId,
    local: PeerId,
    remote: PeerId,
    open: Arc<AtomicBool>,
    remote_events: EventTx,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DataChannel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn peer(&self) -> &PeerId {
        &self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: &WireMessage) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = message.to_json()?;
        self.remote_events
            .send(TransportEvent::Channel {
                peer: self.local.clone(),
                channel: self.id,
                event: ChannelEvent::Data(frame),
            })
            .map_err(|_| {
                self.open.store(false, Ordering::SeqCst);
                ChannelError::Closed
            })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.remote_events.send(TransportEvent::Channel {
                peer: self.local.clone(),
                channel: self.id,
                event: ChannelEvent::Close,
            });
        }
    }
}
