//! Node orchestration with tokio mpsc command/event channels.
//!
//! A node joins the mesh, dials the roster and then runs one event loop
//! task. Commands from the application, transport events and the signaling
//! reconnect timer are all handled inside that task one at a time, so the
//! session and relay state need no locking.

use std::sync::Arc;

use meshchat_shared::identity::PeerIdentity;
use meshchat_shared::protocol::{HistoryEntry, SystemNotice, WireMessage};
use meshchat_shared::types::{ChannelDirection, ChannelId, PeerId};
use meshchat_store::Roster;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::bootstrap::{dial_roster, join_frames};
use crate::config::MeshConfig;
use crate::error::{JoinError, SendError, SignalingError};
use crate::relay::{RelayAction, RelayEngine, RelayStats};
use crate::session::{SessionManager, SessionState};
use crate::transport::{decode_frame, ChannelEvent, Transport, TransportEvent};

const COMMAND_BUFFER: usize = 256;

/// Commands sent *into* the node task.
#[derive(Debug)]
pub enum NodeCommand {
    /// Originate a chat message.
    SendChat {
        content: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    /// Snapshot of peers with an open channel.
    GetPeers(oneshot::Sender<Vec<PeerId>>),
    /// Snapshot of the history buffer, oldest first.
    GetHistory(oneshot::Sender<Vec<HistoryEntry>>),
    GetState(oneshot::Sender<SessionState>),
    GetStats(oneshot::Sender<RelayStats>),
    /// Say goodbye, close every channel and stop.
    Leave,
}

/// Notifications sent *from* the node task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A line to append to the chat view.
    Display(HistoryEntry),
    /// Local-only notice (welcome, retry progress, rate limit).
    Notice(String),
    /// Replace the whole chat view with these lines.
    HistoryReplaced(Vec<HistoryEntry>),
    PeerConnected {
        peer: PeerId,
        direction: ChannelDirection,
    },
    PeerDisconnected {
        peer: PeerId,
    },
    StateChanged(SessionState),
    /// A signaling error worth showing to the user.
    Error(SignalingError),
}

/// Join the mesh and spawn the node's event loop.
///
/// Retry notices and the welcome notice are already queued on the returned
/// event receiver. If every join attempt fails, nothing is spawned and no
/// channel is attempted.
///
/// # Returns
///
/// `(command_tx, event_rx, local_peer_id)`
pub async fn spawn_node(
    config: MeshConfig,
    mut identity: PeerIdentity,
    transport: Arc<dyn Transport>,
    roster: Roster,
) -> Result<
    (
        mpsc::Sender<NodeCommand>,
        mpsc::UnboundedReceiver<NodeEvent>,
        PeerId,
    ),
    JoinError,
> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<NodeEvent>();
    let mut session = SessionManager::new(identity.id.clone(), config.retry.clone());

    let max_attempts = config.retry.max_attempts;
    let retry_tx = event_tx.clone();
    let transport_events = session
        .join(transport.as_ref(), move |attempt, _| {
            let _ = retry_tx.send(NodeEvent::Notice(format!(
                "Connection attempt {attempt} failed. Retrying... ({attempt}/{max_attempts})"
            )));
        })
        .await?;

    // the signaling server may confirm a different id
    identity.id = session.self_id().clone();
    let local_id = identity.id.clone();

    let report = dial_roster(&mut session, &roster);
    info!(
        peer = %local_id,
        roster = report.roster.len(),
        dialed = report.dialed.len(),
        "Joined mesh"
    );

    let _ = event_tx.send(NodeEvent::StateChanged(session.state()));
    let _ = event_tx.send(NodeEvent::Notice(format!(
        "Welcome, {}! You are now connected to the chat room.",
        identity.username
    )));

    let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCommand>(COMMAND_BUFFER);

    let node = NodeLoop {
        relay: RelayEngine::new(identity, &config),
        session,
        commands: cmd_rx,
        transport_events,
        transport_closed: false,
        events: event_tx,
    };
    tokio::spawn(node.run());

    Ok((cmd_tx, event_rx, local_id))
}

struct NodeLoop {
    session: SessionManager,
    relay: RelayEngine,
    commands: mpsc::Receiver<NodeCommand>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    transport_closed: bool,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeLoop {
    async fn run(mut self) {
        loop {
            let reconnect_at = self.session.reconnect_at();

            tokio::select! {
                // --- Application commands ---
                cmd = self.commands.recv() => match cmd {
                    Some(NodeCommand::Leave) => {
                        self.leave();
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("Command channel closed, leaving mesh");
                        self.leave();
                        break;
                    }
                },

                // --- Transport events ---
                event = self.transport_events.recv(), if !self.transport_closed => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        warn!("Transport event queue closed");
                        self.transport_closed = true;
                    }
                },

                // --- Signaling reconnect timer ---
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    let state = self.session.fire_reconnect();
                    self.emit(NodeEvent::StateChanged(state));
                }
            }
        }

        info!(peer = %self.session.self_id(), "Node event loop terminated");
    }

    fn handle_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::SendChat { content, reply } => {
                let result = self.send_chat(&content);
                let _ = reply.send(result);
            }
            NodeCommand::GetPeers(reply) => {
                let _ = reply.send(self.session.connections().connected_peers());
            }
            NodeCommand::GetHistory(reply) => {
                let _ = reply.send(self.relay.history());
            }
            NodeCommand::GetState(reply) => {
                let _ = reply.send(self.session.state());
            }
            NodeCommand::GetStats(reply) => {
                let _ = reply.send(self.relay.stats());
            }
            NodeCommand::Leave => self.leave(),
        }
    }

    fn send_chat(&mut self, content: &str) -> Result<(), SendError> {
        if !self.session.is_open() {
            return Err(SendError::NotConnected);
        }

        match self.relay.originate(content, Instant::now()) {
            Ok(actions) => {
                self.apply(actions);
                Ok(())
            }
            Err(SendError::RateLimited) => {
                self.emit(NodeEvent::Notice(SendError::RateLimited.to_string()));
                Err(SendError::RateLimited)
            }
            Err(e) => Err(e),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SignalingOpen => {
                let state = self.session.on_signaling_open();
                self.emit(NodeEvent::StateChanged(state));
            }

            TransportEvent::Disconnected => {
                let state = self.session.on_signaling_lost(Instant::now());
                self.emit(NodeEvent::StateChanged(state));
            }

            TransportEvent::SignalingError(err) => {
                if err.is_benign() {
                    debug!(error = %err, "Ignoring benign signaling error");
                } else {
                    warn!(error = %err, "Signaling error");
                    self.emit(NodeEvent::Error(err));
                }
            }

            TransportEvent::IncomingChannel(channel) => {
                let peer = channel.peer().clone();
                info!(peer = %peer, channel = %channel.id(), "Incoming channel received");
                self.session.connections_mut().accept_inbound(channel);
                self.emit(NodeEvent::PeerConnected {
                    peer,
                    direction: ChannelDirection::Inbound,
                });
            }

            TransportEvent::Channel {
                peer,
                channel,
                event,
            } => self.handle_channel_event(peer, channel, event),
        }
    }

    fn handle_channel_event(&mut self, peer: PeerId, channel: ChannelId, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                let Some(opened) = self.session.connections_mut().promote(&peer, channel) else {
                    debug!(peer = %peer, channel = %channel, "Channel open (not a pending dial)");
                    return;
                };

                info!(peer = %peer, "Successfully connected to peer");
                for frame in join_frames(self.relay.identity()) {
                    if let Err(e) = opened.send(&frame) {
                        warn!(peer = %peer, error = %e, kind = frame.kind(), "Failed to greet peer");
                    }
                }
                self.emit(NodeEvent::PeerConnected {
                    peer,
                    direction: ChannelDirection::Outbound,
                });
            }

            ChannelEvent::Data(frame) => {
                let Some(message) = decode_frame(&peer, &frame) else {
                    return;
                };
                debug!(peer = %peer, kind = message.kind(), "Received frame");
                let actions = self.relay.handle_inbound(&peer, message);
                self.apply(actions);
            }

            ChannelEvent::Close => self.drop_channel(peer, channel, None),
            ChannelEvent::Error(reason) => self.drop_channel(peer, channel, Some(reason)),
        }
    }

    fn drop_channel(&mut self, peer: PeerId, channel: ChannelId, reason: Option<String>) {
        if self.session.connections_mut().remove(&peer, channel) {
            info!(peer = %peer, reason = ?reason, "Peer connection closed");
            self.emit(NodeEvent::PeerDisconnected { peer });
        } else {
            debug!(peer = %peer, channel = %channel, reason = ?reason, "Ignoring close of untracked channel");
        }
    }

    fn apply(&mut self, actions: Vec<RelayAction>) {
        for action in actions {
            match action {
                RelayAction::Display(entry) => self.emit(NodeEvent::Display(entry)),
                RelayAction::ReplaceDisplay(entries) => {
                    self.emit(NodeEvent::HistoryReplaced(entries))
                }
                RelayAction::Broadcast(message) => {
                    let sent = self.session.broadcast(&message);
                    debug!(kind = message.kind(), sent, "Broadcast");
                }
                RelayAction::Forward { except, message } => {
                    let sent = self.session.connections().broadcast_except(&except, &message);
                    debug!(kind = message.kind(), from = %except, sent, "Forwarded");
                }
                RelayAction::Reply { to, message } => {
                    if !self.session.send_to(&to, &message) {
                        debug!(peer = %to, kind = message.kind(), "Reply dropped, channel gone");
                    }
                }
            }
        }
    }

    fn leave(&mut self) {
        if self.session.state() == SessionState::Idle {
            return;
        }

        let goodbye = WireMessage::System(SystemNotice::left(&self.relay.identity().username));
        let sent = self.session.broadcast(&goodbye);
        debug!(sent, "Sent leave notice");

        self.session.leave();
        self.emit(NodeEvent::StateChanged(SessionState::Idle));
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }
}

/// Send a command carrying a reply channel and wait for the answer.
pub async fn request<T>(
    commands: &mpsc::Sender<NodeCommand>,
    make: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
) -> Result<T, SendError> {
    let (reply, rx) = oneshot::channel();
    commands
        .send(make(reply))
        .await
        .map_err(|_| SendError::NodeStopped)?;
    rx.await.map_err(|_| SendError::NodeStopped)
}

pub async fn send_chat(
    commands: &mpsc::Sender<NodeCommand>,
    content: impl Into<String>,
) -> Result<(), SendError> {
    let content = content.into();
    request(commands, |reply| NodeCommand::SendChat { content, reply }).await?
}

pub async fn query_peers(commands: &mpsc::Sender<NodeCommand>) -> Result<Vec<PeerId>, SendError> {
    request(commands, NodeCommand::GetPeers).await
}

pub async fn query_history(
    commands: &mpsc::Sender<NodeCommand>,
) -> Result<Vec<HistoryEntry>, SendError> {
    request(commands, NodeCommand::GetHistory).await
}

pub async fn query_state(
    commands: &mpsc::Sender<NodeCommand>,
) -> Result<SessionState, SendError> {
    request(commands, NodeCommand::GetState).await
}

pub async fn query_stats(commands: &mpsc::Sender<NodeCommand>) -> Result<RelayStats, SendError> {
    request(commands, NodeCommand::GetStats).await
}
