//! # meshchat-sim
//!
//! Runs a whole chat mesh inside one process.
//!
//! Nodes join one after another over the in-memory transport, bootstrap
//! from a shared roster, each send a few chat lines and finally compare
//! their history buffers. A converged mesh ends with identical histories
//! everywhere.

mod config;

use std::sync::Arc;

use futures::future::join_all;
use meshchat_net::{
    query_history, query_peers, query_stats, send_chat, spawn_node, MemoryHub, MeshConfig,
    NodeCommand, NodeEvent, SendError,
};
use meshchat_shared::{HistoryEntry, PeerId, PeerIdentity};
use meshchat_store::{JsonFileStore, KeyValueStore, MemoryStore, Roster, SavedAccount};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{SimConfig, StoreLocation};

struct SimNode {
    id: PeerId,
    username: String,
    commands: mpsc::Sender<NodeCommand>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meshchat_net=debug")),
        )
        .init();

    info!("Starting meshchat simulator v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let sim = SimConfig::from_env();
    let mesh = MeshConfig::from_env();
    info!(?sim, "Loaded simulator configuration");
    debug!(?mesh, "Loaded mesh configuration");

    // -----------------------------------------------------------------------
    // 3. Shared store and signaling hub
    // -----------------------------------------------------------------------
    let store: Arc<dyn KeyValueStore> = match &sim.store {
        StoreLocation::File(path) => {
            info!(path = %path.display(), "Using JSON file store");
            Arc::new(JsonFileStore::open_at(path))
        }
        StoreLocation::DataDir => {
            let store = JsonFileStore::new()?;
            info!(path = %store.path().display(), "Using JSON file store");
            Arc::new(store)
        }
        StoreLocation::Memory => Arc::new(MemoryStore::new()),
    };
    let roster = Roster::with_capacity(store.clone(), mesh.roster_capacity);
    let hub = MemoryHub::new();

    // -----------------------------------------------------------------------
    // 4. Join nodes one after another
    // -----------------------------------------------------------------------
    let mut nodes = Vec::new();
    for n in 0..sim.peers {
        let identity = sim_identity(n)?;
        if SavedAccount::save(store.as_ref(), &identity)? {
            info!(username = %identity.username, "Saved account identity");
        }

        let username = identity.username.clone();
        let (commands, events, id) =
            spawn_node(mesh.clone(), identity, Arc::new(hub.clone()), roster.clone()).await?;
        tokio::spawn(log_events(username.clone(), events));

        nodes.push(SimNode {
            id,
            username,
            commands,
        });
        tokio::time::sleep(sim.settle).await;
    }

    info!(nodes = nodes.len(), roster = ?roster.list()?, "All nodes joined");

    // -----------------------------------------------------------------------
    // 5. Chat
    // -----------------------------------------------------------------------
    for round in 0..sim.messages {
        for node in &nodes {
            let line = format!("message {} from {}", round + 1, node.username);
            match send_chat(&node.commands, line).await {
                Ok(()) => {}
                Err(SendError::RateLimited) => {
                    warn!(node = %node.username, "Rate limited, line dropped");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    tokio::time::sleep(sim.settle).await;

    // -----------------------------------------------------------------------
    // 6. Report
    // -----------------------------------------------------------------------
    let histories: Vec<Vec<HistoryEntry>> =
        join_all(nodes.iter().map(|node| query_history(&node.commands)))
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

    for (node, history) in nodes.iter().zip(&histories) {
        let peers = query_peers(&node.commands).await?;
        let stats = query_stats(&node.commands).await?;
        let chats = history
            .iter()
            .filter(|entry| matches!(entry, HistoryEntry::Chat(_)))
            .count();
        info!(
            node = %node.username,
            id = %node.id,
            peers = peers.len(),
            history = history.len(),
            chats,
            duplicates = stats.duplicates,
            forwarded = stats.forwarded,
            "Node summary"
        );
    }

    let converged = histories.windows(2).all(|pair| pair[0] == pair[1]);
    if converged {
        info!(nodes = nodes.len(), "All histories agree");
    } else {
        warn!(nodes = nodes.len(), "Histories diverged");
    }

    // -----------------------------------------------------------------------
    // 7. Leave
    // -----------------------------------------------------------------------
    for node in &nodes {
        let _ = node.commands.send(NodeCommand::Leave).await;
    }
    tokio::time::sleep(sim.settle).await;

    if let Some(account) = SavedAccount::load(store.as_ref())? {
        debug!(username = %account.username, email = %account.email, "Remembered account");
    }

    Ok(())
}

/// The first node signs in with an account; everyone else is a guest.
fn sim_identity(n: usize) -> anyhow::Result<PeerIdentity> {
    let username = format!("peer-{}", n + 1);
    let identity = if n == 0 {
        PeerIdentity::account(&username, &format!("{username}@meshchat.local"))?
    } else {
        PeerIdentity::guest(&username)?
    };
    Ok(identity)
}

async fn log_events(node: String, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Display(HistoryEntry::Chat(msg)) => {
                info!(node = %node, from = %msg.username, "{}", msg.content);
            }
            NodeEvent::Display(HistoryEntry::System(notice)) => {
                info!(node = %node, "* {}", notice.content);
            }
            NodeEvent::Notice(text) => info!(node = %node, "{text}"),
            NodeEvent::HistoryReplaced(entries) => {
                debug!(node = %node, count = entries.len(), "History replaced");
            }
            NodeEvent::PeerConnected { peer, direction } => {
                debug!(node = %node, peer = %peer, ?direction, "Peer connected");
            }
            NodeEvent::PeerDisconnected { peer } => {
                debug!(node = %node, peer = %peer, "Peer disconnected");
            }
            NodeEvent::StateChanged(state) => {
                debug!(node = %node, ?state, "Session state changed");
            }
            NodeEvent::Error(err) => warn!(node = %node, error = %err, "Signaling error"),
        }
    }
}
