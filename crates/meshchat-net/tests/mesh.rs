//! Multi-node scenarios over the in-memory transport.
//!
//! Every test runs on a paused clock: sleeping lets the runtime drain all
//! node queues before time moves, so `settle()` returns once the mesh is
//! quiet.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use meshchat_net::{
    query_history, query_peers, query_state, query_stats, send_chat, spawn_node, MeshConfig,
    MemoryHub, NodeCommand, NodeEvent, SendError, SessionState, SignalingError,
};
use meshchat_shared::{ChannelDirection, HistoryEntry, PeerId, PeerIdentity, SystemNotice};
use meshchat_store::{MemoryStore, Roster};
use tokio::sync::mpsc;

struct TestNode {
    id: PeerId,
    commands: mpsc::Sender<NodeCommand>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl TestNode {
    fn drain(&mut self) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn chat_lines(&self) -> Vec<String> {
        query_history(&self.commands)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Chat(msg) => Some(msg.content),
                HistoryEntry::System(_) => None,
            })
            .collect()
    }
}

fn shared_roster() -> Roster {
    Roster::new(Arc::new(MemoryStore::new()))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn join(hub: &MemoryHub, roster: &Roster, name: &str) -> TestNode {
    let identity = PeerIdentity::guest(name).unwrap();
    let (commands, events, id) = spawn_node(
        MeshConfig::default(),
        identity,
        Arc::new(hub.clone()),
        roster.clone(),
    )
    .await
    .unwrap();
    settle().await;
    TestNode {
        id,
        commands,
        events,
    }
}

async fn triangle(hub: &MemoryHub) -> (TestNode, TestNode, TestNode) {
    let roster = shared_roster();
    let a = join(hub, &roster, "alice").await;
    let b = join(hub, &roster, "bob").await;
    let c = join(hub, &roster, "carol").await;
    (a, b, c)
}

#[tokio::test(start_paused = true)]
async fn test_roster_bootstrap_builds_full_mesh() {
    let hub = MemoryHub::new();
    let (a, b, c) = triangle(&hub).await;

    for node in [&a, &b, &c] {
        assert_eq!(query_peers(&node.commands).await.unwrap().len(), 2);
        assert_eq!(query_state(&node.commands).await.unwrap(), SessionState::Open);
    }
}

#[tokio::test(start_paused = true)]
async fn test_join_announces_and_greets() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let mut a = join(&hub, &roster, "alice").await;
    let mut b = join(&hub, &roster, "bob").await;

    let a_events = a.drain();
    assert!(a_events.contains(&NodeEvent::Display(HistoryEntry::System(
        SystemNotice::joined("bob")
    ))));
    assert!(a_events.contains(&NodeEvent::PeerConnected {
        peer: b.id.clone(),
        direction: ChannelDirection::Inbound,
    }));

    let b_events = b.drain();
    assert!(b_events.contains(&NodeEvent::Notice(
        "Welcome, bob! You are now connected to the chat room.".to_string()
    )));
    assert!(b_events.contains(&NodeEvent::PeerConnected {
        peer: a.id.clone(),
        direction: ChannelDirection::Outbound,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_message_floods_along_a_line() {
    let hub = MemoryHub::new();

    // a <-> b <-> c, no direct a <-> c channel
    let roster_ab = shared_roster();
    let a = join(&hub, &roster_ab, "alice").await;
    let b = join(&hub, &roster_ab, "bob").await;

    let roster_bc = shared_roster();
    roster_bc.register(&b.id).unwrap();
    let c = join(&hub, &roster_bc, "carol").await;

    assert_eq!(query_peers(&a.commands).await.unwrap(), vec![b.id.clone()]);
    assert_eq!(query_peers(&c.commands).await.unwrap(), vec![b.id.clone()]);

    send_chat(&a.commands, "hello from the edge").await.unwrap();
    settle().await;

    assert_eq!(c.chat_lines().await, vec!["hello from the edge"]);
    assert_eq!(query_stats(&b.commands).await.unwrap().forwarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_delivers_exactly_once() {
    let hub = MemoryHub::new();
    let (a, mut b, mut c) = triangle(&hub).await;
    b.drain();
    c.drain();

    send_chat(&a.commands, "ping").await.unwrap();
    settle().await;

    for node in [&mut b, &mut c] {
        let shown = node
            .drain()
            .into_iter()
            .filter(|e| matches!(e, NodeEvent::Display(HistoryEntry::Chat(_))))
            .count();
        assert_eq!(shown, 1);
        assert_eq!(node.chat_lines().await, vec!["ping"]);

        // one copy straight from alice, one relayed by the other neighbour
        let stats = query_stats(&node.commands).await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.duplicates, 1);
    }

    let a_stats = query_stats(&a.commands).await.unwrap();
    assert_eq!(a_stats.originated, 1);
    assert_eq!(a_stats.received, 0);
    assert_eq!(a.chat_lines().await, vec!["ping"]);
}

#[tokio::test(start_paused = true)]
async fn test_newcomer_receives_history() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let a = join(&hub, &roster, "alice").await;
    let b = join(&hub, &roster, "bob").await;

    for line in ["one", "two", "three"] {
        send_chat(&a.commands, line).await.unwrap();
    }
    send_chat(&b.commands, "four").await.unwrap();
    settle().await;

    let mut c = join(&hub, &roster, "carol").await;
    assert_eq!(c.chat_lines().await, vec!["one", "two", "three", "four"]);
    assert!(c
        .drain()
        .iter()
        .any(|e| matches!(e, NodeEvent::HistoryReplaced(entries) if entries.len() >= 4)));

    let histories = join_all([&a, &b, &c].map(|n| query_history(&n.commands))).await;
    let histories: Vec<_> = histories.into_iter().map(Result::unwrap).collect();
    assert_eq!(histories[0], histories[1]);
    assert_eq!(histories[1], histories[2]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_local() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let mut a = join(&hub, &roster, "alice").await;
    let b = join(&hub, &roster, "bob").await;

    let mut results = Vec::new();
    for n in 0..6 {
        results.push(send_chat(&a.commands, format!("burst {n}")).await);
    }
    settle().await;

    assert!(results[..5].iter().all(Result::is_ok));
    assert_eq!(results[5], Err(SendError::RateLimited));
    assert!(a.drain().contains(&NodeEvent::Notice(
        "Please slow down. You are sending messages too quickly.".to_string()
    )));
    assert_eq!(b.chat_lines().await.len(), 5);
    assert_eq!(a.chat_lines().await.len(), 5);

    // notices shown only to the local user never enter the history buffer
    for node in [&a, &b] {
        let history = query_history(&node.commands).await.unwrap();
        assert!(!history.iter().any(|entry| match entry {
            HistoryEntry::System(notice) => {
                notice.content.starts_with("Please slow down")
                    || notice.content.starts_with("Welcome,")
            }
            HistoryEntry::Chat(_) => false,
        }));
    }

    // the window slides
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(send_chat(&a.commands, "after the window").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_blank_message_is_rejected() {
    let hub = MemoryHub::new();
    let a = join(&hub, &shared_roster(), "alice").await;
    assert_eq!(send_chat(&a.commands, "   ").await, Err(SendError::Empty));
    assert!(a.chat_lines().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_severed_channel_is_removed_without_error() {
    let hub = MemoryHub::new();
    let (mut a, b, c) = triangle(&hub).await;
    a.drain();

    hub.sever(&a.id, &b.id);
    settle().await;

    assert_eq!(query_peers(&a.commands).await.unwrap(), vec![c.id.clone()]);
    let events = a.drain();
    assert!(events.contains(&NodeEvent::PeerDisconnected { peer: b.id.clone() }));
    assert!(!events.iter().any(|e| matches!(e, NodeEvent::Error(_))));

    // b still hears alice through carol
    send_chat(&a.commands, "around the break").await.unwrap();
    settle().await;
    assert_eq!(b.chat_lines().await, vec!["around the break"]);
}

#[tokio::test(start_paused = true)]
async fn test_signaling_drop_keeps_channels_and_reconnects() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let mut a = join(&hub, &roster, "alice").await;
    let b = join(&hub, &roster, "bob").await;
    a.drain();

    hub.drop_signaling(&a.id);
    settle().await;

    assert_eq!(query_state(&a.commands).await.unwrap(), SessionState::Disconnected);
    assert_eq!(query_peers(&a.commands).await.unwrap(), vec![b.id.clone()]);
    assert_eq!(
        send_chat(&a.commands, "too early").await,
        Err(SendError::NotConnected)
    );

    // inbound traffic still flows while detached
    send_chat(&b.commands, "still here").await.unwrap();
    settle().await;
    assert_eq!(a.chat_lines().await, vec!["still here"]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(query_state(&a.commands).await.unwrap(), SessionState::Open);

    let states: Vec<SessionState> = a
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            NodeEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Disconnected,
            SessionState::Connecting { attempt: 1 },
            SessionState::Open,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_budget_exhaustion_is_terminal() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let mut a = join(&hub, &roster, "alice").await;
    let b = join(&hub, &roster, "bob").await;
    a.drain();

    hub.set_server_down(true);
    hub.drop_signaling(&a.id);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(query_state(&a.commands).await.unwrap(), SessionState::Failed);
    let surfaced = a
        .drain()
        .into_iter()
        .filter(|e| *e == NodeEvent::Error(SignalingError::ServerUnavailable))
        .count();
    assert_eq!(surfaced, 3);

    // the data channel outlives the signaling attachment
    send_chat(&b.commands, "can you hear me").await.unwrap();
    settle().await;
    assert_eq!(a.chat_lines().await, vec!["can you hear me"]);
}

#[tokio::test(start_paused = true)]
async fn test_leave_notifies_neighbours() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    let a = join(&hub, &roster, "alice").await;
    let mut b = join(&hub, &roster, "bob").await;
    b.drain();

    a.commands.send(NodeCommand::Leave).await.unwrap();
    settle().await;

    let events = b.drain();
    assert!(events.contains(&NodeEvent::Display(HistoryEntry::System(
        SystemNotice::left("alice")
    ))));
    assert!(events.contains(&NodeEvent::PeerDisconnected { peer: a.id.clone() }));
    assert!(!hub.is_registered(&a.id));
    assert!(query_peers(&b.commands).await.unwrap().is_empty());

    // the node task is gone
    assert_eq!(
        send_chat(&a.commands, "hello?").await,
        Err(SendError::NodeStopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_notice_precedes_welcome() {
    let hub = MemoryHub::new();
    hub.fail_next_opens([SignalingError::Network]);
    let mut a = join(&hub, &shared_roster(), "alice").await;

    assert_eq!(
        a.drain(),
        vec![
            NodeEvent::Notice("Connection attempt 1 failed. Retrying... (1/3)".to_string()),
            NodeEvent::StateChanged(SessionState::Open),
            NodeEvent::Notice("Welcome, alice! You are now connected to the chat room.".to_string()),
        ]
    );
    assert!(query_history(&a.commands).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_attempts_no_channels() {
    let hub = MemoryHub::new();
    hub.set_server_down(true);
    let roster = shared_roster();
    roster.register(&PeerId::from("someone")).unwrap();

    let err = spawn_node(
        MeshConfig::default(),
        PeerIdentity::guest("alice").unwrap(),
        Arc::new(hub.clone()),
        roster.clone(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.attempts, 3);
    assert_eq!(hub.registered_count(), 0);
    assert_eq!(roster.list().unwrap(), vec![PeerId::from("someone")]);
}

#[tokio::test(start_paused = true)]
async fn test_offline_roster_peer_is_not_an_error() {
    let hub = MemoryHub::new();
    let roster = shared_roster();
    roster.register(&PeerId::from("long-gone")).unwrap();

    let mut a = join(&hub, &roster, "alice").await;
    assert!(!a.drain().iter().any(|e| matches!(e, NodeEvent::Error(_))));
    assert!(query_peers(&a.commands).await.unwrap().is_empty());
}
