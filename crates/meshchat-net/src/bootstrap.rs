//! Mesh bootstrap from the shared roster.
//!
//! After the signaling attachment opens, the node registers itself in the
//! roster and dials every other listed peer it is not already talking to.
//! Each dial that opens is greeted with [`join_frames`].

use meshchat_shared::identity::PeerIdentity;
use meshchat_shared::protocol::{Presence, WireMessage};
use meshchat_shared::types::PeerId;
use meshchat_store::Roster;
use tracing::{debug, info, warn};

use crate::session::SessionManager;

/// Outcome of one pass over the roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Roster snapshot after registering ourselves.
    pub roster: Vec<PeerId>,
    pub dialed: Vec<PeerId>,
    pub skipped: Vec<PeerId>,
    pub failed: Vec<PeerId>,
}

/// Frames sent, in order, on every outbound channel as soon as it opens.
pub fn join_frames(identity: &PeerIdentity) -> [WireMessage; 2] {
    [
        WireMessage::UserJoined(Presence {
            username: identity.username.clone(),
            user_id: Some(identity.id.clone()),
        }),
        WireMessage::RequestHistory,
    ]
}

/// Register in the roster, then dial every other listed peer not already
/// connected or being dialed.
///
/// A roster that cannot be read or written only means nobody gets dialed;
/// inbound channels still work.
pub fn dial_roster(session: &mut SessionManager, roster: &Roster) -> BootstrapReport {
    let self_id = session.self_id().clone();

    let peers = match roster.register(&self_id) {
        Ok(peers) => peers,
        Err(e) => {
            warn!(error = %e, "Roster unavailable, continuing without bootstrap peers");
            return BootstrapReport::default();
        }
    };

    info!(count = peers.len(), "Found peers in roster");

    let mut report = BootstrapReport {
        roster: peers.clone(),
        ..BootstrapReport::default()
    };

    for peer in peers {
        if peer == self_id {
            continue;
        }
        if session.connections().contains(&peer) {
            debug!(peer = %peer, "Already connected, not dialing");
            report.skipped.push(peer);
            continue;
        }

        match session.connect(&peer) {
            Ok(()) => {
                debug!(peer = %peer, "Dialing roster peer");
                report.dialed.push(peer);
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to dial roster peer");
                report.failed.push(peer);
            }
        }
    }

    report
}
