// Peer-to-peer chat mesh: signaling session, flood-fill relay and bootstrap.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod history;
pub mod memory;
pub mod node;
pub mod peers;
pub mod rate_limit;
pub mod relay;
pub mod session;
pub mod transport;

pub use bootstrap::{dial_roster, join_frames, BootstrapReport};
pub use config::{HistoryPolicy, MeshConfig, RetryPolicy};
pub use error::{AttemptFailure, ChannelError, JoinError, SendError, SignalingError};
pub use memory::MemoryHub;
pub use node::{
    query_history, query_peers, query_state, query_stats, send_chat, spawn_node, NodeCommand,
    NodeEvent,
};
pub use peers::{ConnectionInfo, ConnectionTable};
pub use relay::{RelayAction, RelayEngine, RelayStats};
pub use session::{SessionManager, SessionState};
pub use transport::{Attachment, ChannelEvent, DataChannel, SignalingLink, Transport, TransportEvent};
