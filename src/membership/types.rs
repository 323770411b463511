use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

/// Version of the gossip wire protocol. Seeds reject joins from a different version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Node name, unique per cluster. Membership records are keyed by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Left,
}

/// Represents a single member in the cluster.
///
/// `meta` is an opaque blob attached by the owning node at startup and never changed afterwards;
/// the cache stores its encoded service endpoint there. The `incarnation` field is a logical
/// clock used to order updates and resolve conflicts (e.g., refuting a false "Suspect" claim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub meta: Vec<u8>,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }

    /// Alive or Suspect: still a member until declared Dead or gone.
    pub fn is_live(&self) -> bool {
        matches!(self.state, NodeState::Alive | NodeState::Suspect)
    }
}

/// The wire protocol for inter-node communication.
///
/// - `Ping/Ack`: Used for liveness checks and state synchronization.
/// - `Join/JoinAck/JoinReject`: Handshake a new node performs against a seed.
/// - `Suspect/Alive`: Disseminates changes in node health.
/// - `Leave`: Graceful departure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: Node,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
        nonce: String,
        protocol_version: u8,
    },

    JoinAck {
        nonce: String,
        members: Vec<Node>,
    },

    JoinReject {
        nonce: String,
        reason: String,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },

    Leave {
        node_id: NodeId,
        incarnation: u64,
    },
}

/// Result of a join handshake as reported back to the waiting coordinator.
#[derive(Debug, Clone)]
pub enum JoinReply {
    Accepted { members: Vec<Node> },
    Rejected { reason: String },
}
