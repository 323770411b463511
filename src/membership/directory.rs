use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::meta::NodeMetadata;
use super::service::MembershipService;
use super::types::{Node, NodeId};

/// A live cluster member as seen by the cache: gossip address plus the decoded service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    pub http_port: u16,
}

impl MemberRecord {
    /// Address of the member's cache HTTP service.
    pub fn service_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.http_port)
    }

    fn from_node(node: &Node) -> Option<Self> {
        match NodeMetadata::decode(&node.meta) {
            Ok(meta) => Some(Self {
                name: node.id.0.clone(),
                addr: node.gossip_addr.ip(),
                port: node.gossip_addr.port(),
                http_port: meta.http_port,
            }),
            Err(e) => {
                tracing::warn!(
                    "Excluding member {} at {}: {}",
                    node.id,
                    node.gossip_addr,
                    e
                );
                None
            }
        }
    }
}

/// Typed, read-only view over the gossip membership.
///
/// Holds no state of its own: every call reads the current view of the wrapped service.
#[derive(Clone)]
pub struct MembershipDirectory {
    membership: Arc<MembershipService>,
}

impl MembershipDirectory {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self { membership }
    }

    pub fn local_name(&self) -> &NodeId {
        self.membership.local_id()
    }

    pub fn service(&self) -> &Arc<MembershipService> {
        &self.membership
    }

    /// Alive and Suspect peers ordered by name, self excluded. Peers with undecodable metadata
    /// are skipped.
    pub fn members(&self) -> Vec<MemberRecord> {
        self.collect(false)
    }

    /// Like [`members`](Self::members) but including the local node.
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        self.collect(true)
    }

    /// Number of Alive and Suspect members, self included.
    pub fn len(&self) -> usize {
        self.membership.get_live_members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect(&self, include_self: bool) -> Vec<MemberRecord> {
        let local = self.membership.local_id();

        let mut nodes: Vec<Node> = self
            .membership
            .get_live_members()
            .into_iter()
            .filter(|node| include_self || &node.id != local)
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        nodes.iter().filter_map(MemberRecord::from_node).collect()
    }
}
