use crate::error::{CacheError, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use super::service::MembershipService;
use super::types::JoinReply;

/// Folds the local node into an existing cluster through one seed.
///
/// Only the handshake is synchronous. The rest of the cluster learns about the new node, and the
/// new node about the rest, through regular gossip afterwards.
pub struct JoinCoordinator {
    membership: Arc<MembershipService>,
}

impl JoinCoordinator {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self { membership }
    }

    /// Joins the cluster reachable at `seed` (`host:port` of its gossip socket).
    ///
    /// Returns the number of live members known right after the handshake. Fails without
    /// retrying when the seed is unreachable, silent, or rejects the handshake.
    pub async fn join_cluster(&self, seed: &str) -> Result<usize> {
        let seed_addr = resolve(seed).await?;

        self.membership.clone().start().await;

        let before = self.membership.get_alive_members().len();
        tracing::info!("Members before joining: {}", before);

        match self.membership.join_handshake(seed_addr).await? {
            JoinReply::Accepted { members } => {
                self.membership.absorb(members).await;

                let members = self.membership.get_alive_members();
                tracing::info!("Members after joining {}: {}", seed, members.len());
                for member in &members {
                    tracing::info!("  - {} at {}", member.id, member.gossip_addr);
                }

                Ok(members.len())
            }
            JoinReply::Rejected { reason } => Err(CacheError::Join(format!(
                "seed {} rejected the handshake: {}",
                seed, reason
            ))),
        }
    }
}

async fn resolve(seed: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(seed)
        .await
        .map_err(|e| CacheError::Join(format!("cannot resolve seed {}: {}", seed, e)))?
        .next()
        .ok_or_else(|| CacheError::Join(format!("seed {} resolved to no address", seed)))
}
