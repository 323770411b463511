use crate::cache::store::ExpiringStore;
use crate::error::{CacheError, Result};
use crate::membership::directory::{MemberRecord, MembershipDirectory};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;

use super::envelope::{ForwardedCopy, Operation, OperationEnvelope};

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Upper bound for a single peer send.
    pub forward_timeout: Duration,
    /// Whether origin reads are also sent to peers.
    pub broadcast_reads: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(2),
            broadcast_reads: true,
        }
    }
}

/// Result of applying an operation to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Stored,
    Found(String),
    Missing,
    Deleted,
}

/// How a fan-out went. Never affects the answer given to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub acknowledged: usize,
}

/// Applies operations locally and replicates origin operations to every live peer.
///
/// Envelopes received as origin are applied, then sent once to each peer as a forwarded copy.
/// Forwarded envelopes are applied and never sent anywhere, which keeps every broadcast one hop
/// deep in a full mesh. Peers that miss an update are not repaired.
pub struct Broadcaster {
    store: ExpiringStore,
    directory: MembershipDirectory,
    http_client: reqwest::Client,
    config: BroadcastConfig,
    forward_attempts: AtomicU64,
}

impl Broadcaster {
    pub fn new(
        store: ExpiringStore,
        directory: MembershipDirectory,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            store,
            directory,
            http_client: reqwest::Client::new(),
            config,
            forward_attempts: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &ExpiringStore {
        &self.store
    }

    pub fn directory(&self) -> &MembershipDirectory {
        &self.directory
    }

    /// Total number of peer sends this node has attempted.
    pub fn forward_attempts(&self) -> u64 {
        self.forward_attempts.load(Ordering::SeqCst)
    }

    /// Applies `envelope` locally and, for origin envelopes, fans it out to all peers.
    ///
    /// Returns once the local apply and every peer send (each bounded by the forward timeout)
    /// have finished. The outcome is always the local one.
    pub async fn handle(&self, envelope: OperationEnvelope) -> ApplyOutcome {
        let outcome = self.apply_local(&envelope.op);

        match envelope.forwarded_copy() {
            Some(copy) if self.should_fan_out(copy.op()) => {
                let report = self.fan_out(copy).await;
                tracing::debug!(
                    "Broadcast {} {}: {}/{} peers acknowledged",
                    envelope.op.method(),
                    envelope.op.key(),
                    report.acknowledged,
                    report.attempted
                );
            }
            Some(_) => {}
            None => {
                tracing::debug!(
                    "Applied forwarded {} {}",
                    envelope.op.method(),
                    envelope.op.key()
                );
            }
        }

        outcome
    }

    pub fn apply_local(&self, op: &Operation) -> ApplyOutcome {
        match op {
            Operation::Put { key, value, ttl } => {
                self.store.put(key.clone(), value.clone(), *ttl);
                ApplyOutcome::Stored
            }
            Operation::Get { key } => match self.store.get(key) {
                Some(value) => ApplyOutcome::Found(value),
                None => ApplyOutcome::Missing,
            },
            Operation::Delete { key } => {
                self.store.delete(key);
                ApplyOutcome::Deleted
            }
        }
    }

    fn should_fan_out(&self, op: &Operation) -> bool {
        !op.is_read() || self.config.broadcast_reads
    }

    /// Sends `copy` to every peer currently in the directory, all in parallel.
    ///
    /// The peer list is read once; membership changes during the fan-out are not picked up.
    pub async fn fan_out(&self, copy: ForwardedCopy) -> FanOutReport {
        let peers = self.directory.members();
        let mut report = FanOutReport {
            attempted: peers.len(),
            acknowledged: 0,
        };

        if peers.is_empty() {
            return report;
        }

        let copy = Arc::new(copy);
        let mut sends = JoinSet::new();

        for peer in peers {
            self.forward_attempts.fetch_add(1, Ordering::SeqCst);

            let client = self.http_client.clone();
            let copy = copy.clone();
            let timeout = self.config.forward_timeout;

            sends.spawn(async move {
                let result = forward_to(&client, &peer, &copy, timeout).await;
                (peer, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.acknowledged += 1,
                Ok((peer, Err(e))) => {
                    tracing::warn!("Replication to {} failed: {}", peer.name, e);
                }
                Err(e) => {
                    tracing::error!("Forwarding task panicked: {}", e);
                }
            }
        }

        report
    }
}

async fn forward_to(
    client: &reqwest::Client,
    peer: &MemberRecord,
    copy: &ForwardedCopy,
    timeout: Duration,
) -> Result<()> {
    let endpoint = peer.service_endpoint();
    let failed = |reason: String| CacheError::Forward {
        peer: endpoint.to_string(),
        reason,
    };

    let response = copy
        .request(client, endpoint, timeout)?
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    // A miss is a valid answer to a forwarded read
    let answered = status.is_success()
        || (copy.op().is_read() && status == reqwest::StatusCode::NOT_FOUND);

    if !answered {
        return Err(failed(format!("peer answered {}", status)));
    }

    Ok(())
}
