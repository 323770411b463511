use crate::error::{CacheError, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{GossipMessage, JoinReply, Node, NodeId, NodeState, PROTOCOL_VERSION};

/// Timing knobs of the gossip protocol.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub gossip_interval: Duration,
    pub failure_detection_interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
    /// How long Dead/Left records linger before they are dropped.
    pub reap_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(500),
            failure_detection_interval: Duration::from_secs(2),
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(10),
            reap_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(3),
        }
    }
}

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    config: MembershipConfig,
    pending_joins: DashMap<String, oneshot::Sender<JoinReply>>,
    started: AtomicBool,
    left: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    /// Binds the gossip socket and registers the local node as the only member.
    ///
    /// A bind failure (e.g. the port is already taken by another node) is a configuration error.
    pub async fn new(
        id: NodeId,
        bind_addr: SocketAddr,
        meta: Vec<u8>,
        config: MembershipConfig,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            CacheError::Config(format!("cannot bind gossip socket {}: {}", bind_addr, e))
        })?;
        let gossip_addr = socket.local_addr()?;

        let incarnation_counter = Arc::new(RwLock::new(1));
        let current_inc = *incarnation_counter.read().await;
        let local_node = Node {
            id,
            gossip_addr,
            meta,
            state: NodeState::Alive,
            incarnation: current_inc,
            last_seen: Some(Instant::now()),
        };

        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        info!("Gossip socket bound on {} as {}", gossip_addr, local_node.id);

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: incarnation_counter,
            config,
            pending_joins: DashMap::new(),
            started: AtomicBool::new(false),
            left: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawns the gossip, receive and failure detection loops. Calling it again is a no-op.
    pub async fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Starting membership service...");

        let gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend([gossip_handle, receive_handle, failure_detection_handle]);
        }

        tracing::info!("All background tasks started");
    }

    /// Aborts the gossip, receive and failure detection loops. The node stops answering peers.
    pub fn shutdown(&self) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };

        if tasks.is_empty() {
            return;
        }

        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Membership service of {} stopped", self.local_node.id);
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Alive and Suspect members, self included.
    pub fn get_live_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().is_live())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub async fn incarnation(&self) -> u64 {
        *self.incarnation.read().await
    }

    /// Sends a `Join` to `seed` and waits for the seed's verdict.
    ///
    /// The receive loop must be running for the reply to be delivered.
    pub async fn join_handshake(&self, seed: SocketAddr) -> Result<JoinReply> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_joins.insert(nonce.clone(), tx);

        let msg = GossipMessage::Join {
            node: self.current_local_node().await,
            nonce: nonce.clone(),
            protocol_version: PROTOCOL_VERSION,
        };

        if let Err(e) = self.send(&msg, seed).await {
            self.pending_joins.remove(&nonce);
            return Err(CacheError::Join(format!(
                "failed to contact seed {}: {}",
                seed, e
            )));
        }
        info!("Sent join request to {}", seed);

        match tokio::time::timeout(self.config.join_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CacheError::Join(format!(
                "handshake with {} was abandoned",
                seed
            ))),
            Err(_) => {
                self.pending_joins.remove(&nonce);
                Err(CacheError::Join(format!(
                    "seed {} did not answer within {:?}",
                    seed, self.config.join_timeout
                )))
            }
        }
    }

    /// Folds a member list received from a peer into the local view.
    pub async fn absorb(&self, members: Vec<Node>) {
        for member in members {
            self.merge_member(member).await;
        }
    }

    /// Tells every live peer this node is leaving and stops pinging them.
    pub async fn leave(&self) {
        self.left.store(true, Ordering::SeqCst);
        let incarnation = *self.incarnation.read().await;
        info!("Leaving cluster as {}", self.local_node.id);

        self.broadcast_message(GossipMessage::Leave {
            node_id: self.local_node.id.clone(),
            incarnation,
        })
        .await;
    }

    async fn current_local_node(&self) -> Node {
        let mut node = self.local_node.clone();
        node.incarnation = *self.incarnation.read().await;
        node
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(msg)?;
        self.socket.send_to(&encoded, to).await?;
        Ok(())
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval);

        loop {
            interval.tick().await;

            if self.left.load(Ordering::SeqCst) {
                continue;
            }

            let targets: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && matches!(entry.value().state, NodeState::Alive | NodeState::Suspect)
                })
                .map(|entry| entry.value().clone())
                .collect();

            if targets.is_empty() {
                continue;
            }

            let target = {
                use rand::Rng;
                let idx = rand::thread_rng().gen_range(0..targets.len());
                &targets[idx]
            };

            let msg = GossipMessage::Ping {
                from: self.current_local_node().await,
            };

            if let Err(e) = self.send(&msg, target.gossip_addr).await {
                tracing::warn!("Failed to send ping to {}: {}", target.id, e);
            } else {
                tracing::trace!("Sent ping to {}", target.id);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from } => {
                self.handle_ping(from, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members).await;
            }

            GossipMessage::Join {
                node,
                nonce,
                protocol_version,
            } => {
                self.handle_join(node, nonce, protocol_version, src).await?;
            }

            GossipMessage::JoinAck { nonce, members } => {
                self.complete_join(&nonce, JoinReply::Accepted { members });
            }

            GossipMessage::JoinReject { nonce, reason } => {
                self.complete_join(&nonce, JoinReply::Rejected { reason });
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
            }

            GossipMessage::Leave {
                node_id,
                incarnation,
            } => {
                self.handle_leave(node_id, incarnation);
            }
        }

        Ok(())
    }

    /// Records direct contact from `node`: it is alive at its advertised address.
    fn mark_contact(&self, node: Node) {
        match self.members.get_mut(&node.id) {
            Some(mut existing) => {
                if existing.state != NodeState::Alive {
                    tracing::info!("Node {} at {} is back", node.id, node.gossip_addr);
                }
                existing.state = NodeState::Alive;
                existing.gossip_addr = node.gossip_addr;
                existing.meta = node.meta;
                existing.incarnation = existing.incarnation.max(node.incarnation);
                existing.last_seen = Some(Instant::now());
            }
            None => {
                tracing::info!("Discovered new member: {} at {}", node.id, node.gossip_addr);

                let mut node = node;
                node.state = NodeState::Alive;
                node.last_seen = Some(Instant::now());
                self.members.insert(node.id.clone(), node);
            }
        }
    }

    /// Whether a live record already holds `node`'s name at another address.
    fn name_conflict(&self, node: &Node) -> Option<SocketAddr> {
        self.members
            .get(&node.id)
            .filter(|existing| existing.is_live() && existing.gossip_addr != node.gossip_addr)
            .map(|existing| existing.gossip_addr)
    }

    fn all_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn handle_ping(&self, from: Node, src: SocketAddr) -> Result<()> {
        tracing::trace!("Received ping from {}", from.id);

        // A departed node only comes back through a fresh join or a newer incarnation
        let departed = self.members.get(&from.id).is_some_and(|existing| {
            existing.state == NodeState::Left && from.incarnation <= existing.incarnation
        });

        if let Some(holder) = self.name_conflict(&from) {
            tracing::warn!(
                "Ignoring ping from {} at {}: name is held by {}",
                from.id,
                from.gossip_addr,
                holder
            );
            return Ok(());
        }

        if from.id != self.local_node.id && !departed {
            self.mark_contact(from.clone());
        }

        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: *self.incarnation.read().await,
            members: self.all_members(),
        };
        self.send(&reply, src).await?;

        tracing::trace!("Sent ack to {} with {} members", from.id, self.members.len());

        Ok(())
    }

    async fn handle_ack(&self, from: NodeId, from_incarnation: u64, members: Vec<Node>) {
        tracing::trace!(
            "Received ack from {} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if from_incarnation >= member.incarnation {
                member.incarnation = from_incarnation;
                member.state = NodeState::Alive;
            }
        }

        self.absorb(members).await;
    }

    async fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            if matches!(new_member.state, NodeState::Suspect | NodeState::Dead) {
                self.refute(new_member.incarnation).await;
            }
            return;
        }

        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.gossip_addr = new_member.gossip_addr;
                    existing.meta = new_member.meta;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                if !new_member.is_alive() {
                    return;
                }

                tracing::info!(
                    "Discovered new member: {} at {}",
                    new_member.id,
                    new_member.gossip_addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
            }
        }
    }

    /// Bumps the local incarnation above `claimed` and announces the local node as alive.
    async fn refute(&self, claimed: u64) {
        let my_incarnation = {
            let mut inc = self.incarnation.write().await;
            if *inc > claimed {
                return;
            }
            *inc = claimed + 1;
            *inc
        };

        tracing::info!(
            "Refuting suspicion of {} with incarnation {}",
            self.local_node.id,
            my_incarnation
        );

        if let Some(mut me) = self.members.get_mut(&self.local_node.id) {
            me.incarnation = my_incarnation;
            me.state = NodeState::Alive;
            me.last_seen = Some(Instant::now());
        }

        self.broadcast_message(GossipMessage::Alive {
            node_id: self.local_node.id.clone(),
            incarnation: my_incarnation,
        })
        .await;
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            self.refute(incarnation).await;
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {} at {} suspected", existing.id, existing.gossip_addr);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => {
                tracing::debug!("Suspected node {} doesn't exist", node_id);
            }
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {} at {} successfully refuted suspicion",
                        existing.id,
                        existing.gossip_addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {}", node_id);
            }
        }
    }

    fn handle_leave(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            return;
        }

        if let Some(mut existing) = self.members.get_mut(&node_id)
            && incarnation >= existing.incarnation
        {
            tracing::info!("Node {} at {} left the cluster", existing.id, existing.gossip_addr);
            existing.state = NodeState::Left;
            existing.incarnation = incarnation;
            existing.last_seen = Some(Instant::now());
        }
    }

    async fn handle_join(
        &self,
        node: Node,
        nonce: String,
        protocol_version: u8,
        src: SocketAddr,
    ) -> Result<()> {
        if protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                "Rejecting join from {} at {}: protocol version {} (ours is {})",
                node.id,
                src,
                protocol_version,
                PROTOCOL_VERSION
            );
            let reply = GossipMessage::JoinReject {
                nonce,
                reason: format!(
                    "protocol version mismatch: got {}, expected {}",
                    protocol_version, PROTOCOL_VERSION
                ),
            };
            return self.send(&reply, src).await;
        }

        if node.id == self.local_node.id {
            let reply = GossipMessage::JoinReject {
                nonce,
                reason: format!("node name {} is already taken by the seed", node.id),
            };
            return self.send(&reply, src).await;
        }

        if let Some(holder) = self.name_conflict(&node) {
            tracing::warn!(
                "Rejecting join from {} at {}: name is held by {}",
                node.id,
                node.gossip_addr,
                holder
            );
            let reply = GossipMessage::JoinReject {
                nonce,
                reason: format!("node name {} is already taken by {}", node.id, holder),
            };
            return self.send(&reply, src).await;
        }

        tracing::info!("Node {} joining cluster at {}", node.id, node.gossip_addr);
        self.mark_contact(node);
        tracing::info!("Cluster size now: {}", self.get_alive_members().len());

        let reply = GossipMessage::JoinAck {
            nonce,
            members: self.all_members(),
        };
        self.send(&reply, src).await
    }

    fn complete_join(&self, nonce: &str, reply: JoinReply) {
        match self.pending_joins.remove(nonce) {
            Some((_, waiter)) => {
                let _ = waiter.send(reply);
            }
            None => {
                tracing::debug!("Join reply for unknown or expired handshake {}", nonce);
            }
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.failure_detection_interval);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();
            let mut reaped = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive => {
                        if elapsed > self.config.suspect_timeout {
                            tracing::warn!(
                                "Node {} suspected (no contact for {:?})",
                                member.id,
                                elapsed
                            );

                            member.state = NodeState::Suspect;

                            messages_to_broadcast.push(GossipMessage::Suspect {
                                node_id: member.id.clone(),
                                incarnation: member.incarnation,
                            });
                        }
                    }

                    NodeState::Suspect => {
                        if elapsed > self.config.dead_timeout {
                            tracing::warn!(
                                "Node {} declared DEAD (no contact for {:?})",
                                member.id,
                                elapsed
                            );

                            member.state = NodeState::Dead;
                        }
                    }

                    NodeState::Dead | NodeState::Left => {
                        if elapsed > self.config.reap_timeout {
                            reaped.push(member.id.clone());
                        }
                    }
                }
            }

            for id in reaped {
                self.members.remove(&id);
                tracing::debug!("Reaped member record {}", id);
            }

            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let encoded = match bincode::serialize(&msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize gossip message: {}", e);
                return;
            }
        };

        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| {
                let member = entry.value();
                member.id != self.local_node.id
                    && matches!(member.state, NodeState::Alive | NodeState::Suspect)
            })
            .map(|entry| (entry.key().clone(), entry.value().gossip_addr))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to broadcast to {}: {}", id, e);
            }
        }
    }
}
