//! Membership Module Tests
//!
//! Validates the fundamental components of the cluster membership system.
//!
//! ## Test Scopes
//! - **Data Structures**: Ensures uniqueness of IDs and correct serialization of wire protocol messages.
//! - **Metadata**: Encoding, truncation and decode failures of the service endpoint blob.
//! - **Directory**: Self exclusion, ordering, suspected peers kept, departed peers and peers with
//!   broken metadata excluded.
//! - **Join**: Handshake success, idempotency, rejection (version, taken names) and unreachable seeds.
//! - **Conflict Resolution**: Incarnation numbers, refutation and graceful leave.

#[cfg(test)]
mod tests {
    use crate::error::CacheError;
    use crate::membership::directory::MembershipDirectory;
    use crate::membership::join::JoinCoordinator;
    use crate::membership::meta::{META_MAX_SIZE, NodeMetadata};
    use crate::membership::service::{MembershipConfig, MembershipService};
    use crate::membership::types::{GossipMessage, Node, NodeId, NodeState, PROTOCOL_VERSION};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn test_config() -> MembershipConfig {
        MembershipConfig {
            gossip_interval: Duration::from_millis(100),
            join_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    async fn spawn_service(name: &str, http_port: u16) -> Arc<MembershipService> {
        MembershipService::new(
            NodeId(name.to_string()),
            "127.0.0.1:0".parse().unwrap(),
            NodeMetadata::new(http_port).encode(META_MAX_SIZE),
            test_config(),
        )
        .await
        .expect("Failed to create service")
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    /// An address nobody listens on.
    fn unused_udp_addr() -> SocketAddr {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    }

    fn peer_node(name: &str, port: u16, meta: Vec<u8>) -> Node {
        Node {
            id: NodeId(name.to_string()),
            gossip_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            meta,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        }
    }

    // ============================================================
    // NODE ID & WIRE FORMAT
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
    }

    #[test]
    fn test_node_id_ordering_follows_name() {
        let mut ids = vec![
            NodeId("node-c".to_string()),
            NodeId("node-a".to_string()),
            NodeId("node-b".to_string()),
        ];
        ids.sort();

        assert_eq!(ids[0].0, "node-a");
        assert_eq!(ids[2].0, "node-c");
    }

    #[test]
    fn test_node_serialization_skips_last_seen() {
        let node = peer_node("test-node", 5000, b"{\"http_port\":6000}".to_vec());

        let encoded = bincode::serialize(&node).expect("Bincode serialization failed");
        let restored: Node =
            bincode::deserialize(&encoded).expect("Bincode deserialization failed");

        assert_eq!(restored.id, node.id);
        assert_eq!(restored.meta, node.meta);
        assert!(restored.last_seen.is_none());
    }

    #[test]
    fn test_gossip_join_serialization() {
        let msg = GossipMessage::Join {
            node: peer_node("new-joiner", 5000, vec![]),
            nonce: "abc".to_string(),
            protocol_version: PROTOCOL_VERSION,
        };

        let encoded = bincode::serialize(&msg).expect("Failed to serialize Join");
        let decoded: GossipMessage =
            bincode::deserialize(&encoded).expect("Failed to deserialize Join");

        if let GossipMessage::Join {
            node,
            nonce,
            protocol_version,
        } = decoded
        {
            assert_eq!(node.id.0, "new-joiner");
            assert_eq!(nonce, "abc");
            assert_eq!(protocol_version, PROTOCOL_VERSION);
        } else {
            panic!("Wrong message type");
        }
    }

    // ============================================================
    // METADATA
    // ============================================================

    #[test]
    fn test_metadata_wire_format() {
        let bytes = NodeMetadata::new(8001).encode(META_MAX_SIZE);

        assert_eq!(bytes, br#"{"http_port":8001}"#.to_vec());
        assert_eq!(NodeMetadata::decode(&bytes).unwrap().http_port, 8001);
    }

    #[test]
    fn test_metadata_truncated_to_limit() {
        let bytes = NodeMetadata::new(8001).encode(8);

        assert_eq!(bytes.len(), 8);
        assert!(matches!(
            NodeMetadata::decode(&bytes),
            Err(CacheError::Decode(_))
        ));
    }

    #[test]
    fn test_metadata_decode_garbage() {
        assert!(NodeMetadata::decode(b"not json").is_err());
        assert!(NodeMetadata::decode(b"").is_err());
        assert!(NodeMetadata::decode(br#"{"http_port":70000}"#).is_err());
    }

    // ============================================================
    // MEMBERSHIP SERVICE
    // ============================================================

    #[tokio::test]
    async fn test_membership_service_creation() {
        let service = spawn_service("solo", 8000).await;

        assert_eq!(service.members.len(), 1);

        let alive = service.get_alive_members();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, service.local_node.id);
        assert_eq!(alive[0].state, NodeState::Alive);
        assert_ne!(service.local_node.gossip_addr.port(), 0);
    }

    #[tokio::test]
    async fn test_same_port_is_config_error() {
        let first = spawn_service("first", 8000).await;

        let second = MembershipService::new(
            NodeId("second".to_string()),
            first.local_node.gossip_addr,
            NodeMetadata::new(8001).encode(META_MAX_SIZE),
            test_config(),
        )
        .await;

        assert!(matches!(second, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_get_member() {
        let service = spawn_service("me", 8000).await;

        let member = service.get_member(&service.local_node.id);
        assert!(member.is_some());

        let fake_id = NodeId("non-existent".to_string());
        assert!(service.get_member(&fake_id).is_none());
    }

    // ============================================================
    // DIRECTORY
    // ============================================================

    #[tokio::test]
    async fn test_directory_excludes_self() {
        let service = spawn_service("me", 8000).await;
        let peer = peer_node("peer", 7001, NodeMetadata::new(8001).encode(META_MAX_SIZE));
        service.members.insert(peer.id.clone(), peer);

        let directory = MembershipDirectory::new(service);
        let members = directory.members();

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "peer");
        assert_eq!(members[0].port, 7001);
        assert_eq!(members[0].http_port, 8001);
        assert_eq!(
            members[0].service_endpoint(),
            "127.0.0.1:8001".parse::<SocketAddr>().unwrap()
        );

        assert_eq!(directory.snapshot().len(), 2);
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test]
    async fn test_directory_is_sorted_by_name() {
        let service = spawn_service("me", 8000).await;
        for (name, port) in [("zeta", 7003), ("alpha", 7001), ("mid", 7002)] {
            service.members.insert(
                NodeId(name.to_string()),
                peer_node(name, port, NodeMetadata::new(port + 1000).encode(META_MAX_SIZE)),
            );
        }

        let names: Vec<String> = MembershipDirectory::new(service)
            .members()
            .into_iter()
            .map(|m| m.name)
            .collect();

        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_directory_skips_undecodable_metadata() {
        let service = spawn_service("me", 8000).await;
        let broken = peer_node("broken", 7001, b"{\"http_po".to_vec());
        let good = peer_node("good", 7002, NodeMetadata::new(8002).encode(META_MAX_SIZE));
        service.members.insert(broken.id.clone(), broken);
        service.members.insert(good.id.clone(), good);

        let members = MembershipDirectory::new(service).members();

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "good");
    }

    #[tokio::test]
    async fn test_directory_keeps_suspect_and_drops_departed_members() {
        let service = spawn_service("me", 8000).await;
        let mut suspect = peer_node("suspect", 7001, NodeMetadata::new(8001).encode(META_MAX_SIZE));
        suspect.state = NodeState::Suspect;
        let mut left = peer_node("left", 7002, NodeMetadata::new(8002).encode(META_MAX_SIZE));
        left.state = NodeState::Left;
        let mut dead = peer_node("dead", 7003, NodeMetadata::new(8003).encode(META_MAX_SIZE));
        dead.state = NodeState::Dead;
        for node in [suspect, left, dead] {
            service.members.insert(node.id.clone(), node);
        }

        let directory = MembershipDirectory::new(service);
        let members = directory.members();

        // A suspected peer still receives writes until it is declared dead
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "suspect");
        assert_eq!(members[0].http_port, 8001);
        assert_eq!(directory.len(), 2);
    }

    // ============================================================
    // JOIN
    // ============================================================

    #[tokio::test]
    async fn test_join_unreachable_seed_fails() {
        let service = spawn_service("lonely", 8000).await;
        let coordinator = JoinCoordinator::new(service.clone());

        let result = coordinator
            .join_cluster(&unused_udp_addr().to_string())
            .await;

        assert!(matches!(result, Err(CacheError::Join(_))));
        assert_eq!(service.get_alive_members().len(), 1);
    }

    #[tokio::test]
    async fn test_join_unresolvable_seed_fails() {
        let service = spawn_service("lonely", 8000).await;

        let result = JoinCoordinator::new(service.clone())
            .join_cluster("not an address")
            .await;

        assert!(matches!(result, Err(CacheError::Join(_))));
    }

    #[tokio::test]
    async fn test_join_two_nodes() {
        let seed = spawn_service("node1", 8000).await;
        seed.clone().start().await;
        let joiner = spawn_service("node2", 8001).await;

        let known = JoinCoordinator::new(joiner.clone())
            .join_cluster(&seed.local_node.gossip_addr.to_string())
            .await
            .expect("join should succeed");

        assert_eq!(known, 2);
        assert_eq!(joiner.get_alive_members().len(), 2);
        assert_eq!(seed.get_alive_members().len(), 2);

        let peers = MembershipDirectory::new(seed).members();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "node2");
        assert_eq!(peers[0].http_port, 8001);
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent() {
        let seed = spawn_service("node1", 8000).await;
        seed.clone().start().await;
        let joiner = spawn_service("node2", 8001).await;
        let coordinator = JoinCoordinator::new(joiner.clone());
        let seed_addr = seed.local_node.gossip_addr.to_string();

        coordinator.join_cluster(&seed_addr).await.unwrap();
        coordinator.join_cluster(&seed_addr).await.unwrap();

        assert_eq!(seed.members.len(), 2);
        assert_eq!(joiner.members.len(), 2);
    }

    #[tokio::test]
    async fn test_third_node_converges_through_gossip() {
        let seed = spawn_service("node1", 8000).await;
        seed.clone().start().await;
        let second = spawn_service("node2", 8001).await;
        let third = spawn_service("node3", 8002).await;
        let seed_addr = seed.local_node.gossip_addr.to_string();

        JoinCoordinator::new(second.clone()).join_cluster(&seed_addr).await.unwrap();
        JoinCoordinator::new(third.clone()).join_cluster(&seed_addr).await.unwrap();

        assert!(wait_until(|| second.get_alive_members().len() == 3).await);
        assert!(wait_until(|| third.get_alive_members().len() == 3).await);
    }

    #[tokio::test]
    async fn test_join_rejects_duplicate_name() {
        let seed = spawn_service("same", 8000).await;
        seed.clone().start().await;
        let joiner = spawn_service("same", 8001).await;

        let result = JoinCoordinator::new(joiner.clone())
            .join_cluster(&seed.local_node.gossip_addr.to_string())
            .await;

        assert!(matches!(result, Err(CacheError::Join(_))));
        assert_eq!(seed.members.len(), 1);
    }

    #[tokio::test]
    async fn test_join_rejects_name_held_by_another_member() {
        let seed = spawn_service("seed", 8000).await;
        seed.clone().start().await;
        let seed_addr = seed.local_node.gossip_addr.to_string();

        let original = spawn_service("b", 8001).await;
        JoinCoordinator::new(original.clone())
            .join_cluster(&seed_addr)
            .await
            .unwrap();

        let impostor = spawn_service("b", 9999).await;
        let result = JoinCoordinator::new(impostor.clone())
            .join_cluster(&seed_addr)
            .await;

        assert!(matches!(result, Err(CacheError::Join(_))));
        assert_eq!(seed.members.len(), 2);

        let record = seed.get_member(&NodeId("b".to_string())).unwrap();
        assert_eq!(record.gossip_addr, original.local_node.gossip_addr);
        assert_eq!(NodeMetadata::decode(&record.meta).unwrap().http_port, 8001);
    }

    #[tokio::test]
    async fn test_ping_from_name_held_elsewhere_is_ignored() {
        let service = spawn_service("me", 8000).await;
        let holder = peer_node("b", 7001, NodeMetadata::new(8001).encode(META_MAX_SIZE));
        service.members.insert(holder.id.clone(), holder.clone());

        let mut claimant = peer_node("b", 7002, NodeMetadata::new(9999).encode(META_MAX_SIZE));
        claimant.incarnation = 7;

        service
            .handle_message(GossipMessage::Ping { from: claimant }, unused_udp_addr())
            .await
            .unwrap();

        let record = service.get_member(&holder.id).unwrap();
        assert_eq!(record.gossip_addr, holder.gossip_addr);
        assert_eq!(record.meta, holder.meta);
        assert_eq!(record.incarnation, 1);
    }

    #[tokio::test]
    async fn test_join_rejects_protocol_mismatch() {
        let seed = spawn_service("seed", 8000).await;
        seed.clone().start().await;

        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let joiner = peer_node("old-version", socket.local_addr().unwrap().port(), vec![]);
        let msg = GossipMessage::Join {
            node: joiner,
            nonce: "n-1".to_string(),
            protocol_version: PROTOCOL_VERSION + 1,
        };
        socket
            .send_to(&bincode::serialize(&msg).unwrap(), seed.local_node.gossip_addr)
            .await
            .unwrap();

        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("seed should answer")
            .unwrap();

        match bincode::deserialize::<GossipMessage>(&buf[..len]).unwrap() {
            GossipMessage::JoinReject { nonce, reason } => {
                assert_eq!(nonce, "n-1");
                assert!(reason.contains("protocol version"));
            }
            other => panic!("Expected JoinReject, got {:?}", other),
        }
        assert_eq!(seed.members.len(), 1);
    }

    // ============================================================
    // INCARNATION, REFUTATION & LEAVE
    // ============================================================

    #[tokio::test]
    async fn test_shutdown_stops_answering_peers() {
        let seed = spawn_service("node1", 8000).await;
        seed.clone().start().await;
        seed.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let joiner = spawn_service("node2", 8001).await;
        let result = JoinCoordinator::new(joiner.clone())
            .join_cluster(&seed.local_node.gossip_addr.to_string())
            .await;

        assert!(matches!(result, Err(CacheError::Join(_))));
        assert_eq!(seed.members.len(), 1);
    }

    #[tokio::test]
    async fn test_self_suspicion_is_refuted() {
        let service = spawn_service("me", 8000).await;
        let src = unused_udp_addr();

        service
            .handle_message(
                GossipMessage::Suspect {
                    node_id: service.local_node.id.clone(),
                    incarnation: 1,
                },
                src,
            )
            .await
            .unwrap();

        assert_eq!(service.incarnation().await, 2);
        let me = service.get_member(&service.local_node.id).unwrap();
        assert_eq!(me.state, NodeState::Alive);
        assert_eq!(me.incarnation, 2);
    }

    #[tokio::test]
    async fn test_higher_incarnation_wins_on_merge() {
        let service = spawn_service("me", 8000).await;
        let peer = peer_node("peer", 7001, NodeMetadata::new(8001).encode(META_MAX_SIZE));
        service.members.insert(peer.id.clone(), peer.clone());

        let mut newer = peer.clone();
        newer.state = NodeState::Suspect;
        newer.incarnation = 5;
        let mut stale = peer.clone();
        stale.state = NodeState::Dead;
        stale.incarnation = 2;

        service.absorb(vec![newer]).await;
        service.absorb(vec![stale]).await;

        let merged = service.get_member(&peer.id).unwrap();
        assert_eq!(merged.state, NodeState::Suspect);
        assert_eq!(merged.incarnation, 5);
    }

    #[tokio::test]
    async fn test_leave_is_observed_by_peers() {
        let seed = spawn_service("node1", 8000).await;
        seed.clone().start().await;
        let joiner = spawn_service("node2", 8001).await;

        JoinCoordinator::new(joiner.clone())
            .join_cluster(&seed.local_node.gossip_addr.to_string())
            .await
            .unwrap();
        assert_eq!(seed.get_alive_members().len(), 2);

        joiner.leave().await;

        assert!(wait_until(|| seed.get_alive_members().len() == 1).await);
        let departed = seed.get_member(&NodeId("node2".to_string())).unwrap();
        assert_eq!(departed.state, NodeState::Left);
        assert!(MembershipDirectory::new(seed).members().is_empty());
    }
}
