//! Full mesh lifecycle against the in-process store and tunnel

use automesh_common::crypto::generate_wireguard_keypair;
use automesh_common::tunnel::TunnelController;
use automesh_common::{
    host_network, parse_mesh_cidr, Error, MemoryStore, MemoryTunnel, MeshConfig, Membership,
    NodeRecord,
};
use std::sync::Arc;

/// One node: its own tunnel device, the shared store
struct Node {
    tunnel: MemoryTunnel,
    membership: Membership,
}

impl Node {
    fn new(store: &MemoryStore, listen_port: u16) -> Self {
        let mut config = MeshConfig::default();
        config.tunnel.default_listen_port = listen_port;

        let tunnel = MemoryTunnel::new();
        let membership = Membership::new(Arc::new(store.clone()), Arc::new(tunnel.clone()), config);
        Self { tunnel, membership }
    }
}

#[tokio::test]
async fn test_two_nodes_join_and_mesh_is_deleted() {
    let store = MemoryStore::new();
    let network = parse_mesh_cidr("10.37.0.0/16").unwrap();

    let a = Node::new(&store, 44444);
    let b = Node::new(&store, 51820);

    assert!(a.membership.create("test", "10.37.0.0/16").await.unwrap());
    assert!(!b.membership.create("test", "10.37.0.0/16").await.unwrap());

    let joined_a = a.membership.join("test", "node-a", "1.2.3.4").await.unwrap();
    assert!(network.contains(joined_a.overlay_ip));
    assert_eq!(joined_a.listen_port, 44444);

    let record_a = a.membership.directory().read_node("test", "node-a").await.unwrap();
    assert_eq!(record_a.endpoint(), Some("1.2.3.4:44444".parse().unwrap()));

    let joined_b = b.membership.join("test", "node-b", "5.6.7.8").await.unwrap();
    assert!(network.contains(joined_b.overlay_ip));
    assert_ne!(joined_a.overlay_ip, joined_b.overlay_ip);
    assert_eq!(joined_b.peers_added, 1);

    let (info, nodes) = b.membership.nodes("test").await.unwrap();
    assert_eq!(info.network_cidr, network);
    assert_eq!(nodes.len(), 2);

    let peers_b = b.tunnel.interface("wg-test").unwrap().peers;
    let peer_a = &peers_b[&joined_a.public_key];
    assert_eq!(peer_a.allowed_ips, vec![host_network(joined_a.overlay_ip)]);
    assert_eq!(peer_a.endpoint, Some("1.2.3.4:44444".parse().unwrap()));

    // A learns about B on its next reconciliation pass
    let report = a.membership.update("test", "node-a", 0).await.unwrap();
    assert_eq!(report.passes, 1);
    assert_eq!(report.peers_added, 1);
    assert_eq!(
        a.tunnel.list_peer_public_keys("wg-test").await.unwrap(),
        vec![joined_b.public_key.clone()]
    );

    assert!(a.membership.delete("test").await.unwrap());
    assert!(store.is_empty());
    assert_eq!(
        a.membership.directory().read_meeting_point("test").await.unwrap(),
        None
    );
    assert!(!a.membership.delete("test").await.unwrap());
}

#[tokio::test]
async fn test_departed_member_is_pruned() {
    let store = MemoryStore::new();
    let a = Node::new(&store, 51820);
    let b = Node::new(&store, 51820);

    a.membership.create("test", "10.37.0.0/16").await.unwrap();
    a.membership.join("test", "node-a", "1.2.3.4").await.unwrap();
    b.membership.join("test", "node-b", "5.6.7.8").await.unwrap();
    a.membership.update("test", "node-a", 0).await.unwrap();
    assert_eq!(a.tunnel.interface("wg-test").unwrap().peers.len(), 1);

    b.membership.leave("test", "node-b").await.unwrap();
    assert!(b.tunnel.interface("wg-test").is_none());

    let report = a.membership.update("test", "node-a", 0).await.unwrap();
    assert_eq!(report.peers_removed, 1);
    assert!(a.tunnel.interface("wg-test").unwrap().peers.is_empty());
}

#[tokio::test]
async fn test_operations_before_join() {
    let store = MemoryStore::new();
    let a = Node::new(&store, 51820);
    a.membership.create("test", "10.37.0.0/16").await.unwrap();
    let before = store.paths();

    assert!(matches!(
        a.membership.leave("test", "node-a").await,
        Err(Error::NotJoined(_))
    ));
    assert!(matches!(
        a.membership.update("test", "node-a", 0).await,
        Err(Error::NotJoined(_))
    ));
    assert_eq!(store.paths(), before);
}

#[tokio::test]
async fn test_duplicate_key_never_leaves_both_records() {
    let store = MemoryStore::new();
    let shared = generate_wireguard_keypair().public_key;

    let a = Node::new(&store, 51820);
    a.membership.create("test", "10.37.0.0/16").await.unwrap();
    a.membership
        .directory()
        .write_node(
            "test",
            &NodeRecord {
                node_id: "node-a".to_string(),
                overlay_ip: "10.37.4.2".parse().unwrap(),
                public_key: shared.clone(),
                external_endpoint: "1.2.3.4".to_string(),
                listen_port: 51820,
            },
        )
        .await
        .unwrap();

    let mut config = MeshConfig::default();
    config.tunnel.default_listen_port = 51821;
    let clone = Membership::new(
        Arc::new(store.clone()),
        Arc::new(MemoryTunnel::new().with_public_key(shared.clone())),
        config,
    );

    assert!(matches!(
        clone.join("test", "node-b", "5.6.7.8").await,
        Err(Error::Conflict { evicted: true, .. })
    ));

    let (_, nodes) = clone.nodes("test").await.unwrap();
    let holders: Vec<_> = nodes
        .values()
        .filter(|n| n.public_key == shared)
        .map(|n| n.node_id.as_str())
        .collect();
    assert_eq!(holders, vec!["node-a"]);
}
