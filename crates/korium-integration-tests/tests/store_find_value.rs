//! Integration test: store / find-value round trip on a small network.
//!
//! Five nodes with ids spanning the key space form a network; a value
//! stored through one of them is then findable from every node, including
//! one that joins after the store and must fetch it over the network.

use std::time::Duration;

use korium_crypto::Securifier;
use korium_integration_tests::{id_at, make_node, MemoryNetwork, TestNode};
use korium_kad::service::hashable_key;
use korium_types::NodeId;

const TTL: Duration = Duration::from_secs(60);

async fn spawn_network(ports_base: u16) -> (MemoryNetwork, Vec<TestNode>) {
    let network = MemoryNetwork::new();
    let tops = [0x10u8, 0x30, 0x70, 0xB0, 0xF0];
    let mut nodes: Vec<TestNode> = Vec::new();
    for (i, top) in tops.iter().enumerate() {
        let node = make_node(&network, id_at(*top, 1), ports_base + i as u16);
        if i == 0 {
            node.node.join(Vec::new()).await.expect("found network");
        } else {
            node.node
                .join(vec![nodes[0].contact.clone()])
                .await
                .expect("join");
        }
        nodes.push(node);
    }
    (network, nodes)
}

fn content_key(word: &[u8]) -> NodeId {
    NodeId::from_bytes(korium_crypto::blake3::hash_to_key(word))
}

#[tokio::test]
async fn store_then_find_value_everywhere() {
    let (_network, nodes) = spawn_network(4100).await;
    let key = content_key(b"k");

    nodes[2]
        .node
        .store(key, b"v".to_vec(), TTL)
        .await
        .expect("store");

    for node in &nodes {
        let result = node.node.find_value(key).await.expect("find_value");
        assert!(result.found(), "value missing on {}", node.contact.node_id);
        assert_eq!(result.values, vec![b"v".to_vec()]);
    }
}

#[tokio::test]
async fn late_joiner_fetches_over_the_network() {
    let (network, nodes) = spawn_network(4200).await;
    let key = content_key(b"k2");

    nodes[0]
        .node
        .store(key, b"networked".to_vec(), TTL)
        .await
        .expect("store");

    // This node holds nothing locally; its lookup must hit a peer.
    let late = make_node(&network, id_at(0x55, 9), 4299);
    late.node
        .join(vec![nodes[0].contact.clone()])
        .await
        .expect("late join");

    let result = late.node.find_value(key).await.expect("find_value");
    assert!(result.found());
    assert_eq!(result.values, vec![b"networked".to_vec()]);
}

#[tokio::test]
async fn hashable_key_rejects_conflicting_store() {
    let (_network, nodes) = spawn_network(4300).await;

    let publisher = &nodes[1];
    let v1 = b"immutable content".to_vec();
    let sig1 = publisher.securifier.sign(&v1);
    let key = hashable_key(&v1, &sig1);

    publisher
        .node
        .store(key, v1.clone(), TTL)
        .await
        .expect("hashable store");

    // A different value under the same content key is refused both by
    // the publisher's own store and by the replicas.
    let result = publisher.node.store(key, b"different".to_vec(), TTL).await;
    assert!(result.is_err(), "conflicting hashable store must fail");

    let result = nodes[3].node.store(key, b"different".to_vec(), TTL).await;
    assert!(result.is_err(), "remote conflicting store must fail");

    let found = nodes[4].node.find_value(key).await.expect("find_value");
    assert_eq!(found.values, vec![v1]);
}
