//! Integration test: repeated RPC failures evict a contact.
//!
//! A peer that times out twice in a row crosses the failed-RPC tolerance
//! and disappears from the routing table.

use korium_integration_tests::{id_at, make_node, MemoryNetwork};

#[tokio::test]
async fn two_timeouts_evict_the_contact() {
    let network = MemoryNetwork::new();

    let a = make_node(&network, id_at(0x01, 1), 4501);
    a.node.join(Vec::new()).await.expect("found network");
    let b = make_node(&network, id_at(0xF1, 1), 4502);
    b.node
        .join(vec![a.contact.clone()])
        .await
        .expect("join");

    assert!(a.node.contact_in_table(&b.contact.node_id).is_some());
    let size_before = a.node.routing_table_size();

    network.set_unreachable(b.contact.endpoint, true);

    // First failure: the contact survives with one strike.
    assert!(a.node.ping(&b.contact).await.is_err());
    assert!(a.node.contact_in_table(&b.contact.node_id).is_some());

    // Second failure reaches the tolerance and evicts.
    assert!(a.node.ping(&b.contact).await.is_err());
    assert!(a.node.contact_in_table(&b.contact.node_id).is_none());
    assert_eq!(a.node.routing_table_size(), size_before - 1);
}

#[tokio::test]
async fn successful_rpc_resets_the_strike_count() {
    let network = MemoryNetwork::new();

    let a = make_node(&network, id_at(0x01, 1), 4511);
    a.node.join(Vec::new()).await.expect("found network");
    let b = make_node(&network, id_at(0xF1, 1), 4512);
    b.node
        .join(vec![a.contact.clone()])
        .await
        .expect("join");

    // One failure, then recovery, then one more failure: the contact
    // must survive because the success zeroed its strike count.
    network.set_unreachable(b.contact.endpoint, true);
    assert!(a.node.ping(&b.contact).await.is_err());

    network.set_unreachable(b.contact.endpoint, false);
    assert_eq!(a.node.ping(&b.contact).await.expect("ping"), "pong");

    network.set_unreachable(b.contact.endpoint, true);
    assert!(a.node.ping(&b.contact).await.is_err());
    assert!(a.node.contact_in_table(&b.contact.node_id).is_some());
}
