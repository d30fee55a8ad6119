//! Integration test: concurrent lookups on a 32-node network.
//!
//! Sixteen find-node calls run in parallel against random targets; every
//! one completes successfully with at most k contacts sorted by XOR
//! distance to its target.

use rand::rngs::StdRng;
use rand::SeedableRng;

use korium_integration_tests::{make_node, MemoryNetwork, TestNode};
use korium_kad::K;
use korium_types::NodeId;

async fn spawn_network(count: usize) -> Vec<TestNode> {
    let network = MemoryNetwork::new();
    let mut rng = StdRng::seed_from_u64(0x6b6f7269);
    let mut nodes: Vec<TestNode> = Vec::new();
    for i in 0..count {
        let node = make_node(&network, NodeId::random(&mut rng), 5000 + i as u16);
        if i == 0 {
            node.node.join(Vec::new()).await.expect("found network");
        } else {
            let seed = nodes[i - 1].contact.clone();
            node.node.join(vec![seed]).await.expect("join");
        }
        nodes.push(node);
    }
    nodes
}

#[tokio::test]
async fn sixteen_parallel_find_nodes() {
    let nodes = spawn_network(32).await;
    let mut rng = StdRng::seed_from_u64(0x746573);

    let mut set = tokio::task::JoinSet::new();
    for i in 0..16usize {
        let node = nodes[i % nodes.len()].node.clone();
        let target = NodeId::random(&mut rng);
        set.spawn(async move {
            let contacts = node.find_nodes(target).await?;
            Ok::<_, korium_kad::KadError>((target, contacts))
        });
    }

    let mut completed = 0usize;
    while let Some(joined) = set.join_next().await {
        let (target, contacts) = joined.expect("task").expect("lookup");
        completed += 1;

        assert!(!contacts.is_empty(), "lookup found no live nodes");
        assert!(contacts.len() <= K);
        for pair in contacts.windows(2) {
            let d0 = pair[0].node_id ^ target;
            let d1 = pair[1].node_id ^ target;
            assert!(d0 <= d1, "results must be sorted by distance");
        }
    }
    assert_eq!(completed, 16);
}
