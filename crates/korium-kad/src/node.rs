//! The node facade: the public surface of a Korium DHT participant.
//!
//! A [`Node`] owns the routing table and data store, wires the RPC client,
//! lookup engine, and inbound service around them, and drives the
//! background traffic that keeps the DHT healthy:
//!
//! - a bucket refresh loop provoking lookups into stale buckets
//! - a data refresh loop re-asserting held values (and propagating
//!   deletion proofs) to the k closest peers
//! - an expiry sweep purging entries past their TTL
//! - a downlist drain verifying reported-dead peers with pings
//!
//! Store, delete, and update first converge on the k closest live nodes
//! via the lookup engine, then fan the verb out to all of them in
//! parallel; the operation succeeds when the accepting fraction reaches
//! the configured quorum.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use korium_crypto::Securifier;
use korium_transport::cbor;
use korium_transport::messages::SignedValue;
use korium_transport::RpcTransport;
use korium_types::{Contact, NodeId};

use crate::datastore::DataStore;
use crate::lookup::{LookupEngine, LookupMode, LookupOutcome};
use crate::routing_table::RoutingTable;
use crate::rpcs::{FindValueReply, Rpcs};
use crate::service::Service;
use crate::{
    AlternativeStore, KadError, Result, EXPIRY_SWEEP_INTERVAL, K, MEAN_REFRESH_INTERVAL,
    MIN_SUCCESSFUL_DELETE_RATIO, MIN_SUCCESSFUL_STORE_RATIO, MIN_SUCCESSFUL_UPDATE_RATIO,
    REPUBLISH_INTERVAL,
};

/// The result of a find-value operation.
#[derive(Clone, Debug)]
pub struct FindValueResult {
    /// The values found, empty on a miss.
    pub values: Vec<Vec<u8>>,
    /// The values with their publisher signatures.
    pub signed_values: Vec<SignedValue>,
    /// The k closest nodes, filled on a miss.
    pub closest_nodes: Vec<Contact>,
    /// A node serving the key from its alternative store.
    pub alternative_value_holder: Option<Contact>,
    /// The contact that should receive a cache copy of the values.
    pub needs_cache_copy: Option<Contact>,
}

impl FindValueResult {
    /// Whether any value was found.
    pub fn found(&self) -> bool {
        !self.values.is_empty() || !self.signed_values.is_empty()
    }
}

/// A Korium DHT node.
///
/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    own_contact: Contact,
    routing_table: Arc<Mutex<RoutingTable>>,
    datastore: Arc<Mutex<DataStore>>,
    securifier: Arc<dyn Securifier>,
    rpcs: Arc<Rpcs>,
    engine: LookupEngine<Rpcs>,
    service: Arc<Service>,
    joined: Arc<AtomicBool>,
    rng: Mutex<StdRng>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    downlist_rx: Mutex<Option<mpsc::UnboundedReceiver<Contact>>>,
}

impl Node {
    /// Assemble a node around a transport and an identity.
    ///
    /// The node is inert until [`join`](Self::join); wire
    /// [`service`](Self::service) into the transport's inbound side to
    /// answer peers.
    pub fn new(
        own_contact: Contact,
        transport: Arc<dyn RpcTransport>,
        securifier: Arc<dyn Securifier>,
        alternative_store: Option<Arc<dyn AlternativeStore>>,
    ) -> Self {
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(own_contact.node_id, K)));
        let datastore = Arc::new(Mutex::new(DataStore::new()));
        let joined = Arc::new(AtomicBool::new(false));

        let rpcs = Arc::new(Rpcs::new(
            transport,
            Arc::clone(&securifier),
            Arc::clone(&routing_table),
            own_contact.clone(),
        ));
        let engine = LookupEngine::new(Arc::clone(&rpcs), own_contact.node_id);
        let (service, downlist_rx) = Service::new(
            Arc::clone(&routing_table),
            Arc::clone(&datastore),
            Arc::clone(&securifier),
            alternative_store,
            own_contact.clone(),
            Arc::clone(&joined),
        );

        Self {
            inner: Arc::new(NodeInner {
                own_contact,
                routing_table,
                datastore,
                securifier,
                rpcs,
                engine,
                service: Arc::new(service),
                joined,
                rng: Mutex::new(StdRng::from_entropy()),
                tasks: Mutex::new(Vec::new()),
                downlist_rx: Mutex::new(Some(downlist_rx)),
            }),
        }
    }

    /// This node's own contact.
    pub fn contact(&self) -> &Contact {
        &self.inner.own_contact
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.inner.own_contact.node_id
    }

    /// The inbound request handler, to be wired into the transport.
    pub fn service(&self) -> Arc<Service> {
        Arc::clone(&self.inner.service)
    }

    /// The RPC client, exposing per-verb timing statistics.
    pub fn rpcs(&self) -> &Rpcs {
        &self.inner.rpcs
    }

    /// Whether the node has joined a network.
    pub fn is_joined(&self) -> bool {
        self.inner.joined.load(Ordering::Acquire)
    }

    /// Number of contacts currently known.
    pub fn routing_table_size(&self) -> usize {
        self.inner.routing_table.lock().size()
    }

    /// The contact stored for `id`, if the routing table knows it.
    pub fn contact_in_table(&self, id: &NodeId) -> Option<Contact> {
        self.inner.routing_table.lock().get_contact(id)
    }

    /// Join the network.
    ///
    /// With seeds, bootstraps by looking up the node's own id through them
    /// and then probing every bucket; failing to reach a single seed is
    /// fatal. Without seeds, the node founds a new network.
    pub async fn join(&self, seeds: Vec<Contact>) -> Result<()> {
        if self.is_joined() {
            return Ok(());
        }
        self.inner.joined.store(true, Ordering::Release);

        if seeds.is_empty() {
            info!(id = %self.node_id(), "founding a new network");
            self.start_background_tasks();
            return Ok(());
        }

        {
            let mut table = self.inner.routing_table.lock();
            for seed in &seeds {
                table.add_contact(seed.clone());
            }
        }

        let outcome = self
            .inner
            .engine
            .run(*self.node_id(), LookupMode::Bootstrap, seeds)
            .await?;
        let reached = match &outcome {
            LookupOutcome::Nodes { contacts, .. } => contacts.len(),
            LookupOutcome::Values { .. } => 0,
        };
        if reached == 0 {
            self.inner.joined.store(false, Ordering::Release);
            return Err(KadError::JoinFailed("no live seed responded".to_string()));
        }
        info!(id = %self.node_id(), peers = reached, "self-lookup complete");

        // Probe every bucket with a random target to fill the table.
        let probes = {
            let table = self.inner.routing_table.lock();
            let mut rng = self.inner.rng.lock();
            table.refresh_targets(0, true, &mut *rng)
        };
        for target in probes {
            let seeds = self.closest_known(&target);
            if let Err(e) = self.inner.engine.run(target, LookupMode::FindNode, seeds).await {
                debug!(probe = %target, error = %e, "bucket probe failed");
            }
            self.inner.routing_table.lock().touch_bucket(&target);
        }

        self.start_background_tasks();
        info!(
            id = %self.node_id(),
            contacts = self.routing_table_size(),
            "joined network"
        );
        Ok(())
    }

    /// Leave the network: stop answering, stop timers, drop lookups.
    pub async fn leave(&self) {
        self.inner.joined.store(false, Ordering::Release);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        info!(id = %self.node_id(), "left network");
    }

    /// Store a value, signed by this node, on the k closest peers.
    pub async fn store(&self, key: NodeId, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.require_joined()?;
        let signed_value = self.sign_value(value);

        // Keep the owner copy; it seeds the refresh loop.
        let is_hashable =
            crate::service::hashable_key(&signed_value.value, &signed_value.signature) == key;
        self.inner.datastore.lock().store(
            key,
            signed_value.value.clone(),
            signed_value.signature.clone(),
            self.inner.securifier.signer_id(),
            ttl,
            true,
            is_hashable,
        )?;

        let contacts = self.converge(&key).await?;
        if contacts.is_empty() {
            return Ok(());
        }
        let attempts: Vec<_> = contacts
            .iter()
            .cloned()
            .map(|peer| {
                let rpcs = Arc::clone(&self.inner.rpcs);
                let signed_value = signed_value.clone();
                async move { rpcs.store(&key, &signed_value, &peer, ttl, true).await }
            })
            .collect();
        let successes = parallel_successes(attempts).await;
        quorum(successes, contacts.len(), MIN_SUCCESSFUL_STORE_RATIO)
    }

    /// Soft-delete a value this node published from the k closest peers.
    pub async fn delete_value(&self, key: NodeId, value: Vec<u8>) -> Result<()> {
        self.require_joined()?;
        let signed_value = self.sign_value(value);

        // Mirror the deletion locally so refreshes stop re-asserting it.
        let proof = cbor::to_vec(&self.inner.rpcs.build_delete_request(&key, &signed_value))?;
        self.inner
            .datastore
            .lock()
            .mark_for_deletion(&key, &signed_value.value, proof);

        let contacts = self.converge(&key).await?;
        if contacts.is_empty() {
            return Ok(());
        }
        let attempts: Vec<_> = contacts
            .iter()
            .cloned()
            .map(|peer| {
                let rpcs = Arc::clone(&self.inner.rpcs);
                let signed_value = signed_value.clone();
                async move { rpcs.delete_value(&key, &signed_value, &peer).await }
            })
            .collect();
        let successes = parallel_successes(attempts).await;
        quorum(successes, contacts.len(), MIN_SUCCESSFUL_DELETE_RATIO)
    }

    /// Replace `old_value` with `new_value` on the k closest peers.
    pub async fn update(
        &self,
        key: NodeId,
        old_value: Vec<u8>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> Result<()> {
        self.require_joined()?;
        let old_signed = self.sign_value(old_value);
        let new_signed = self.sign_value(new_value);

        {
            // Best-effort local mirror; replicas are authoritative.
            let mut store = self.inner.datastore.lock();
            if store.has_key(&key) {
                if let Err(e) = store.update(
                    &key,
                    &old_signed.value,
                    new_signed.value.clone(),
                    new_signed.signature.clone(),
                    self.inner.securifier.signer_id(),
                    ttl,
                    false,
                ) {
                    debug!(key = %key, error = %e, "local update mirror skipped");
                }
            }
        }

        let contacts = self.converge(&key).await?;
        if contacts.is_empty() {
            return Ok(());
        }
        let attempts: Vec<_> = contacts
            .iter()
            .cloned()
            .map(|peer| {
                let rpcs = Arc::clone(&self.inner.rpcs);
                let new_signed = new_signed.clone();
                let old_signed = old_signed.clone();
                async move { rpcs.update(&key, &new_signed, &old_signed, &peer, ttl).await }
            })
            .collect();
        let successes = parallel_successes(attempts).await;
        quorum(successes, contacts.len(), MIN_SUCCESSFUL_UPDATE_RATIO)
    }

    /// Find the values stored under a key, or the k closest nodes.
    pub async fn find_value(&self, key: NodeId) -> Result<FindValueResult> {
        self.require_joined()?;

        // A locally held value answers without any network traffic.
        let local = self.inner.datastore.lock().load(&key);
        if !local.is_empty() {
            let mut result = FindValueResult {
                values: Vec::new(),
                signed_values: Vec::new(),
                closest_nodes: Vec::new(),
                alternative_value_holder: None,
                needs_cache_copy: None,
            };
            for (value, signature) in local {
                result.values.push(value.clone());
                result.signed_values.push(SignedValue { value, signature });
            }
            return Ok(result);
        }

        let seeds = self.closest_known(&key);
        let outcome = self
            .inner
            .engine
            .run(key, LookupMode::FindValue, seeds)
            .await?;
        self.inner.routing_table.lock().touch_bucket(&key);

        Ok(match outcome {
            LookupOutcome::Values {
                reply,
                needs_cache_copy,
                ..
            } => {
                let FindValueReply {
                    values,
                    signed_values,
                    closest_nodes,
                    alternative_value_holder,
                    ..
                } = reply;
                FindValueResult {
                    values,
                    signed_values,
                    closest_nodes,
                    alternative_value_holder,
                    needs_cache_copy,
                }
            }
            LookupOutcome::Nodes {
                contacts,
                needs_cache_copy,
                downed,
            } => {
                self.report_downlist(&contacts, downed).await;
                FindValueResult {
                    values: Vec::new(),
                    signed_values: Vec::new(),
                    closest_nodes: contacts,
                    alternative_value_holder: None,
                    needs_cache_copy,
                }
            }
        })
    }

    /// Find the k closest live nodes to a key.
    pub async fn find_nodes(&self, key: NodeId) -> Result<Vec<Contact>> {
        self.require_joined()?;
        let seeds = self.closest_known(&key);
        let outcome = self.inner.engine.run(key, LookupMode::FindNode, seeds).await?;
        self.inner.routing_table.lock().touch_bucket(&key);
        match outcome {
            LookupOutcome::Nodes {
                contacts, downed, ..
            } => {
                self.report_downlist(&contacts, downed).await;
                Ok(contacts)
            }
            LookupOutcome::Values { .. } => Ok(Vec::new()),
        }
    }

    /// Ping a specific peer; returns the echo string.
    pub async fn ping(&self, peer: &Contact) -> Result<String> {
        self.require_joined()?;
        self.inner.rpcs.ping(peer).await
    }

    /// Fetch a contact's details: from the local table, else the network.
    pub async fn get_contact(&self, id: NodeId) -> Result<Option<Contact>> {
        self.require_joined()?;
        if let Some(contact) = self.contact_in_table(&id) {
            return Ok(Some(contact));
        }
        let contacts = self.find_nodes(id).await?;
        Ok(contacts.into_iter().find(|c| c.node_id == id))
    }

    /// Values stored locally under `key`, without touching the network.
    pub fn find_value_local(&self, key: &NodeId) -> Vec<Vec<u8>> {
        self.inner
            .datastore
            .lock()
            .load(key)
            .into_iter()
            .map(|(value, _)| value)
            .collect()
    }

    /// Store a value locally only.
    pub fn store_local(&self, key: NodeId, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let signed_value = self.sign_value(value);
        let is_hashable =
            crate::service::hashable_key(&signed_value.value, &signed_value.signature) == key;
        self.inner.datastore.lock().store(
            key,
            signed_value.value,
            signed_value.signature,
            self.inner.securifier.signer_id(),
            ttl,
            true,
            is_hashable,
        )
    }

    /// How long ago the local copy of `(key, value)` was refreshed.
    pub fn key_refresh_age(&self, key: &NodeId, value: &[u8]) -> Option<Duration> {
        self.inner
            .datastore
            .lock()
            .last_refresh_time(key, value)
            .map(|at| at.elapsed())
    }

    /// How long until the local copy of `(key, value)` expires.
    pub fn key_expires_in(&self, key: &NodeId, value: &[u8]) -> Option<Duration> {
        self.inner
            .datastore
            .lock()
            .expire_time(key, value)
            .map(|at| at.saturating_duration_since(std::time::Instant::now()))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_joined(&self) -> Result<()> {
        if self.is_joined() {
            Ok(())
        } else {
            Err(KadError::NotJoined)
        }
    }

    fn sign_value(&self, value: Vec<u8>) -> SignedValue {
        let signature = self.inner.securifier.sign(&value);
        SignedValue { value, signature }
    }

    fn closest_known(&self, target: &NodeId) -> Vec<Contact> {
        self.inner
            .routing_table
            .lock()
            .find_close_nodes(target, K, &[])
    }

    /// Run a find-node lookup against `key` and return the k closest.
    async fn converge(&self, key: &NodeId) -> Result<Vec<Contact>> {
        let seeds = self.closest_known(key);
        let outcome = self
            .inner
            .engine
            .run(*key, LookupMode::FindNode, seeds)
            .await?;
        self.inner.routing_table.lock().touch_bucket(key);
        match outcome {
            LookupOutcome::Nodes {
                contacts, downed, ..
            } => {
                self.report_downlist(&contacts, downed).await;
                Ok(contacts)
            }
            LookupOutcome::Values { .. } => Ok(Vec::new()),
        }
    }

    /// Tell the closest live peers which contacts went down during a
    /// lookup, so they can verify and evict too.
    async fn report_downlist(&self, live: &[Contact], downed: Vec<Contact>) {
        if downed.is_empty() || live.is_empty() {
            return;
        }
        let ids: Vec<NodeId> = downed.iter().map(|c| c.node_id).collect();
        for peer in live.iter().take(crate::ALPHA) {
            self.inner.rpcs.downlist(ids.clone(), peer).await;
        }
    }

    fn start_background_tasks(&self) {
        let mut tasks = self.inner.tasks.lock();

        // Expiry sweep.
        let node = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                node.inner.datastore.lock().delete_expired();
            }
        }));

        // Bucket refresh: provoke lookups into stale buckets.
        let node = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(MEAN_REFRESH_INTERVAL / 4);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                node.refresh_stale_buckets().await;
            }
        }));

        // Data refresh: re-assert held values, propagate deletions.
        let node = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(MEAN_REFRESH_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                node.refresh_stored_values().await;
            }
        }));

        // Downlist drain: verify reported-dead peers with pings.
        let node = self.clone();
        let rx = self.inner.downlist_rx.lock().take();
        if let Some(mut rx) = rx {
            tasks.push(tokio::spawn(async move {
                while let Some(contact) = rx.recv().await {
                    match node.inner.rpcs.ping(&contact).await {
                        Ok(_) => debug!(peer = %contact.node_id, "downlisted peer is alive"),
                        Err(_) => {
                            // The failed ping already counted against the
                            // contact's tolerance inside the RPC client.
                            debug!(peer = %contact.node_id, "downlisted peer unresponsive");
                        }
                    }
                }
            }));
        }
    }

    /// One pass of the bucket refresh loop.
    async fn refresh_stale_buckets(&self) {
        let targets = {
            let table = self.inner.routing_table.lock();
            let mut rng = self.inner.rng.lock();
            table.refresh_targets(0, false, &mut *rng)
        };
        for target in targets {
            let seeds = self.closest_known(&target);
            if seeds.is_empty() {
                continue;
            }
            if let Err(e) = self.inner.engine.run(target, LookupMode::FindNode, seeds).await {
                debug!(probe = %target, error = %e, "bucket refresh lookup failed");
            }
            self.inner.routing_table.lock().touch_bucket(&target);
        }
    }

    /// One pass of the data refresh loop.
    async fn refresh_stored_values(&self) {
        let entries = self.inner.datastore.lock().key_values();
        for entry in entries {
            if entry.marked_deleted {
                let Some(proof) = entry.deletion_request.clone() else {
                    continue;
                };
                if entry.since_refresh <= MEAN_REFRESH_INTERVAL {
                    continue;
                }
                match self.converge(&entry.key).await {
                    Ok(contacts) => {
                        for peer in &contacts {
                            if let Err(e) =
                                self.inner.rpcs.delete_refresh(proof.clone(), peer).await
                            {
                                debug!(peer = %peer.node_id, error = %e, "delete refresh failed");
                            }
                        }
                    }
                    Err(e) => warn!(key = %entry.key, error = %e, "delete refresh lookup failed"),
                }
                continue;
            }

            let signed_value = SignedValue {
                value: entry.value.clone(),
                signature: entry.signature.clone(),
            };
            let republish = entry.since_publish > REPUBLISH_INTERVAL;
            if !republish && entry.since_refresh <= MEAN_REFRESH_INTERVAL {
                continue;
            }
            match self.converge(&entry.key).await {
                Ok(contacts) => {
                    for peer in &contacts {
                        let sent = if republish {
                            self.inner
                                .rpcs
                                .store(&entry.key, &signed_value, peer, entry.ttl, true)
                                .await
                        } else {
                            self.inner
                                .rpcs
                                .store_refresh(&entry.key, &signed_value, peer)
                                .await
                        };
                        if let Err(e) = sent {
                            debug!(peer = %peer.node_id, error = %e, "value refresh failed");
                        }
                    }
                    let _ = self
                        .inner
                        .datastore
                        .lock()
                        .refresh(&entry.key, &entry.value);
                }
                Err(e) => warn!(key = %entry.key, error = %e, "value refresh lookup failed"),
            }
        }
    }
}

/// Run every attempt concurrently and count the successes.
async fn parallel_successes<F>(attempts: Vec<F>) -> usize
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let mut set = tokio::task::JoinSet::new();
    for attempt in attempts {
        set.spawn(attempt);
    }
    let mut successes = 0usize;
    while let Some(joined) = set.join_next().await {
        if matches!(joined, Ok(Ok(()))) {
            successes += 1;
        }
    }
    successes
}

/// Check an operation's success ratio against its quorum.
fn quorum(successes: usize, attempted: usize, ratio: f64) -> Result<()> {
    if attempted == 0 || (successes as f64) / (attempted as f64) >= ratio {
        Ok(())
    } else {
        Err(KadError::QuorumNotReached {
            successes,
            attempted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_thresholds() {
        assert!(quorum(3, 4, 0.75).is_ok());
        assert!(quorum(4, 4, 0.75).is_ok());
        assert!(quorum(2, 4, 0.75).is_err());
        assert!(quorum(0, 0, 0.75).is_ok());
        match quorum(1, 4, 0.75) {
            Err(KadError::QuorumNotReached {
                successes,
                attempted,
            }) => {
                assert_eq!(successes, 1);
                assert_eq!(attempted, 4);
            }
            other => unreachable!("expected quorum failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parallel_successes_counts_only_ok() {
        let attempts: Vec<_> = (0..4)
            .map(|i| async move {
                if i % 2 == 0 {
                    Ok(())
                } else {
                    Err(KadError::KeyNotFound)
                }
            })
            .collect();
        assert_eq!(parallel_successes(attempts).await, 2);
    }
}
