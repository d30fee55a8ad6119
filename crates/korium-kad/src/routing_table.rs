//! The Korium routing table: an ordered tiling of the id space into
//! k-buckets with splitting and force-k insertion rules.
//!
//! The table starts with a single bucket covering `[0, 2^512 - 1]`. Only
//! the bucket whose range contains the holder's own id may split; every
//! other full bucket either refuses new contacts or, when the candidate is
//! among the k closest peers overall, evicts a staler, more distant entry
//! in its place (the force-k rule).
//!
//! Within a bucket, entries sit in least-recently-seen order: the front of
//! the deque is the eviction candidate, the back is the freshest peer.
//! Each entry carries a failed-RPC count; reaching the tolerance removes
//! the contact, so stale peers never reach lookups.

use std::collections::VecDeque;
use std::time::Instant;

use rand::Rng;
use tracing::debug;

use korium_types::{Contact, NodeId};

use crate::{FAILED_RPC_TOLERANCE, MEAN_REFRESH_INTERVAL};

/// Result of attempting to add a contact to the routing table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddContactResult {
    /// The contact was inserted.
    Ok,
    /// The contact was already present; it moved to most-recently-seen.
    Duplicate,
    /// The target bucket is full and force-k did not apply.
    BucketFull,
    /// The contact is not storable (own id, client sentinel, invalid).
    Rejected,
}

/// A routing-table entry wrapping a contact with liveness bookkeeping.
#[derive(Clone, Debug)]
struct BucketEntry {
    contact: Contact,
    /// Consecutive failed RPCs; reaching the tolerance evicts the entry.
    failed_rpc_count: u16,
    last_seen: Instant,
}

/// One k-bucket covering the id range `[low, high]`.
#[derive(Clone, Debug)]
struct KBucket {
    low: NodeId,
    high: NodeId,
    /// Entries in last-seen order (front = oldest, back = newest).
    entries: VecDeque<BucketEntry>,
    /// Last time this bucket was used by a lookup or refresh.
    last_accessed: Instant,
}

impl KBucket {
    fn new(low: NodeId, high: NodeId) -> Self {
        Self {
            low,
            high,
            entries: VecDeque::new(),
            last_accessed: Instant::now(),
        }
    }

    fn contains(&self, id: &NodeId) -> bool {
        *id >= self.low && *id <= self.high
    }

    fn find_index(&self, id: &NodeId) -> Option<usize> {
        self.entries.iter().position(|e| e.contact.node_id == *id)
    }

    /// Move an entry to the back and reset its liveness bookkeeping.
    fn touch(&mut self, index: usize) {
        if let Some(mut entry) = self.entries.remove(index) {
            entry.last_seen = Instant::now();
            entry.failed_rpc_count = 0;
            self.entries.push_back(entry);
        }
    }

    fn push(&mut self, contact: Contact) {
        self.entries.push_back(BucketEntry {
            contact,
            failed_rpc_count: 0,
            last_seen: Instant::now(),
        });
    }
}

/// The bucketed view of known peers, owned by one node.
pub struct RoutingTable {
    holder_id: NodeId,
    k: usize,
    /// Non-overlapping buckets ordered by range, tiling the full id space.
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a routing table for the given holder with bucket capacity `k`.
    pub fn new(holder_id: NodeId, k: usize) -> Self {
        Self {
            holder_id,
            k,
            buckets: vec![KBucket::new(NodeId::zero(), NodeId::max())],
        }
    }

    /// The id of the node owning this table.
    pub fn holder_id(&self) -> &NodeId {
        &self.holder_id
    }

    /// The index of the bucket whose range contains `id`.
    fn bucket_index(&self, id: &NodeId) -> usize {
        // Ranges tile the space, so exactly one bucket matches.
        self.buckets
            .iter()
            .position(|b| b.contains(id))
            .unwrap_or(0)
    }

    /// Add a contact, applying the split and force-k rules.
    pub fn add_contact(&mut self, contact: Contact) -> AddContactResult {
        if contact.node_id == self.holder_id || contact.is_client() || !contact.is_valid() {
            return AddContactResult::Rejected;
        }

        loop {
            let idx = self.bucket_index(&contact.node_id);
            let holder_bucket = self.buckets[idx].contains(&self.holder_id);
            let bucket = &mut self.buckets[idx];

            if let Some(i) = bucket.find_index(&contact.node_id) {
                bucket.touch(i);
                return AddContactResult::Duplicate;
            }

            if bucket.entries.len() < self.k {
                bucket.push(contact);
                return AddContactResult::Ok;
            }

            if holder_bucket {
                self.split_bucket(idx);
                continue;
            }

            return self.force_k_insert(contact, idx);
        }
    }

    /// Split bucket `idx` into its two half-ranges and redistribute.
    fn split_bucket(&mut self, idx: usize) {
        let bucket = self.buckets.remove(idx);
        let mid = NodeId::midpoint(&bucket.low, &bucket.high);
        let mut lower = KBucket::new(bucket.low, mid);
        let mut upper = KBucket::new(mid.successor(), bucket.high);
        lower.last_accessed = bucket.last_accessed;
        upper.last_accessed = bucket.last_accessed;

        for entry in bucket.entries {
            if lower.contains(&entry.contact.node_id) {
                lower.entries.push_back(entry);
            } else {
                upper.entries.push_back(entry);
            }
        }

        debug!(
            low = %lower.low,
            mid = %mid,
            high = %upper.high,
            "split bucket"
        );
        self.buckets.insert(idx, upper);
        self.buckets.insert(idx, lower);
    }

    /// Force-k insertion into the full bucket `idx`.
    ///
    /// Applies when the candidate is among the k closest known peers to
    /// the holder: the least-recently-seen entry of the bucket that is
    /// further from the holder than the candidate makes way.
    fn force_k_insert(&mut self, contact: Contact, idx: usize) -> AddContactResult {
        let candidate_distance = contact.node_id ^ self.holder_id;

        let mut distances: Vec<NodeId> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .map(|e| e.contact.node_id ^ self.holder_id)
            .collect();
        distances.sort();
        let kth = match distances.get(self.k - 1) {
            Some(d) => *d,
            None => return AddContactResult::BucketFull,
        };
        if candidate_distance >= kth {
            return AddContactResult::BucketFull;
        }

        let bucket = &mut self.buckets[idx];
        let evict = bucket
            .entries
            .iter()
            .position(|e| (e.contact.node_id ^ self.holder_id) > candidate_distance);
        match evict {
            Some(i) => {
                let evicted = bucket.entries.remove(i);
                if let Some(e) = evicted {
                    debug!(evicted = %e.contact.node_id, "force-k eviction");
                }
                bucket.push(contact);
                AddContactResult::Ok
            }
            None => AddContactResult::BucketFull,
        }
    }

    /// Look up a contact by id.
    pub fn get_contact(&self, id: &NodeId) -> Option<Contact> {
        let bucket = &self.buckets[self.bucket_index(id)];
        bucket
            .find_index(id)
            .and_then(|i| bucket.entries.get(i))
            .map(|e| e.contact.clone())
    }

    /// Remove a contact.
    ///
    /// With `force`, the contact is removed immediately. Otherwise its
    /// failure count is incremented and removal happens only once the
    /// count reaches the tolerance.
    pub fn remove_contact(&mut self, id: &NodeId, force: bool) {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let Some(i) = bucket.find_index(id) else {
            return;
        };
        if force {
            bucket.entries.remove(i);
            return;
        }
        if let Some(entry) = bucket.entries.get_mut(i) {
            entry.failed_rpc_count += 1;
            if entry.failed_rpc_count >= FAILED_RPC_TOLERANCE {
                bucket.entries.remove(i);
            }
        }
    }

    /// Record a failed RPC against a contact.
    ///
    /// Returns the new failure count, or `None` when the contact was
    /// removed (tolerance reached) or is unknown.
    pub fn increment_failed_rpcs(&mut self, id: &NodeId) -> Option<u16> {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let i = bucket.find_index(id)?;
        let entry = bucket.entries.get_mut(i)?;
        entry.failed_rpc_count += 1;
        if entry.failed_rpc_count >= FAILED_RPC_TOLERANCE {
            debug!(contact = %id, "contact evicted after repeated RPC failures");
            bucket.entries.remove(i);
            return None;
        }
        Some(entry.failed_rpc_count)
    }

    /// Up to `count` contacts closest to `target`, excluding `exclude`.
    pub fn find_close_nodes(
        &self,
        target: &NodeId,
        count: usize,
        exclude: &[NodeId],
    ) -> Vec<Contact> {
        let mut all: Vec<(NodeId, &Contact)> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| !exclude.contains(&e.contact.node_id))
            .map(|e| (e.contact.node_id ^ *target, &e.contact))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter()
            .take(count)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Up to `count` contacts furthest from `target`, excluding `exclude`.
    pub fn get_furthest_contacts(
        &self,
        target: &NodeId,
        count: usize,
        exclude: &[NodeId],
    ) -> Vec<Contact> {
        let mut all: Vec<(NodeId, &Contact)> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| !exclude.contains(&e.contact.node_id))
            .map(|e| (e.contact.node_id ^ *target, &e.contact))
            .collect();
        all.sort_by(|a, b| b.0.cmp(&a.0));
        all.into_iter()
            .take(count)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// A random refresh target for every stale bucket at or after
    /// `start_bucket`.
    ///
    /// A bucket is stale when it has not been accessed within the mean
    /// refresh interval, or always when `force` is set.
    pub fn refresh_targets<R: Rng + ?Sized>(
        &self,
        start_bucket: usize,
        force: bool,
        rng: &mut R,
    ) -> Vec<NodeId> {
        let now = Instant::now();
        self.buckets
            .iter()
            .skip(start_bucket)
            .filter(|b| force || now.duration_since(b.last_accessed) > MEAN_REFRESH_INTERVAL)
            .filter_map(|b| NodeId::random_in_range(&b.low, &b.high, rng).ok())
            .collect()
    }

    /// Mark the bucket containing `id` as freshly accessed.
    pub fn touch_bucket(&mut self, id: &NodeId) {
        let idx = self.bucket_index(id);
        self.buckets[idx].last_accessed = Instant::now();
    }

    /// The least-recently-seen contact of bucket `bucket_index`.
    pub fn get_last_seen_contact(&self, bucket_index: usize) -> Option<Contact> {
        self.buckets
            .get(bucket_index)?
            .entries
            .front()
            .map(|e| e.contact.clone())
    }

    /// Remove every contact, keeping the single full-range bucket.
    pub fn clear(&mut self) {
        self.buckets = vec![KBucket::new(NodeId::zero(), NodeId::max())];
    }

    /// Total number of stored contacts.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    /// Number of buckets currently tiling the id space.
    pub fn kbucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The `[low, high]` ranges of all buckets, in order.
    pub fn bucket_ranges(&self) -> Vec<(NodeId, NodeId)> {
        self.buckets.iter().map(|b| (b.low, b.high)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::K;
    use std::net::SocketAddr;

    fn id_from(bytes: &[u8]) -> NodeId {
        let mut raw = [0u8; 64];
        raw[..bytes.len()].copy_from_slice(bytes);
        NodeId::from_bytes(raw)
    }

    fn contact(id: NodeId) -> Contact {
        Contact::new(id, SocketAddr::from(([127, 0, 0, 1], 4433)))
    }

    /// Ids whose top byte is `top`, distinguished by the low byte.
    fn id_at(top: u8, low: u8) -> NodeId {
        let mut raw = [0u8; 64];
        raw[0] = top;
        raw[63] = low;
        NodeId::from_bytes(raw)
    }

    #[test]
    fn test_new_table_is_single_full_range_bucket() {
        let table = RoutingTable::new(NodeId::zero(), K);
        assert_eq!(table.kbucket_count(), 1);
        assert_eq!(table.size(), 0);
        let ranges = table.bucket_ranges();
        assert_eq!(ranges[0], (NodeId::zero(), NodeId::max()));
    }

    #[test]
    fn test_rejects_own_id_and_client() {
        let holder = id_from(&[1]);
        let mut table = RoutingTable::new(holder, K);
        assert_eq!(table.add_contact(contact(holder)), AddContactResult::Rejected);
        assert_eq!(table.add_contact(Contact::client()), AddContactResult::Rejected);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_duplicate_moves_to_most_recently_seen() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        let a = contact(id_at(0x80, 1));
        let b = contact(id_at(0x80, 2));
        assert_eq!(table.add_contact(a.clone()), AddContactResult::Ok);
        assert_eq!(table.add_contact(b), AddContactResult::Ok);
        // Re-adding `a` moves it off the least-recently-seen slot.
        assert_eq!(table.add_contact(a.clone()), AddContactResult::Duplicate);
        assert_eq!(table.size(), 2);
        let idx = table.bucket_index(&a.node_id);
        let lrs = table.get_last_seen_contact(idx).expect("entries");
        assert_ne!(lrs.node_id, a.node_id);
    }

    #[test]
    fn test_holder_bucket_splits_when_full() {
        let holder = id_from(&[0]);
        let mut table = RoutingTable::new(holder, K);
        // Half the contacts near the holder, half far away.
        for i in 0..(K / 2) as u8 {
            assert_eq!(table.add_contact(contact(id_at(0x00, i + 1))), AddContactResult::Ok);
            assert_eq!(table.add_contact(contact(id_at(0x80, i))), AddContactResult::Ok);
        }
        // The single bucket contains the holder, so the (k+1)-th insert
        // splits it; the new contact then lands in the near half-bucket.
        let result = table.add_contact(contact(id_at(0x00, 100)));
        assert_eq!(result, AddContactResult::Ok);
        assert!(table.kbucket_count() > 1);
        assert_eq!(table.size(), K + 1);
    }

    #[test]
    fn test_split_does_not_admit_contact_outside_holder_half() {
        let holder = id_from(&[0]);
        let mut table = RoutingTable::new(holder, K);
        // Every contact in the far half: the split happens, but the far
        // half-bucket inherits all k entries and force-k cannot apply
        // (the candidate is the furthest known peer).
        for i in 0..K as u8 {
            assert_eq!(table.add_contact(contact(id_at(0x80, i))), AddContactResult::Ok);
        }
        let result = table.add_contact(contact(id_at(0x80, K as u8)));
        assert_eq!(result, AddContactResult::BucketFull);
        assert!(table.kbucket_count() > 1);
        assert_eq!(table.size(), K);
    }

    #[test]
    fn test_bucket_ranges_tile_the_space() {
        let holder = id_from(&[0]);
        let mut table = RoutingTable::new(holder, K);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            table.add_contact(contact(NodeId::random(&mut rng)));
        }
        let ranges = table.bucket_ranges();
        assert_eq!(ranges[0].0, NodeId::zero());
        assert_eq!(ranges[ranges.len() - 1].1, NodeId::max());
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1.successor(), pair[1].0, "ranges must be contiguous");
        }
        for (low, high) in &ranges {
            assert!(low <= high);
        }
    }

    #[test]
    fn test_full_far_bucket_rejects_distant_contact() {
        // Holder sits at zero; fill the far half of the space beyond k so
        // its bucket cannot split, then push one more distant contact.
        let holder = id_from(&[0]);
        let mut table = RoutingTable::new(holder, K);
        // Near contacts keep the k-closest set near the holder.
        for i in 1..=K as u8 {
            assert_eq!(
                table.add_contact(contact(id_at(0x00, i))),
                AddContactResult::Ok
            );
        }
        // Far contacts: fill whatever far bucket exists.
        let mut far_added = 0usize;
        let mut rejected = false;
        for i in 0..=255u8 {
            match table.add_contact(contact(id_at(0xFF, i))) {
                AddContactResult::Ok => far_added += 1,
                AddContactResult::BucketFull => {
                    rejected = true;
                    break;
                }
                other => unreachable!("unexpected add result: {other:?}"),
            }
        }
        assert!(rejected, "a full non-holder bucket must reject");
        assert!(far_added >= K);
    }

    #[test]
    fn test_force_k_admits_closer_contact() {
        // Holder in the upper half; the lower-half bucket fills with far
        // contacts, then a contact closer to the holder than all of them
        // forces its way in.
        let holder = id_from(&[0xFF]);
        let mut table = RoutingTable::new(holder, K);
        for i in 1..=K as u8 {
            assert_eq!(
                table.add_contact(contact(id_at(0x00, i))),
                AddContactResult::Ok
            );
        }
        // The single bucket contains the holder, so it splits first; keep
        // inserting low contacts until the low bucket is full and rejects.
        let mut probe = K as u8 + 1;
        let full_low = loop {
            match table.add_contact(contact(id_at(0x00, probe))) {
                AddContactResult::Ok => probe += 1,
                AddContactResult::BucketFull => break id_at(0x00, probe),
                other => unreachable!("unexpected add result: {other:?}"),
            }
        };
        // `full_low` was rejected: it is not among the k closest. A contact
        // in the low half but much closer to the holder is.
        let closer = id_at(0x70, 0);
        assert!(NodeId::closer_to_target(&closer, &full_low, &holder));
        let result = table.add_contact(contact(closer));
        assert_eq!(result, AddContactResult::Ok);
        assert!(table.get_contact(&closer).is_some());
    }

    #[test]
    fn test_failed_rpc_tolerance_evicts() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        let c = contact(id_at(0x80, 1));
        table.add_contact(c.clone());

        assert_eq!(table.increment_failed_rpcs(&c.node_id), Some(1));
        // Second failure reaches the tolerance and evicts.
        assert_eq!(table.increment_failed_rpcs(&c.node_id), None);
        assert!(table.get_contact(&c.node_id).is_none());
        assert_eq!(table.size(), 0);
        assert!(table
            .find_close_nodes(&c.node_id, K, &[])
            .iter()
            .all(|x| x.node_id != c.node_id));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        let c = contact(id_at(0x80, 1));
        table.add_contact(c.clone());
        assert_eq!(table.increment_failed_rpcs(&c.node_id), Some(1));
        // A fresh sighting re-adds the contact, zeroing its count.
        assert_eq!(table.add_contact(c.clone()), AddContactResult::Duplicate);
        assert_eq!(table.increment_failed_rpcs(&c.node_id), Some(1));
    }

    #[test]
    fn test_remove_contact_forced_and_gradual() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        let a = contact(id_at(0x80, 1));
        let b = contact(id_at(0x80, 2));
        table.add_contact(a.clone());
        table.add_contact(b.clone());

        table.remove_contact(&a.node_id, true);
        assert!(table.get_contact(&a.node_id).is_none());

        table.remove_contact(&b.node_id, false);
        assert!(table.get_contact(&b.node_id).is_some());
        table.remove_contact(&b.node_id, false);
        assert!(table.get_contact(&b.node_id).is_none());
    }

    #[test]
    fn test_find_close_nodes_sorted_and_excluding() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        for i in 1..=10u8 {
            table.add_contact(contact(id_at(0, i)));
        }
        let target = id_at(0, 5);
        let close = table.find_close_nodes(&target, 4, &[id_at(0, 5)]);
        assert_eq!(close.len(), 4);
        assert!(close.iter().all(|c| c.node_id != id_at(0, 5)));
        for pair in close.windows(2) {
            assert!(NodeId::closer_to_target(
                &pair[0].node_id,
                &pair[1].node_id,
                &target
            ) || pair[0].node_id ^ target == pair[1].node_id ^ target);
        }
    }

    #[test]
    fn test_get_furthest_contacts() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        for i in 1..=8u8 {
            table.add_contact(contact(id_at(0, i)));
        }
        let target = id_at(0, 1);
        let furthest = table.get_furthest_contacts(&target, 3, &[]);
        assert_eq!(furthest.len(), 3);
        let closest = table.find_close_nodes(&target, 1, &[]);
        assert_ne!(furthest[0].node_id, closest[0].node_id);
    }

    #[test]
    fn test_refresh_targets_forced() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        for i in 0..=K as u8 {
            table.add_contact(contact(id_at(0x80, i)));
        }
        let mut rng = rand::thread_rng();
        let targets = table.refresh_targets(0, true, &mut rng);
        assert_eq!(targets.len(), table.kbucket_count());
        let ranges = table.bucket_ranges();
        for (target, (low, high)) in targets.iter().zip(ranges.iter()) {
            assert!(target >= low && target <= high);
        }
        // Freshly accessed buckets are not stale without force.
        assert!(table.refresh_targets(0, false, &mut rng).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut table = RoutingTable::new(id_from(&[0]), K);
        for i in 1..=5u8 {
            table.add_contact(contact(id_at(0, i)));
        }
        table.clear();
        assert_eq!(table.size(), 0);
        assert_eq!(table.kbucket_count(), 1);
    }

    #[test]
    fn test_get_contact_unknown_is_none() {
        let table = RoutingTable::new(id_from(&[0]), K);
        assert!(table.get_contact(&id_at(1, 1)).is_none());
    }
}
