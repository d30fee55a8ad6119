//! The per-node value store: key to signed values, with TTL expiry,
//! refresh bookkeeping, and soft deletion.
//!
//! A key normally admits multiple values. The exception is a *hashable*
//! key, one equal to the digest of its single value and signature; such a
//! key admits exactly one value and refuses mutation, giving
//! content-addressed entries immutable semantics.
//!
//! Deletion is soft: a deleted tuple stays in the store, carrying the
//! serialized deletion request as proof, until TTL purge. A re-store or
//! refresh of the tuple is answered with that proof so the caller can
//! propagate the deletion instead of resurrecting the value.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use korium_types::NodeId;

use crate::{KadError, Result};

/// Outcome of refreshing an existing `(key, value)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresh time was advanced.
    Refreshed,
    /// The tuple is soft-deleted; the stored deletion request is returned
    /// unchanged for the caller to propagate.
    MarkedDeleted(Vec<u8>),
}

/// A value stored under a key, for republishing by the owner.
#[derive(Clone, Debug)]
pub struct StoredEntry {
    /// The key the value is stored under.
    pub key: NodeId,
    /// The value bytes.
    pub value: Vec<u8>,
    /// The publisher's signature over the value.
    pub signature: Vec<u8>,
    /// Whether the entry is soft-deleted.
    pub marked_deleted: bool,
    /// The deletion proof, when soft-deleted.
    pub deletion_request: Option<Vec<u8>>,
    /// How long since the entry was last refreshed.
    pub since_refresh: Duration,
    /// How long since the entry was last published.
    pub since_publish: Duration,
    /// The TTL the entry was published with.
    pub ttl: Duration,
}

#[derive(Clone, Debug)]
struct StoredValue {
    value: Vec<u8>,
    signature: Vec<u8>,
    signer_id: Vec<u8>,
    publish_time: Instant,
    expire_time: Instant,
    refresh_time: Instant,
    ttl: Duration,
    hashable: bool,
    marked_deleted: bool,
    deletion_request: Option<Vec<u8>>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expire_time
    }

    fn is_live(&self, now: Instant) -> bool {
        !self.is_expired(now) && !self.marked_deleted
    }
}

/// The keyed multi-value store owned by a node.
pub struct DataStore {
    entries: HashMap<NodeId, Vec<StoredValue>>,
}

impl DataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store a value under a key.
    ///
    /// An identical `(value, signature)` already present and not deleted is
    /// an idempotent success; a publish additionally restarts its clock.
    /// A tuple marked for deletion is refused with its deletion proof. For
    /// a hashable key any differing value is a conflict.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &mut self,
        key: NodeId,
        value: Vec<u8>,
        signature: Vec<u8>,
        signer_id: Vec<u8>,
        ttl: Duration,
        is_publish: bool,
        is_hashable: bool,
    ) -> Result<()> {
        let now = Instant::now();
        let values = self.entries.entry(key).or_default();
        values.retain(|v| !v.is_expired(now));

        if let Some(existing) = values.iter_mut().find(|v| v.value == value) {
            if existing.marked_deleted {
                return Err(KadError::MarkedForDeletion {
                    deletion_request: existing.deletion_request.clone().unwrap_or_default(),
                });
            }
            existing.refresh_time = now;
            if is_publish {
                existing.publish_time = now;
                existing.expire_time = now + ttl;
                existing.ttl = ttl;
                existing.signature = signature;
                existing.signer_id = signer_id;
            }
            return Ok(());
        }

        if is_hashable && !values.is_empty() {
            return Err(KadError::HashableKeyConflict);
        }
        if let Some(held) = values.iter().find(|v| v.hashable) {
            // The key already holds a hashable value; nothing else may join.
            debug!(key = %key, publisher = hex::encode(&held.signer_id), "hashable key conflict");
            return Err(KadError::HashableKeyConflict);
        }

        values.push(StoredValue {
            value,
            signature,
            signer_id,
            publish_time: now,
            expire_time: now + ttl,
            refresh_time: now,
            ttl,
            hashable: is_hashable,
            marked_deleted: false,
            deletion_request: None,
        });
        Ok(())
    }

    /// Advance the refresh time of an existing `(key, value)`.
    ///
    /// The TTL clock is untouched; only republishing extends an entry's
    /// life. A soft-deleted tuple yields its deletion proof instead.
    pub fn refresh(&mut self, key: &NodeId, value: &[u8]) -> Result<RefreshOutcome> {
        let now = Instant::now();
        let values = self.entries.get_mut(key).ok_or(KadError::KeyNotFound)?;
        let entry = values
            .iter_mut()
            .find(|v| v.value == value && !v.is_expired(now))
            .ok_or(KadError::KeyNotFound)?;
        if entry.marked_deleted {
            return Ok(RefreshOutcome::MarkedDeleted(
                entry.deletion_request.clone().unwrap_or_default(),
            ));
        }
        entry.refresh_time = now;
        Ok(RefreshOutcome::Refreshed)
    }

    /// Soft-delete a `(key, value)`, retaining the serialized deletion
    /// request as proof until TTL purge.
    ///
    /// Returns false when the tuple is not present.
    pub fn mark_for_deletion(
        &mut self,
        key: &NodeId,
        value: &[u8],
        serialized_request: Vec<u8>,
    ) -> bool {
        let now = Instant::now();
        let Some(values) = self.entries.get_mut(key) else {
            return false;
        };
        let Some(entry) = values
            .iter_mut()
            .find(|v| v.value == value && !v.is_expired(now))
        else {
            return false;
        };
        entry.marked_deleted = true;
        entry.deletion_request = Some(serialized_request);
        entry.refresh_time = now;
        true
    }

    /// Replace `old_value` under `key` with a new signed value.
    ///
    /// The old value must be present and live. When the new value is
    /// hashable the key must end up single-valued.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        key: &NodeId,
        old_value: &[u8],
        new_value: Vec<u8>,
        new_signature: Vec<u8>,
        signer_id: Vec<u8>,
        ttl: Duration,
        is_hashable: bool,
    ) -> Result<()> {
        let now = Instant::now();
        let values = self.entries.get_mut(key).ok_or(KadError::KeyNotFound)?;

        let old_index = values
            .iter()
            .position(|v| v.value == old_value && v.is_live(now))
            .ok_or(KadError::KeyNotFound)?;

        if values
            .iter()
            .enumerate()
            .any(|(i, v)| i != old_index && v.value == new_value && !v.is_expired(now))
        {
            return Err(KadError::Rejected);
        }
        if is_hashable && values.iter().enumerate().any(|(i, v)| i != old_index && v.is_live(now))
        {
            return Err(KadError::HashableKeyConflict);
        }

        values[old_index] = StoredValue {
            value: new_value,
            signature: new_signature,
            signer_id,
            publish_time: now,
            expire_time: now + ttl,
            refresh_time: now,
            ttl,
            hashable: is_hashable,
            marked_deleted: false,
            deletion_request: None,
        };
        Ok(())
    }

    /// All live `(value, signature)` pairs under a key.
    pub fn load(&self, key: &NodeId) -> Vec<(Vec<u8>, Vec<u8>)> {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .filter(|v| v.is_live(now))
                    .map(|v| (v.value.clone(), v.signature.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All live `(value, hashable)` pairs under a key.
    pub fn load_attr(&self, key: &NodeId) -> Vec<(Vec<u8>, bool)> {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .filter(|v| v.is_live(now))
                    .map(|v| (v.value.clone(), v.hashable))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a key currently holds any live value.
    pub fn has_key(&self, key: &NodeId) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|values| values.iter().any(|v| v.is_live(now)))
    }

    /// Purge expired values (deleted tombstones included once their TTL
    /// runs out). Returns the number of values removed.
    pub fn delete_expired(&mut self) -> usize {
        let now = Instant::now();
        let before: usize = self.entries.values().map(Vec::len).sum();
        for values in self.entries.values_mut() {
            values.retain(|v| !v.is_expired(now));
        }
        self.entries.retain(|_, values| !values.is_empty());
        let removed = before - self.entries.values().map(Vec::len).sum::<usize>();
        if removed > 0 {
            debug!(removed, "expired values purged");
        }
        removed
    }

    /// Every unexpired entry, including soft-deleted tombstones, for the
    /// republish loop.
    pub fn key_values(&self) -> Vec<StoredEntry> {
        let now = Instant::now();
        self.entries
            .iter()
            .flat_map(|(key, values)| {
                values
                    .iter()
                    .filter(move |v| !v.is_expired(now))
                    .map(move |v| StoredEntry {
                        key: *key,
                        value: v.value.clone(),
                        signature: v.signature.clone(),
                        marked_deleted: v.marked_deleted,
                        deletion_request: v.deletion_request.clone(),
                        since_refresh: now.duration_since(v.refresh_time),
                        since_publish: now.duration_since(v.publish_time),
                        ttl: v.ttl,
                    })
            })
            .collect()
    }

    /// When the `(key, value)` was last refreshed.
    pub fn last_refresh_time(&self, key: &NodeId, value: &[u8]) -> Option<Instant> {
        self.entries
            .get(key)?
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.refresh_time)
    }

    /// When the `(key, value)` expires.
    pub fn expire_time(&self, key: &NodeId, value: &[u8]) -> Option<Instant> {
        self.entries
            .get(key)?
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.expire_time)
    }

    /// Number of live values across all keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .flat_map(|values| values.iter())
            .filter(|v| v.is_live(now))
            .count()
    }

    /// Whether the store holds no live values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys holding at least one live value.
    pub fn keys(&self) -> Vec<NodeId> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, values)| values.iter().any(|v| v.is_live(now)))
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
