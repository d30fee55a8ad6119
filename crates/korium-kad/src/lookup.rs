//! The iterative lookup engine: α-parallel, k-bounded convergence on the
//! closest live nodes to a target.
//!
//! A lookup keeps a container of candidate contacts ordered by XOR
//! distance to the target, each in one of four states:
//!
//! ```text
//! new → selected_alpha → (contacted | down)
//! ```
//!
//! Waves of up to α RPCs go to the closest `new` candidates. Responses
//! merge newly learned contacts into the container; errors mark the peer
//! `down` for the rest of the lookup. A new wave launches once β responses
//! of the current round have arrived (or the whole wave has), keeping at
//! most α RPCs in flight. The lookup converges when every candidate closer
//! than the k-th contacted node has been contacted, and delivers the k
//! closest contacted peers.
//!
//! In find-value mode the first value-bearing response short-circuits the
//! iteration. Dropping the [`LookupEngine::run`] future cancels the
//! lookup; responses still in flight land in a closed mailbox and are
//! discarded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use korium_types::{Contact, NodeId};

use crate::rpcs::{FindValueReply, LookupRpc};
use crate::{Result, ALPHA, BETA, K};

/// What a lookup is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupMode {
    /// Converge on the k closest nodes.
    FindNode,
    /// Converge on the k closest nodes, stopping early on a value hit.
    FindValue,
    /// Populate the routing table; the caller only needs liveness.
    Bootstrap,
}

/// Search state of one candidate within a lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeSearchState {
    /// Known but not yet queried.
    New,
    /// Picked for the current wave; an RPC is in flight.
    SelectedAlpha,
    /// Responded successfully. Terminal.
    Contacted,
    /// Failed or timed out. Terminal; never retried in this lookup.
    Down,
}

/// The result of a completed lookup.
#[derive(Clone, Debug)]
pub enum LookupOutcome {
    /// The k closest contacted nodes (find-node, bootstrap, and find-value
    /// misses). `needs_cache_copy` is set on find-value misses only.
    Nodes {
        contacts: Vec<Contact>,
        needs_cache_copy: Option<Contact>,
        /// Peers that failed or timed out during this lookup.
        downed: Vec<Contact>,
    },
    /// A find-value hit.
    Values {
        reply: FindValueReply,
        /// The peer that returned the values.
        holder: Contact,
        /// The closest contacted peer not holding the value.
        needs_cache_copy: Option<Contact>,
    },
}

/// One candidate entry.
#[derive(Clone, Debug)]
struct LookupEntry {
    contact: Contact,
    state: NodeSearchState,
    round: i32,
}

/// The per-lookup candidate container.
///
/// Entries are keyed by XOR distance to the target, which is unique per
/// id, giving the distance-ordered index; a secondary map resolves ids to
/// distances for constant-time state transitions.
pub struct LookupState {
    target: NodeId,
    entries: BTreeMap<NodeId, LookupEntry>,
    by_id: HashMap<NodeId, NodeId>,
    round: i32,
    selected_in_round: usize,
    responded_in_round: usize,
    in_flight: usize,
    calledback: bool,
}

impl LookupState {
    /// Seed the container. The holder's own id is never inserted.
    pub fn new(target: NodeId, seeds: Vec<Contact>, self_id: &NodeId) -> Self {
        let mut state = Self {
            target,
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
            round: 0,
            selected_in_round: 0,
            responded_in_round: 0,
            in_flight: 0,
            calledback: false,
        };
        state.merge(seeds, self_id);
        state
    }

    /// Merge contacts as `new` candidates, ignoring ids already present
    /// in any state, the holder's own id, and unusable contacts.
    pub fn merge(&mut self, contacts: Vec<Contact>, self_id: &NodeId) {
        for contact in contacts {
            if contact.node_id == *self_id || !contact.is_valid() {
                continue;
            }
            if self.by_id.contains_key(&contact.node_id) {
                continue;
            }
            let distance = contact.node_id ^ self.target;
            self.by_id.insert(contact.node_id, distance);
            self.entries.insert(
                distance,
                LookupEntry {
                    contact,
                    state: NodeSearchState::New,
                    round: -1,
                },
            );
        }
        self.truncate_candidates();
    }

    /// Drop `new` candidates beyond the k closest; terminal and in-flight
    /// entries are kept for bookkeeping.
    fn truncate_candidates(&mut self) {
        let excess: Vec<NodeId> = self
            .entries
            .values()
            .filter(|e| e.state == NodeSearchState::New)
            .skip(K)
            .map(|e| e.contact.node_id ^ self.target)
            .collect();
        for distance in excess {
            if let Some(entry) = self.entries.remove(&distance) {
                self.by_id.remove(&entry.contact.node_id);
            }
        }
    }

    /// Distance of the k-th closest contacted entry, once k are contacted.
    fn kth_contacted_distance(&self) -> Option<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == NodeSearchState::Contacted)
            .nth(K - 1)
            .map(|(d, _)| *d)
    }

    /// Distances of `new` candidates still worth querying: those closer
    /// than the k-th contacted node, or all while fewer than k answered.
    fn pending_candidates(&self) -> Vec<NodeId> {
        let bound = self.kth_contacted_distance();
        self.entries
            .iter()
            .filter(|(distance, entry)| {
                entry.state == NodeSearchState::New && bound.map_or(true, |b| **distance < b)
            })
            .map(|(d, _)| *d)
            .collect()
    }

    /// Select the next wave: up to `α − in_flight` of the closest pending
    /// candidates, marked selected for the current round.
    pub fn select_wave(&mut self) -> Vec<Contact> {
        let capacity = ALPHA.saturating_sub(self.in_flight);
        let picked: Vec<NodeId> = self.pending_candidates().into_iter().take(capacity).collect();
        let mut selected = Vec::with_capacity(picked.len());
        for distance in picked {
            if let Some(entry) = self.entries.get_mut(&distance) {
                entry.state = NodeSearchState::SelectedAlpha;
                entry.round = self.round;
                self.in_flight += 1;
                self.selected_in_round += 1;
                selected.push(entry.contact.clone());
            }
        }
        selected
    }

    /// Apply a terminal state for a candidate. Returns false when the id
    /// is unknown or already terminal (late or duplicate events).
    pub fn mark_terminal(&mut self, id: &NodeId, state: NodeSearchState) -> bool {
        let Some(distance) = self.by_id.get(id) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(distance) else {
            return false;
        };
        if entry.state != NodeSearchState::SelectedAlpha {
            return false;
        }
        let round = entry.round;
        entry.state = state;
        self.in_flight -= 1;
        if round == self.round {
            self.responded_in_round += 1;
        }
        true
    }

    /// Whether enough of the current round has answered to launch the
    /// next wave: β responses in, or the whole wave terminal.
    pub fn round_satisfied(&self) -> bool {
        if self.in_flight == 0 {
            return true;
        }
        self.responded_in_round >= BETA.min(self.selected_in_round)
    }

    /// Start the next round.
    pub fn advance_round(&mut self) {
        self.round += 1;
        self.selected_in_round = 0;
        self.responded_in_round = 0;
    }

    /// Whether the lookup can stop: nothing in flight and no candidate
    /// closer than the k-th contacted node remains unqueried.
    pub fn is_converged(&self) -> bool {
        self.in_flight == 0 && self.pending_candidates().is_empty()
    }

    /// The k closest contacted contacts, by distance.
    pub fn closest_contacted(&self) -> Vec<Contact> {
        self.entries
            .values()
            .filter(|e| e.state == NodeSearchState::Contacted)
            .take(K)
            .map(|e| e.contact.clone())
            .collect()
    }

    /// Every contact marked down during this lookup.
    pub fn downed_contacts(&self) -> Vec<Contact> {
        self.entries
            .values()
            .filter(|e| e.state == NodeSearchState::Down)
            .map(|e| e.contact.clone())
            .collect()
    }

    /// The current round number.
    pub fn round(&self) -> i32 {
        self.round
    }

    /// Number of RPCs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Search state of a candidate, if known.
    pub fn state_of(&self, id: &NodeId) -> Option<NodeSearchState> {
        let distance = self.by_id.get(id)?;
        self.entries.get(distance).map(|e| e.state)
    }

    /// Whether the lookup result has been delivered.
    pub fn calledback(&self) -> bool {
        self.calledback
    }
}

/// A terminal RPC event flowing into the engine mailbox.
enum LookupEvent {
    Response {
        from: Contact,
        closer: Vec<Contact>,
        values: Option<FindValueReply>,
    },
    Failed {
        from: Contact,
    },
}

/// Runs iterative lookups over an RPC client.
pub struct LookupEngine<R: LookupRpc + 'static> {
    rpcs: Arc<R>,
    self_id: NodeId,
}

impl<R: LookupRpc + 'static> LookupEngine<R> {
    /// Create an engine issuing RPCs as `self_id`.
    pub fn new(rpcs: Arc<R>, self_id: NodeId) -> Self {
        Self { rpcs, self_id }
    }

    /// Run one lookup to completion.
    ///
    /// `seeds` are the closest contacts the local routing table knows.
    /// Delivers the k closest contacted peers, or the values on a
    /// find-value hit. An empty seed set yields an empty node list.
    pub async fn run(
        &self,
        target: NodeId,
        mode: LookupMode,
        seeds: Vec<Contact>,
    ) -> Result<LookupOutcome> {
        let state = Arc::new(Mutex::new(LookupState::new(target, seeds, &self.self_id)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let mut st = state.lock();
            let wave = st.select_wave();
            if wave.is_empty() {
                st.calledback = true;
                return Ok(LookupOutcome::Nodes {
                    contacts: Vec::new(),
                    needs_cache_copy: None,
                    downed: Vec::new(),
                });
            }
            self.dispatch(&wave, target, mode, &tx);
        }

        while let Some(event) = rx.recv().await {
            let mut st = state.lock();
            if st.calledback() {
                break;
            }

            match event {
                LookupEvent::Response {
                    from,
                    closer,
                    values,
                } => {
                    if !st.mark_terminal(&from.node_id, NodeSearchState::Contacted) {
                        continue;
                    }
                    if mode == LookupMode::FindValue {
                        if let Some(reply) = values {
                            if reply.has_values() {
                                st.calledback = true;
                                let cache = st
                                    .closest_contacted()
                                    .into_iter()
                                    .find(|c| c.node_id != from.node_id);
                                debug!(key = %target, holder = %from.node_id, "value found");
                                return Ok(LookupOutcome::Values {
                                    reply,
                                    holder: from,
                                    needs_cache_copy: cache,
                                });
                            }
                        }
                    }
                    st.merge(closer, &self.self_id);
                }
                LookupEvent::Failed { from } => {
                    st.mark_terminal(&from.node_id, NodeSearchState::Down);
                }
            }

            if st.is_converged() {
                break;
            }
            if st.round_satisfied() {
                st.advance_round();
                let wave = st.select_wave();
                if wave.is_empty() && st.in_flight() == 0 {
                    break;
                }
                self.dispatch(&wave, target, mode, &tx);
            }
        }

        let mut st = state.lock();
        st.calledback = true;
        let contacts = st.closest_contacted();
        trace!(key = %target, round = st.round(), found = contacts.len(), "lookup complete");
        let needs_cache_copy = if mode == LookupMode::FindValue {
            contacts.first().cloned()
        } else {
            None
        };
        Ok(LookupOutcome::Nodes {
            contacts,
            needs_cache_copy,
            downed: st.downed_contacts(),
        })
    }

    /// Spawn one RPC task per selected contact.
    fn dispatch(
        &self,
        wave: &[Contact],
        target: NodeId,
        mode: LookupMode,
        tx: &mpsc::UnboundedSender<LookupEvent>,
    ) {
        for contact in wave {
            let rpcs = Arc::clone(&self.rpcs);
            let contact = contact.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let event = match mode {
                    LookupMode::FindValue => match rpcs.find_value(&contact, &target).await {
                        Ok(reply) => LookupEvent::Response {
                            from: contact,
                            closer: reply.closest_nodes.clone(),
                            values: Some(reply),
                        },
                        Err(_) => LookupEvent::Failed { from: contact },
                    },
                    LookupMode::FindNode | LookupMode::Bootstrap => {
                        match rpcs.find_nodes(&contact, &target).await {
                            Ok(contacts) => LookupEvent::Response {
                                from: contact,
                                closer: contacts,
                                values: None,
                            },
                            Err(_) => LookupEvent::Failed { from: contact },
                        }
                    }
                };
                // A closed mailbox means the lookup already completed or
                // was cancelled; the late event is discarded.
                let _ = tx.send(event);
            });
        }
    }
}
