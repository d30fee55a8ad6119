//! # korium-kad
//!
//! The Kademlia core of the Korium DHT:
//!
//! - [`routing_table`] — bucketed peer table with splitting and force-k rules
//! - [`datastore`] — signed-value store with TTL, refresh, and soft deletion
//! - [`lookup`] — the α-parallel, k-bounded iterative lookup engine
//! - [`rpcs`] — one-shot RPC client, one method per protocol verb
//! - [`service`] — inbound request handling
//! - [`node`] — the node facade: join, store, delete, update, find, timers
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Key width | 512 bits |
//! | K (bucket capacity, replication) | 16 |
//! | alpha (lookup parallelism) | 3 |
//! | beta (responses per round) | 2 |
//! | Failed-RPC tolerance | 2 |
//! | Store/delete/update quorum | 0.75 |
//! | Mean bucket refresh interval | 1800 s |
//! | Value republish interval | 24 h |

use std::time::Duration;

pub mod datastore;
pub mod lookup;
pub mod node;
pub mod routing_table;
pub mod rpcs;
pub mod service;

use korium_transport::TransportCode;

/// Bucket capacity and replication factor.
pub const K: usize = 16;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Minimum responses per lookup round before the next wave.
pub const BETA: usize = 2;

/// Failed RPCs tolerated before a contact is removed from the routing table.
pub const FAILED_RPC_TOLERANCE: u16 = 2;

/// Ratio of successful store RPCs required for an overall success.
pub const MIN_SUCCESSFUL_STORE_RATIO: f64 = 0.75;

/// Ratio of successful delete RPCs required for an overall success.
pub const MIN_SUCCESSFUL_DELETE_RATIO: f64 = 0.75;

/// Ratio of successful update RPCs required for an overall success.
pub const MIN_SUCCESSFUL_UPDATE_RATIO: f64 = 0.75;

/// Mean time between bucket refreshes.
pub const MEAN_REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

/// Cadence at which a node republishes the values it stores.
pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(86_400);

/// Cadence of the expired-entry sweep.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A local store consulted before the DHT's own data store.
///
/// Nodes holding content outside the DHT (a file cache, a blob store)
/// answer find-value requests for those keys by nominating themselves as
/// the alternative value holder.
pub trait AlternativeStore: Send + Sync {
    /// Whether this store can serve the given key.
    fn has_key(&self, key: &[u8]) -> bool;
}

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum KadError {
    /// A transport-level failure terminated an RPC.
    #[error("transport error: {0}")]
    Transport(#[from] korium_transport::TransportError),

    /// The peer answered with a different verb than the request.
    #[error("unexpected response type {got:#06x}")]
    UnexpectedResponse { got: u16 },

    /// The peer rejected the request (`result = false` in the response).
    #[error("request rejected by peer")]
    Rejected,

    /// A request signature failed validation.
    #[error("invalid signature")]
    InvalidSignature,

    /// The requested key holds no live value.
    #[error("key not found")]
    KeyNotFound,

    /// A store would violate the single-value rule of a hashable key.
    #[error("hashable key already holds a different value")]
    HashableKeyConflict,

    /// The tuple is marked for deletion; the proof is attached.
    #[error("value is marked for deletion")]
    MarkedForDeletion {
        /// The serialized deletion request held as proof.
        deletion_request: Vec<u8>,
    },

    /// Too few replicas accepted a store, delete, or update.
    #[error("quorum not reached: {successes} of {attempted} peers accepted")]
    QuorumNotReached { successes: usize, attempted: usize },

    /// The node has not joined a network.
    #[error("node is not joined")]
    NotJoined,

    /// Bootstrap produced no live seed.
    #[error("join failed: {0}")]
    JoinFailed(String),

    /// The lookup was cancelled before completion.
    #[error("lookup cancelled")]
    LookupCancelled,

    /// An id or contact was malformed.
    #[error(transparent)]
    Types(#[from] korium_types::TypesError),
}

impl KadError {
    /// The transport condition code behind this error, if any.
    pub fn transport_code(&self) -> Option<TransportCode> {
        match self {
            KadError::Transport(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, KadError>;
