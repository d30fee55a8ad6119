//! All message payload structs for the Korium wire protocol.
//!
//! Each protocol verb has a request/response pair here, serialized to CBOR
//! for inclusion in [`WireMessage`](crate::wire::WireMessage) envelopes.
//! Every request carries the sender's [`Contact`] so the receiving service
//! can feed its routing table; every response carries the responder's
//! node id.

use serde::{Deserialize, Serialize};

use korium_types::{Contact, NodeId};

// ---------------------------------------------------------------------------
// Message type constants
// ---------------------------------------------------------------------------

/// Message type for a ping request (0x0001).
pub const MSG_PING_REQUEST: u16 = 0x0001;
/// Message type for a ping response (0x0002).
pub const MSG_PING_RESPONSE: u16 = 0x0002;
/// Message type for a find-nodes request (0x0003).
pub const MSG_FIND_NODES_REQUEST: u16 = 0x0003;
/// Message type for a find-nodes response (0x0004).
pub const MSG_FIND_NODES_RESPONSE: u16 = 0x0004;
/// Message type for a find-value request (0x0005).
pub const MSG_FIND_VALUE_REQUEST: u16 = 0x0005;
/// Message type for a find-value response (0x0006).
pub const MSG_FIND_VALUE_RESPONSE: u16 = 0x0006;
/// Message type for a store request (0x0007).
pub const MSG_STORE_REQUEST: u16 = 0x0007;
/// Message type for a store response (0x0008).
pub const MSG_STORE_RESPONSE: u16 = 0x0008;
/// Message type for a store-refresh request (0x0009).
pub const MSG_STORE_REFRESH_REQUEST: u16 = 0x0009;
/// Message type for a store-refresh response (0x000A).
pub const MSG_STORE_REFRESH_RESPONSE: u16 = 0x000A;
/// Message type for a delete request (0x000B).
pub const MSG_DELETE_REQUEST: u16 = 0x000B;
/// Message type for a delete response (0x000C).
pub const MSG_DELETE_RESPONSE: u16 = 0x000C;
/// Message type for a delete-refresh request (0x000D).
pub const MSG_DELETE_REFRESH_REQUEST: u16 = 0x000D;
/// Message type for a delete-refresh response (0x000E).
pub const MSG_DELETE_REFRESH_RESPONSE: u16 = 0x000E;
/// Message type for an update request (0x000F).
pub const MSG_UPDATE_REQUEST: u16 = 0x000F;
/// Message type for an update response (0x0010).
pub const MSG_UPDATE_RESPONSE: u16 = 0x0010;
/// Message type for a downlist notification (0x0011).
pub const MSG_DOWNLIST_NOTIFICATION: u16 = 0x0011;

// ---------------------------------------------------------------------------
// Shared value and signature blocks
// ---------------------------------------------------------------------------

/// A value and the publisher's signature over it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedValue {
    /// The opaque value bytes.
    pub value: Vec<u8>,
    /// The publisher's signature over `value`.
    pub signature: Vec<u8>,
}

/// The signature block attached to store, delete, and update requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignature {
    /// The id under which the signer publishes.
    pub signer_id: Vec<u8>,
    /// The signer's public key.
    pub public_key: Vec<u8>,
    /// The signer's signature over its own public key.
    pub signed_public_key: Vec<u8>,
    /// The signature over the request payload.
    pub payload_signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// 0x0001-0x0002 Ping
// ---------------------------------------------------------------------------

/// Ping request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingRequest {
    /// The echo string; a well-formed request carries `"ping"`.
    pub ping: String,
    /// The requesting contact.
    pub sender: Contact,
}

/// Ping response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingResponse {
    /// Whether the request was accepted.
    pub result: bool,
    /// The echo reply, `"pong"` on success.
    pub echo: String,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x0003-0x0004 FindNodes
// ---------------------------------------------------------------------------

/// Find-nodes request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodesRequest {
    /// The lookup target.
    pub key: NodeId,
    /// The requesting contact.
    pub sender: Contact,
}

/// Find-nodes response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodesResponse {
    /// Whether the request was accepted.
    pub result: bool,
    /// Up to `k` contacts closest to the requested key.
    pub closest_nodes: Vec<Contact>,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x0005-0x0006 FindValue
// ---------------------------------------------------------------------------

/// Find-value request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindValueRequest {
    /// The key to look up.
    pub key: NodeId,
    /// The requesting contact.
    pub sender: Contact,
}

/// Find-value response payload.
///
/// A value hit fills `values` and `signed_values`; a miss falls through to
/// find-nodes behavior and fills `closest_nodes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindValueResponse {
    /// Whether the request was accepted.
    pub result: bool,
    /// The raw stored values, when the key was found.
    pub values: Vec<Vec<u8>>,
    /// The stored values with their publisher signatures.
    pub signed_values: Vec<SignedValue>,
    /// Closest nodes, when the key was not found locally.
    pub closest_nodes: Vec<Contact>,
    /// A node holding the key in its alternative store, if any.
    pub alternative_value_holder: Option<Contact>,
    /// The contact nominated to receive a cache copy of the values.
    pub needs_cache_copy: Option<Contact>,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x0007-0x000A Store / StoreRefresh
// ---------------------------------------------------------------------------

/// Store request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreRequest {
    /// The key under which to store.
    pub key: NodeId,
    /// The value and its publisher signature.
    pub signed_value: SignedValue,
    /// Time-to-live in seconds.
    pub ttl_secs: u64,
    /// True for an original publish, false for a replication copy.
    pub publish: bool,
    /// The request signature block.
    pub request_signature: RequestSignature,
    /// The requesting contact.
    pub sender: Contact,
}

/// Store response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    /// Whether the value was stored.
    pub result: bool,
    /// The responder's node id.
    pub node_id: NodeId,
}

/// Store-refresh request payload: re-asserts an existing `(key, value)`
/// without re-sending a publish.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreRefreshRequest {
    /// The key being refreshed.
    pub key: NodeId,
    /// The value and signature being refreshed.
    pub signed_value: SignedValue,
    /// The request signature block.
    pub request_signature: RequestSignature,
    /// The requesting contact.
    pub sender: Contact,
}

/// Store-refresh response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreRefreshResponse {
    /// Whether the refresh was accepted.
    pub result: bool,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x000B-0x000E Delete / DeleteRefresh
// ---------------------------------------------------------------------------

/// Delete request payload: a signed soft-delete of one `(key, value)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// The key to delete from.
    pub key: NodeId,
    /// The value to delete and its publisher signature.
    pub signed_value: SignedValue,
    /// The request signature block.
    pub request_signature: RequestSignature,
    /// The requesting contact.
    pub sender: Contact,
}

/// Delete response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Whether the delete was accepted.
    pub result: bool,
    /// The responder's node id.
    pub node_id: NodeId,
}

/// Delete-refresh request payload.
///
/// Carries the original serialized [`DeleteRequest`] so any receiver can
/// re-validate the deletion proof without trusting the refresher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteRefreshRequest {
    /// CBOR bytes of the original delete request.
    pub serialized_request: Vec<u8>,
    /// The requesting contact.
    pub sender: Contact,
}

/// Delete-refresh response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteRefreshResponse {
    /// Whether the refresh was accepted.
    pub result: bool,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x000F-0x0010 Update
// ---------------------------------------------------------------------------

/// Update request payload: replace an existing value under a key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// The key being updated.
    pub key: NodeId,
    /// The replacement value and its signature.
    pub new_signed_value: SignedValue,
    /// The currently stored value being replaced.
    pub old_signed_value: SignedValue,
    /// Time-to-live for the new value, in seconds.
    pub ttl_secs: u64,
    /// The request signature block.
    pub request_signature: RequestSignature,
    /// The requesting contact.
    pub sender: Contact,
}

/// Update response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Whether the update was applied.
    pub result: bool,
    /// The responder's node id.
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// 0x0011 Downlist
// ---------------------------------------------------------------------------

/// Downlist notification payload: ids the sender observed as unresponsive.
///
/// Fire-and-forget; receivers verify liveness themselves before evicting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownlistNotification {
    /// The presumed-dead node ids.
    pub node_ids: Vec<NodeId>,
    /// The reporting contact.
    pub sender: Contact,
}

// ---------------------------------------------------------------------------
// Typed message wrapper
// ---------------------------------------------------------------------------

/// A decoded protocol message of any type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TypedMessage {
    PingRequest(PingRequest),
    PingResponse(PingResponse),
    FindNodesRequest(FindNodesRequest),
    FindNodesResponse(FindNodesResponse),
    FindValueRequest(FindValueRequest),
    FindValueResponse(FindValueResponse),
    StoreRequest(StoreRequest),
    StoreResponse(StoreResponse),
    StoreRefreshRequest(StoreRefreshRequest),
    StoreRefreshResponse(StoreRefreshResponse),
    DeleteRequest(DeleteRequest),
    DeleteResponse(DeleteResponse),
    DeleteRefreshRequest(DeleteRefreshRequest),
    DeleteRefreshResponse(DeleteRefreshResponse),
    UpdateRequest(UpdateRequest),
    UpdateResponse(UpdateResponse),
    DownlistNotification(DownlistNotification),
}

impl TypedMessage {
    /// The wire type code for this message.
    pub fn msg_type(&self) -> u16 {
        match self {
            TypedMessage::PingRequest(_) => MSG_PING_REQUEST,
            TypedMessage::PingResponse(_) => MSG_PING_RESPONSE,
            TypedMessage::FindNodesRequest(_) => MSG_FIND_NODES_REQUEST,
            TypedMessage::FindNodesResponse(_) => MSG_FIND_NODES_RESPONSE,
            TypedMessage::FindValueRequest(_) => MSG_FIND_VALUE_REQUEST,
            TypedMessage::FindValueResponse(_) => MSG_FIND_VALUE_RESPONSE,
            TypedMessage::StoreRequest(_) => MSG_STORE_REQUEST,
            TypedMessage::StoreResponse(_) => MSG_STORE_RESPONSE,
            TypedMessage::StoreRefreshRequest(_) => MSG_STORE_REFRESH_REQUEST,
            TypedMessage::StoreRefreshResponse(_) => MSG_STORE_REFRESH_RESPONSE,
            TypedMessage::DeleteRequest(_) => MSG_DELETE_REQUEST,
            TypedMessage::DeleteResponse(_) => MSG_DELETE_RESPONSE,
            TypedMessage::DeleteRefreshRequest(_) => MSG_DELETE_REFRESH_REQUEST,
            TypedMessage::DeleteRefreshResponse(_) => MSG_DELETE_REFRESH_RESPONSE,
            TypedMessage::UpdateRequest(_) => MSG_UPDATE_REQUEST,
            TypedMessage::UpdateResponse(_) => MSG_UPDATE_RESPONSE,
            TypedMessage::DownlistNotification(_) => MSG_DOWNLIST_NOTIFICATION,
        }
    }

    /// Whether this message is a request (expects a response).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            TypedMessage::PingRequest(_)
                | TypedMessage::FindNodesRequest(_)
                | TypedMessage::FindValueRequest(_)
                | TypedMessage::StoreRequest(_)
                | TypedMessage::StoreRefreshRequest(_)
                | TypedMessage::DeleteRequest(_)
                | TypedMessage::DeleteRefreshRequest(_)
                | TypedMessage::UpdateRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;
    use std::net::SocketAddr;

    fn contact(byte: u8) -> Contact {
        Contact::new(
            NodeId::from_bytes([byte; 64]),
            SocketAddr::from(([127, 0, 0, 1], 4000 + u16::from(byte))),
        )
    }

    #[test]
    fn test_msg_type_mapping() {
        let msg = TypedMessage::PingRequest(PingRequest {
            ping: "ping".into(),
            sender: contact(1),
        });
        assert_eq!(msg.msg_type(), MSG_PING_REQUEST);
        assert!(msg.is_request());

        let msg = TypedMessage::PingResponse(PingResponse {
            result: true,
            echo: "pong".into(),
            node_id: NodeId::from_bytes([2; 64]),
        });
        assert_eq!(msg.msg_type(), MSG_PING_RESPONSE);
        assert!(!msg.is_request());
    }

    #[test]
    fn test_find_value_response_roundtrip() {
        let resp = FindValueResponse {
            result: true,
            values: vec![b"v1".to_vec()],
            signed_values: vec![SignedValue {
                value: b"v1".to_vec(),
                signature: vec![7u8; 64],
            }],
            closest_nodes: vec![contact(3), contact(4)],
            alternative_value_holder: None,
            needs_cache_copy: Some(contact(5)),
            node_id: NodeId::from_bytes([9; 64]),
        };
        let bytes = cbor::to_vec(&TypedMessage::FindValueResponse(resp)).expect("serialize");
        let restored: TypedMessage = cbor::from_slice(&bytes).expect("deserialize");
        match restored {
            TypedMessage::FindValueResponse(r) => {
                assert!(r.result);
                assert_eq!(r.values, vec![b"v1".to_vec()]);
                assert_eq!(r.signed_values.len(), 1);
                assert_eq!(r.closest_nodes.len(), 2);
                assert!(r.alternative_value_holder.is_none());
                assert_eq!(
                    r.needs_cache_copy.map(|c| c.node_id),
                    Some(contact(5).node_id)
                );
            }
            other => unreachable!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_store_request_roundtrip() {
        let req = StoreRequest {
            key: NodeId::from_bytes([1; 64]),
            signed_value: SignedValue {
                value: b"payload".to_vec(),
                signature: vec![2u8; 64],
            },
            ttl_secs: 3600,
            publish: true,
            request_signature: RequestSignature {
                signer_id: vec![3u8; 32],
                public_key: vec![4u8; 32],
                signed_public_key: vec![5u8; 64],
                payload_signature: vec![6u8; 64],
            },
            sender: contact(7),
        };
        let bytes = cbor::to_vec(&TypedMessage::StoreRequest(req)).expect("serialize");
        let restored: TypedMessage = cbor::from_slice(&bytes).expect("deserialize");
        match restored {
            TypedMessage::StoreRequest(r) => {
                assert_eq!(r.ttl_secs, 3600);
                assert!(r.publish);
                assert_eq!(r.signed_value.value, b"payload");
                assert_eq!(r.request_signature.signer_id, vec![3u8; 32]);
            }
            other => unreachable!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_downlist_roundtrip() {
        let req = DownlistNotification {
            node_ids: vec![NodeId::from_bytes([1; 64]), NodeId::from_bytes([2; 64])],
            sender: contact(3),
        };
        let bytes = cbor::to_vec(&TypedMessage::DownlistNotification(req)).expect("serialize");
        let restored: TypedMessage = cbor::from_slice(&bytes).expect("deserialize");
        match restored {
            TypedMessage::DownlistNotification(r) => assert_eq!(r.node_ids.len(), 2),
            other => unreachable!("unexpected message: {other:?}"),
        }
    }
}
