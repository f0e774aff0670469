use std::fmt;

use serde_bytes::ByteBuf;
use serde_derive::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::booleans;
use crate::errors::{ErrorKind, Result};
use crate::id::NodeID;
use crate::node_info::{self, NodeInfo};

/// `serde`'s derived enum visitor reports an unrecognized `q` value as
/// `` unknown variant `foo`, expected one of `` ...; pull the offending
/// variant name back out so it surfaces as `ErrorKind::UnknownQueryKind`
/// (spec's named error for an unrecognized query) rather than a generic
/// decode failure.
fn unknown_query_kind(serde_message: &str) -> Option<String> {
    let rest = serde_message.strip_prefix("unknown variant `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// Envelope holding information common to requests and responses.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Message {
    /// Public IP address of the requester. Only sent by peers supporting
    /// [BEP-0042].
    ///
    /// [BEP-0042]: http://www.bittorrent.org/beps/bep_0042.html
    pub ip: Option<Addr>,

    /// Transaction ID generated by the querying node and echoed in the
    /// response. Used to correlate requests and responses.
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    /// Client version string.
    #[serde(rename = "v")]
    pub version: Option<ByteBuf>,

    #[serde(flatten)]
    pub message_type: MessageType,

    /// Sent by read-only DHT nodes defined in [BEP-0043].
    ///
    /// [BEP-0043]: http://www.bittorrent.org/beps/bep_0043.html
    #[serde(
        rename = "ro",
        default,
        skip_serializing_if = "booleans::is_false",
        deserialize_with = "booleans::deserialize"
    )]
    pub read_only: bool,
}

impl Message {
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        serde_bencode::de::from_bytes(bytes).map_err(|cause| {
            let cause = cause.to_string();
            match unknown_query_kind(&cause) {
                Some(kind) => ErrorKind::UnknownQueryKind { kind }.into(),
                None => ErrorKind::DecodeError { cause }.into(),
            }
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_bencode::ser::to_bytes(self).map_err(|cause| {
            ErrorKind::EncodeError {
                cause: cause.to_string(),
            }
            .into()
        })
    }

    pub fn query(transaction_id: Vec<u8>, query: Query) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Query { query },
            read_only: false,
        }
    }

    pub fn response(transaction_id: Vec<u8>, response: Response) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Response { response },
            read_only: false,
        }
    }

    pub fn error(transaction_id: Vec<u8>, error: KRPCError) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Error { error },
            read_only: false,
        }
    }
}

/// Messages sent and received by nodes.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "y")]
pub enum MessageType {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },

    #[serde(rename = "r")]
    Response {
        #[serde(rename = "r")]
        response: Response,
    },

    #[serde(rename = "e")]
    Error {
        #[serde(rename = "e")]
        error: KRPCError,
    },
}

/// Error sent when a query cannot be fulfilled.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct KRPCError(pub u32, pub String);

impl KRPCError {
    pub fn new(error_code: u32, message: &str) -> KRPCError {
        KRPCError(error_code, message.to_string())
    }

    pub fn generic(message: &str) -> KRPCError {
        KRPCError::new(201, message)
    }

    pub fn protocol(message: &str) -> KRPCError {
        KRPCError::new(203, message)
    }

    pub fn unknown_method(message: &str) -> KRPCError {
        KRPCError::new(204, message)
    }
}

impl fmt::Display for KRPCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KRPC error {}: {}", self.0, self.1)
    }
}

/// Possible queries.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    /// Most basic query. Answered with [`Response::OnlyID`].
    #[serde(rename = "ping")]
    Ping {
        /// Sender's node ID.
        id: NodeID,
    },

    /// Finds contact information for a node given its ID.
    ///
    /// Answered with [`Response::NextHop`] carrying the target node, or the
    /// K closest good nodes in the responder's own routing table.
    #[serde(rename = "find_node")]
    FindNode {
        /// Node ID of the querying node.
        id: NodeID,

        /// ID of the node being searched for.
        target: NodeID,
    },

    /// Gets peers associated with a torrent infohash.
    ///
    /// If the queried node has no peers for the infohash, [`Response::NextHop`]
    /// is returned with the K nodes closest to the infohash. Otherwise
    /// [`Response::GetPeers`] is returned. Either way a `token` is included,
    /// required by a future [`Query::AnnouncePeer`].
    #[serde(rename = "get_peers")]
    GetPeers {
        /// Node ID of the querying node.
        id: NodeID,

        /// Infohash being searched for peers of.
        info_hash: NodeID,
    },

    /// Announces that the peer controlling the querying node is downloading
    /// a torrent on a port.
    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        /// Node ID of the querying node.
        id: NodeID,

        /// Whether the peer's port is implied by the source port of the UDP
        /// packet carrying this query. If `true`, `port` is ignored.
        #[serde(deserialize_with = "booleans::deserialize")]
        implied_port: bool,

        /// Peer's port.
        port: Option<u16>,

        /// Infohash of the torrent being announced.
        info_hash: NodeID,

        /// Token received in a previous [`Query::GetPeers`] response.
        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },

    /// `sample_infohashes` query from [BEP-0051].
    ///
    /// [BEP-0051]: http://www.bittorrent.org/beps/bep_0051.html
    #[serde(rename = "sample_infohashes")]
    SampleInfoHashes {
        /// Node ID of the querying node.
        id: NodeID,
        target: NodeID,
    },
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
            Query::SampleInfoHashes { .. } => "sample_infohashes",
        }
    }

    pub fn sender_id(&self) -> NodeID {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. }
            | Query::SampleInfoHashes { id, .. } => *id,
        }
    }
}

/// Possible responses. See [`Query`] to understand when each variant is used.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
    NextHop {
        /// Identifier of the queried node.
        id: NodeID,

        /// Token used in a future [`Query::AnnouncePeer`].
        ///
        /// Empty when the responder has decided we are unfit to send
        /// `announce_peer` messages, per [BEP-0042].
        token: Option<Vec<u8>>,

        #[serde(with = "node_info")]
        nodes: Vec<NodeInfo>,
    },

    GetPeers {
        /// Identifier of the queried node.
        id: NodeID,

        /// Token used in a future [`Query::AnnouncePeer`].
        token: Option<Vec<u8>>,

        #[serde(rename = "values")]
        peers: Vec<Addr>,
    },

    /// Response to [`Query::Ping`] and [`Query::AnnouncePeer`].
    OnlyID {
        /// Identifier of the queried node.
        id: NodeID,
    },

    /// Response to [`Query::SampleInfoHashes`].
    Samples {
        /// Identifier of the queried node.
        id: NodeID,

        /// Number of seconds this node should not be queried again for.
        interval: Option<u16>,

        /// Nodes close to the target in the request.
        #[serde(with = "node_info")]
        nodes: Vec<NodeInfo>,

        /// Number of infohashes this peer has.
        num: Option<u32>,

        /// Sample of infohashes.
        samples: Vec<NodeID>,
    },
}

impl Response {
    pub fn responder_id(&self) -> NodeID {
        match self {
            Response::NextHop { id, .. }
            | Response::GetPeers { id, .. }
            | Response::OnlyID { id }
            | Response::Samples { id, .. } => *id,
        }
    }
}
