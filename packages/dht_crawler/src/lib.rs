//! A Kademlia-based BitTorrent Mainline DHT node.
//!
//! [`Node`] owns a single event loop that speaks the KRPC wire protocol
//! (`krpc_encoding`, `tokio_krpc`) over one UDP socket, maintains a
//! fixed-depth routing table (`routing_table`), and answers `find_node`,
//! `get_peers`, `announce_peer` and `ping` both as a client (via iterative
//! lookups, see [`lookup`]) and as a server.

mod config;
mod errors;
mod lookup;
mod node;
mod peer_store;
mod stats;
mod token;

pub use config::Config;
pub use errors::{Error, ErrorKind, Result};
pub use node::Node;
pub use stats::Stats;

pub use krpc_encoding::NodeID;

/// Parses a 40-character hex infohash into the 160-bit id used throughout
/// the DHT (infohashes and node ids share the same id space).
pub fn decode_info_hash(hex: &str) -> Result<NodeID> {
    NodeID::from_hex(hex).map_err(|cause| {
        ErrorKind::InvalidInfoHash {
            reason: cause.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_infohash() {
        let hex = &"d1c5676ae7ac98e8b19f63565905105e3c4c37a2"[..40];
        let id = decode_info_hash(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn rejects_wrong_length_hex() {
        let err = decode_info_hash("not40hexchars").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidInfoHash { .. }));
    }
}
