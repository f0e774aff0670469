//! Bencoded KRPC wire codec for the Mainline DHT (BEP-5), plus the few
//! companion BEPs (0042 read-only flag, 0043 origin IP, 0051 infohash
//! sampling) that ride along in the same envelope.

mod addr;
mod booleans;
pub mod errors;
mod id;
mod messages;
mod node_info;

pub use addr::Addr;
pub use errors::{Error, ErrorKind, Result};
pub use id::{NodeID, ID_LEN};
pub use messages::{KRPCError, Message, MessageType, Query, Response};
pub use node_info::NodeInfo;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_query_round_trips() {
        let msg = Message::query(vec![b'a', b'a'], Query::Ping { id: NodeID::random() });
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn find_node_response_round_trips() {
        let nodes = vec![NodeInfo::new(
            NodeID::random(),
            Addr::new("203.0.113.4:6881".parse().unwrap()),
        )];
        let msg = Message::response(
            vec![b'a', b'a'],
            Response::NextHop {
                id: NodeID::random(),
                token: None,
                nodes,
            },
        );
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn get_peers_response_with_values_round_trips() {
        let peers = vec![Addr::new("198.51.100.7:51413".parse().unwrap())];
        let msg = Message::response(
            vec![b'b', b'b'],
            Response::GetPeers {
                id: NodeID::random(),
                token: Some(b"tok".to_vec()),
                peers,
            },
        );
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn error_message_round_trips() {
        let msg = Message::error(vec![b'c', b'c'], KRPCError::protocol("bad token"));
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn malformed_bytes_fail_cleanly() {
        let garbage = b"not bencode at all {}[]";
        assert!(Message::decode(garbage).is_err());
    }

    #[test]
    fn unrecognized_query_reports_unknown_query_kind() {
        let raw = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q8:mystery1:t2:aa1:y1:qe";
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::UnknownQueryKind { kind } if kind == "mystery"
        ));
    }

    #[test]
    fn announce_peer_query_round_trips() {
        let msg = Message::query(
            vec![b'd', b'd'],
            Query::AnnouncePeer {
                id: NodeID::random(),
                implied_port: true,
                port: Some(6881),
                info_hash: NodeID::random(),
                token: b"xyz".to_vec(),
            },
        );
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
