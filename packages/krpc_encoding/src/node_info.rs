//! `serde`'s `with`-module pattern for `Vec<NodeInfo>`, which is packed on
//! the wire as a single concatenated byte string (26 bytes per IPv4 entry,
//! 38 per IPv6 entry) rather than as a bencoded list of strings.

use serde::{
    de::{self, Visitor},
    Deserializer, Serializer,
};
use std::fmt;

use crate::addr::{is_v6, Addr};
use crate::id::{NodeID, ID_LEN};

/// A remote node's identity and contact address, as returned in `find_node`
/// and `get_peers` responses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeInfo {
    pub id: NodeID,
    pub addr: Addr,
}

impl NodeInfo {
    pub fn new(id: NodeID, addr: Addr) -> NodeInfo {
        NodeInfo { id, addr }
    }

    fn write_compact(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.id.as_bytes());
        self.addr.write_compact(out);
    }
}

pub fn serialize<S>(nodes: &[NodeInfo], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let family_v6 = nodes.first().map(|n| is_v6(&n.addr.socket_addr()));
    let mut buf = Vec::with_capacity(nodes.len() * 26);
    for node in nodes {
        debug_assert_eq!(
            family_v6,
            Some(is_v6(&node.addr.socket_addr())),
            "compact node list must not mix IPv4 and IPv6 entries"
        );
        node.write_compact(&mut buf);
    }
    serializer.serialize_bytes(&buf)
}

struct NodesVisitor;

impl<'de> Visitor<'de> for NodesVisitor {
    type Value = Vec<NodeInfo>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "a byte string whose length is a multiple of 26 (IPv4) or 38 (IPv6)"
        )
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Vec<NodeInfo>, E>
    where
        E: de::Error,
    {
        decode_mixed(v).map_err(|reason| de::Error::custom(reason))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Vec<NodeInfo>, E>
    where
        E: de::Error,
    {
        self.visit_bytes(&v)
    }
}

/// Decodes a run of compact node entries. Mainline DHT never mixes IPv4 and
/// IPv6 entries within one response, so the entry width is fixed for the
/// whole buffer: 26 bytes if it divides evenly, else 38.
fn decode_mixed(bytes: &[u8]) -> Result<Vec<NodeInfo>, String> {
    let entry_len = if bytes.len() % 26 == 0 && bytes.len() % 38 != 0 {
        26
    } else if bytes.len() % 38 == 0 {
        38
    } else {
        return Err(format!(
            "compact node list of length {} is not a multiple of 26 or 38",
            bytes.len()
        ));
    };

    let mut nodes = Vec::with_capacity(bytes.len() / entry_len);
    for chunk in bytes.chunks_exact(entry_len) {
        let mut id_bytes = [0u8; ID_LEN];
        id_bytes.copy_from_slice(&chunk[0..ID_LEN]);
        let id = NodeID::new(id_bytes);
        let addr = Addr::read_compact(&chunk[ID_LEN..])
            .ok_or_else(|| "malformed compact address in node list".to_string())?;
        nodes.push(NodeInfo::new(id, addr));
    }
    Ok(nodes)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<NodeInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_bytes(NodesVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bencode::{de, ser};

    #[derive(serde_derive::Serialize, serde_derive::Deserialize, Debug, PartialEq)]
    struct Wrapper {
        #[serde(with = "super")]
        nodes: Vec<NodeInfo>,
    }

    #[test]
    fn round_trips_ipv4_nodes() {
        let nodes = vec![
            NodeInfo::new(NodeID::random(), Addr::new("127.0.0.1:6881".parse().unwrap())),
            NodeInfo::new(NodeID::random(), Addr::new("203.0.113.9:6882".parse().unwrap())),
        ];
        let wrapper = Wrapper { nodes };
        let bytes = ser::to_bytes(&wrapper).unwrap();
        let decoded: Wrapper = de::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, wrapper);
    }

    #[test]
    fn empty_list_round_trips() {
        let wrapper = Wrapper { nodes: Vec::new() };
        let bytes = ser::to_bytes(&wrapper).unwrap();
        let decoded: Wrapper = de::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.nodes.len(), 0);
    }
}
