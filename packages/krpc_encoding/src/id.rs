use std::fmt;
use std::ops::BitXor;

use rand::Rng;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::errors::{ErrorKind, Result};

pub const ID_LEN: usize = 20;

/// A 160-bit Kademlia identifier: a `NodeID` when naming a node, or an
/// infohash when naming the content being searched for (both are 20-byte
/// bencoded strings on the wire, so the codec treats them identically).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeID([u8; ID_LEN]);

impl NodeID {
    pub fn new(bytes: [u8; ID_LEN]) -> NodeID {
        NodeID(bytes)
    }

    pub fn random() -> NodeID {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill(&mut bytes);
        NodeID(bytes)
    }

    pub fn zero() -> NodeID {
        NodeID([0u8; ID_LEN])
    }

    pub fn from_hex(hex: &str) -> Result<NodeID> {
        if hex.len() != ID_LEN * 2 {
            return Err(ErrorKind::ProtocolError {
                reason: format!("expected {} hex characters, got {}", ID_LEN * 2, hex.len()),
            }
            .into());
        }

        let mut bytes = [0u8; ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                ErrorKind::ProtocolError {
                    reason: format!("invalid hex digit at position {}", i * 2),
                }
            })?;
        }

        Ok(NodeID(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Index (0..160) of the highest-order bit set in `self ^ other`. Two
    /// equal ids have no well-defined bucket; callers must special-case
    /// `self == other` before calling this (see `bucket_index` invariant in
    /// routing_table).
    pub fn differing_bit(&self, other: &NodeID) -> Option<usize> {
        for byte_idx in 0..ID_LEN {
            let diff = self.0[byte_idx] ^ other.0[byte_idx];
            if diff != 0 {
                let leading = diff.leading_zeros() as usize;
                return Some((ID_LEN - 1 - byte_idx) * 8 + (7 - leading));
            }
        }
        None
    }
}

impl BitXor for NodeID {
    type Output = NodeID;

    fn bitxor(self, rhs: NodeID) -> NodeID {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ rhs.0[i];
        }
        NodeID(out)
    }
}

impl fmt::Debug for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeID({})", self.to_hex())
    }
}

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for NodeID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

struct NodeIDVisitor;

impl<'de> Visitor<'de> for NodeIDVisitor {
    type Value = NodeID;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a {}-byte string", ID_LEN)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<NodeID, E>
    where
        E: de::Error,
    {
        if v.len() != ID_LEN {
            return Err(de::Error::invalid_length(v.len(), &self));
        }
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(v);
        Ok(NodeID(bytes))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<NodeID, E>
    where
        E: de::Error,
    {
        self.visit_bytes(&v)
    }
}

impl<'de> Deserialize<'de> for NodeID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<NodeID, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(NodeIDVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hex = "d1c5676ae7ac98e8b19f63565905105e3c4c37a2";
        // 41 chars - intentionally wrong length.
        assert!(NodeID::from_hex(hex).is_err());

        let good = "d1c5676ae7ac98e8b19f63565905105e3c4c37a";
        // 39 chars - also wrong.
        assert!(NodeID::from_hex(good).is_err());

        let exact = "d1c5676ae7ac98e8b19f63565905105e3c4c37a2"[..40].to_string();
        let id = NodeID::from_hex(&exact).expect("valid hex");
        assert_eq!(id.to_hex(), exact);
    }

    #[test]
    fn xor_self_is_zero() {
        let id = NodeID::random();
        assert_eq!(id ^ id, NodeID::zero());
    }

    #[test]
    fn differing_bit_is_none_for_equal_ids() {
        let id = NodeID::random();
        assert_eq!(id.differing_bit(&id), None);
    }

    #[test]
    fn differing_bit_matches_msb_semantics() {
        let a = NodeID::new([0u8; ID_LEN]);
        let mut b_bytes = [0u8; ID_LEN];
        b_bytes[0] = 0b1000_0000;
        let b = NodeID::new(b_bytes);
        assert_eq!(a.differing_bit(&b), Some(159));

        let mut c_bytes = [0u8; ID_LEN];
        c_bytes[ID_LEN - 1] = 0b0000_0001;
        let c = NodeID::new(c_bytes);
        assert_eq!(a.differing_bit(&c), Some(0));
    }
}
