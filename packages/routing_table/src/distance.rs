use num_bigint::BigUint;

use krpc_encoding::NodeID;

/// XOR distance between two ids, ordered as an unsigned big-endian integer
/// per the Kademlia metric.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Distance(BigUint);

impl Distance {
    pub fn between(a: &NodeID, b: &NodeID) -> Distance {
        let xored = *a ^ *b;
        Distance(BigUint::from_bytes_be(xored.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closer_id_has_smaller_distance() {
        let target = NodeID::from_hex("d1c5676ae7ac98e8b19f63565905105e3c4c37a2").unwrap();
        let far = NodeID::zero();
        assert!(Distance::between(&target, &target) < Distance::between(&target, &far));
    }

    #[test]
    fn distance_to_self_is_zero() {
        let id = NodeID::random();
        assert_eq!(Distance::between(&id, &id), Distance(BigUint::from(0u32)));
    }
}
