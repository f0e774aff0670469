//! BEP-5/BEP-43 encode booleans as the bencoded integers `0`/`1`, not as a
//! bencode type of their own. This module adapts `bool` to that wire shape.

use serde::{Deserialize, Deserializer};

pub fn is_false(b: &bool) -> bool {
    !*b
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bencode::de;

    #[derive(serde_derive::Deserialize, Debug)]
    struct Wrapper {
        #[serde(deserialize_with = "super::deserialize")]
        flag: bool,
    }

    #[test]
    fn one_decodes_true() {
        let bytes = serde_bencode::ser::to_bytes(&serde_bencode::value::Value::Dict(
            vec![(b"flag".to_vec(), serde_bencode::value::Value::Int(1))]
                .into_iter()
                .collect(),
        ))
        .unwrap();
        let decoded: Wrapper = de::from_bytes(&bytes).unwrap();
        assert!(decoded.flag);
    }

    #[test]
    fn zero_decodes_false() {
        let bytes = serde_bencode::ser::to_bytes(&serde_bencode::value::Value::Dict(
            vec![(b"flag".to_vec(), serde_bencode::value::Value::Int(0))]
                .into_iter()
                .collect(),
        ))
        .unwrap();
        let decoded: Wrapper = de::from_bytes(&bytes).unwrap();
        assert!(!decoded.flag);
    }
}
