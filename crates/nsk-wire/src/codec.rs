//! bincode helpers for variable-size collective payloads

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Serialize a value for an `all_gather` / `all_to_all_v` payload
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a payload produced by [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Decode every rank's payload of an `all_gather` and concatenate them in
/// rank order.
pub fn decode_concat<T: DeserializeOwned>(parts: &[Vec<u8>]) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for part in parts {
        let mut items: Vec<T> = decode(part)?;
        out.append(&mut items);
    }
    Ok(out)
}
