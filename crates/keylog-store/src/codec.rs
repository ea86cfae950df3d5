//! Versioned record encoding.
//!
//! Every stored value is a one-byte schema version followed by a bincode
//! body. Decoding rejects versions it does not know.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Schema version written in front of every record.
pub const FORMAT_VERSION: u8 = 1;

/// Serialize `value` into a versioned record.
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut out = vec![FORMAT_VERSION];
    bincode::serialize_into(&mut out, value).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(out)
}

/// Deserialize a versioned record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    match bytes.split_first() {
        Some((&FORMAT_VERSION, body)) => {
            bincode::deserialize(body).map_err(|e| StoreError::Decode(e.to_string()))
        }
        Some((version, _)) => Err(StoreError::Decode(format!(
            "unsupported format version {version}"
        ))),
        None => Err(StoreError::Decode("empty record".to_string())),
    }
}
