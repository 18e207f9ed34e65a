//! CBOR encoding of stored records.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::StoreError;

/// Serialize a record for storage.
pub fn encode<T: Serialize>(record: &T) -> Result<Bytes, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf)
        .map_err(|e| StoreError::Serialization(format!("encode: {e}")))?;
    Ok(Bytes::from(buf))
}

/// Deserialize a stored record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(format!("decode: {e}")))
}
