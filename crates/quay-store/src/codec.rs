//! Value encodings for message fields and queue markers.
//!
//! Headers are stored as a JSON object; timestamps as the fixed-width
//! big-endian encoding of [`Timestamp`].

use quay_types::{Headers, Timestamp};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::keys::display_key;

/// Encode the headers to be stored at `key`.
pub fn encode_headers(key: &[u8], headers: &Headers) -> StoreResult<Vec<u8>> {
    encode_json(key, headers)
}

fn encode_json<T: Serialize + ?Sized>(key: &[u8], value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode {
        key: display_key(key),
        reason: e.to_string(),
    })
}

pub fn decode_headers(key: &[u8], bytes: &[u8]) -> StoreResult<Headers> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: display_key(key),
        reason: format!("invalid headers: {e}"),
    })
}

pub fn decode_timestamp(key: &[u8], bytes: &[u8]) -> StoreResult<Timestamp> {
    Timestamp::from_bytes(bytes).map_err(|e| StoreError::Corrupt {
        key: display_key(key),
        reason: e.to_string(),
    })
}
