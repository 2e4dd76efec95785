//! State blob codec
//!
//! Handler state lives in the cache as versioned JSON. Decode failure is not
//! an error: corrupt or incompatible state logs a warning and reads as "no
//! prior state", so the detector starts fresh.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

pub const STATE_VERSION: u32 = 1;

pub fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(key = %key, error = %e, "state_decode_failed");
            None
        }
    }
}

pub fn encode<T: Serialize>(key: &str, state: &T) -> Option<String> {
    match serde_json::to_string(state) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(key = %key, error = %e, "state_encode_failed");
            None
        }
    }
}
