//! Pluggable payload serialization
//!
//! The engine treats payload encoding as an opaque capability: adapters hand
//! it typed values, the store sees bytes. Two backends ship here; embedders
//! can bring their own by implementing `PayloadCodec`.

use crate::error::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// Capability for turning payloads into stored bytes and back.
pub trait PayloadCodec: Send + Sync {
    /// Serialize a payload to bytes.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a payload from bytes, typed by the caller's declared
    /// response type.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Name of this codec, stamped on stored targets.
    fn name(&self) -> &str;
}

/// JSON codec; the default, since stored bodies stay inspectable.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }
}

impl PayloadCodec for JsonCodec {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let result = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        result.map_err(|e| CodecError::SerializationFailed {
            reason: format!("JSON serialization failed: {}", e),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::DeserializationFailed {
            reason: format!("JSON deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// Bincode codec, for payloads where compactness beats inspectability.
#[derive(Debug, Clone, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadCodec for BincodeCodec {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::SerializationFailed {
            reason: format!("Bincode serialization failed: {}", e),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::DeserializationFailed {
            reason: format!("Bincode deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "bincode"
    }
}
