//! Pluggable serialization codecs.
//!
//! A [`Codec`] is injected into [`Client`](crate::Client) and
//! [`RpcHandler`](crate::RpcHandler) construction; nothing in this crate
//! assumes a process-wide serialization format.

use crate::error::CodecError;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

/// Marshal/unmarshal contract for typed values.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a value into bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Decode a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is invalid for the target type.
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Bincode codec, the default wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::DeserializationFailed(e.to_string()))
    }
}

/// CBOR codec backed by ciborium.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        let mut vec = Vec::new();
        ciborium::ser::into_writer(value, &mut vec)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))?;
        Ok(Bytes::from(vec))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        name: String,
        data: Vec<u8>,
    }

    fn sample() -> TestMessage {
        TestMessage {
            id: 42,
            name: "test".to_string(),
            data: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_bincode_roundtrip() {
        let msg = sample();
        let encoded = BincodeCodec.marshal(&msg).unwrap();
        let decoded: TestMessage = BincodeCodec.unmarshal(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_cbor_roundtrip() {
        let msg = sample();
        let encoded = CborCodec.marshal(&msg).unwrap();
        let decoded: TestMessage = CborCodec.unmarshal(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_decode_error() {
        let bad_data = vec![0xFF, 0xFF, 0xFF];
        let result: Result<TestMessage, CodecError> = BincodeCodec.unmarshal(&bad_data);
        assert!(result.is_err());
    }
}
