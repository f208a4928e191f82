//! CBOR codec implementation for serialization.

use crate::error::CodecError;
use bytes::Bytes;
use ciborium::Value;
use serde::{Serialize, de::DeserializeOwned};

/// Encode a message into CBOR bytes.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, CodecError> {
    let mut vec = Vec::new();
    ciborium::ser::into_writer(msg, &mut vec)?;
    Ok(Bytes::from(vec))
}

/// Decode CBOR bytes into a message.
///
/// # Errors
///
/// Returns an error if the data is invalid or the message cannot be deserialized.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    Ok(ciborium::de::from_reader(data)?)
}

/// Convert a serializable value into a dynamic CBOR [`Value`].
///
/// # Errors
///
/// Returns an error if the value cannot be represented in CBOR.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    Value::serialized(value).map_err(|e| CodecError::SerializationFailed(e.to_string()))
}

/// Convert a dynamic CBOR [`Value`] into a concrete type.
///
/// # Errors
///
/// Returns an error if the value does not match the shape of `T`.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    value
        .deserialized()
        .map_err(|e| CodecError::DeserializationFailed(e.to_string()))
}
