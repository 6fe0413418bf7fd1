//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.

use crate::cbor::{self, CborError};
use ciborium::Value;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

/// A wrapper for a struct that is to be encoded as a CBOR tagged item, with
/// tag number 24.
///
/// If this struct is created by deserializing CBOR, the original byte
/// representation is preserved for future serializing, so the embedded item
/// survives byte-exact even when the decoded form would re-encode
/// differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    pub inner_bytes: Vec<u8>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a CBOR byte string, received: '{0:?}'")]
    InvalidTag24(Box<Value>),
    #[error("expected a CBOR tagged data item with tag number 24, received: '{0:?}'")]
    NotATag24(Value),
    #[error("unable to encode value as CBOR: {0}")]
    UnableToEncode(CborError),
    #[error("unable to decode bytes to inner type: {0}")]
    UnableToDecode(CborError),
}

impl<T> Tag24<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: Serialize + DeserializeOwned> Tag24<T> {
    pub fn new(inner: T) -> Result<Tag24<T>> {
        let inner_bytes = cbor::to_vec(&inner).map_err(Error::UnableToEncode)?;
        // Decode from the encoded form so the cached value reflects exactly
        // what the bytes say.
        let inner = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(Self { inner, inner_bytes })
    }

    pub fn from_bytes(inner_bytes: Vec<u8>) -> Result<Tag24<T>> {
        let inner = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(Self { inner, inner_bytes })
    }
}

impl<T: Serialize + DeserializeOwned> TryFrom<Value> for Tag24<T> {
    type Error = Error;

    fn try_from(v: Value) -> Result<Tag24<T>> {
        match v {
            Value::Tag(24, inner_value) => match inner_value.as_ref() {
                Value::Bytes(inner_bytes) => Tag24::from_bytes(inner_bytes.clone()),
                _ => Err(Error::InvalidTag24(inner_value)),
            },
            _ => Err(Error::NotATag24(v)),
        }
    }
}

impl<T> From<Tag24<T>> for Value {
    fn from(Tag24 { inner_bytes, .. }: Tag24<T>) -> Value {
        Value::Tag(24, Box::new(Value::Bytes(inner_bytes)))
    }
}

impl<T> Serialize for Tag24<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::Tag(24, Box::new(Value::Bytes(self.inner_bytes.clone()))).serialize(serializer)
    }
}

impl<'de, T: Serialize + DeserializeOwned> Deserialize<'de> for Tag24<T> {
    fn deserialize<D>(d: D) -> std::result::Result<Tag24<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(d)?;
        value.try_into().map_err(serde::de::Error::custom)
    }
}
