//! CBOR encoding and decoding on top of [ciborium], plus the typed map
//! accessors used by the session layer.
//!
//! Two encodings are provided: [to_vec] preserves the insertion order of map
//! entries (needed when re-serializing a signed structure whose byte order
//! must survive), while [to_vec_canonical] sorts map keys into canonical
//! order before writing.

use serde::{de, Deserialize, Serialize};
use std::borrow::{Borrow, BorrowMut};
use std::cmp::Ordering;
use std::io::Cursor;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// CBOR input had extra data after the first top-level item.
    #[error("extraneous data")]
    ExtraneousData,
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
    /// A tag 0 date-time string that does not parse as RFC 3339.
    #[error("invalid RFC 3339 date-time: {0}")]
    InvalidDateTime(String),
}

/// Wraps [ciborium::Value] and implements [PartialEq], [Eq], [PartialOrd] and
/// [Ord], so it can be used in maps and sets.
#[derive(Debug, Clone)]
pub struct Value(pub ciborium::Value);

impl Deref for Value {
    type Target = ciborium::Value;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Value {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        // Map keys are never floats in this crate, so the partial order is
        // total in practice.
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

impl From<ciborium::Value> for Value {
    fn from(value: ciborium::Value) -> Self {
        Self(value)
    }
}

impl From<Value> for ciborium::Value {
    fn from(value: Value) -> Self {
        value.0
    }
}

impl AsRef<ciborium::Value> for Value {
    fn as_ref(&self) -> &ciborium::Value {
        &self.0
    }
}

impl Borrow<ciborium::Value> for Value {
    fn borrow(&self) -> &ciborium::Value {
        &self.0
    }
}

impl BorrowMut<ciborium::Value> for Value {
    fn borrow_mut(&mut self) -> &mut ciborium::Value {
        &mut self.0
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        ciborium::Value::deserialize(deserializer).map(Value)
    }
}

macro_rules! impl_from {
    ($variant:path, $for_type:ty) => {
        impl From<$for_type> for Value {
            fn from(v: $for_type) -> Value {
                $variant(v.into()).into()
            }
        }
    };
}

impl_from!(ciborium::Value::Bool, bool);
impl_from!(ciborium::Value::Integer, i8);
impl_from!(ciborium::Value::Integer, i16);
impl_from!(ciborium::Value::Integer, i32);
impl_from!(ciborium::Value::Integer, i64);
impl_from!(ciborium::Value::Integer, u8);
impl_from!(ciborium::Value::Integer, u16);
impl_from!(ciborium::Value::Integer, u32);
impl_from!(ciborium::Value::Integer, u64);
impl_from!(ciborium::Value::Float, f64);
impl_from!(ciborium::Value::Bytes, Vec<u8>);
impl_from!(ciborium::Value::Text, String);
impl_from!(ciborium::Value::Array, Vec<ciborium::Value>);

/// Encode a value, preserving map-entry insertion order.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

/// Encode a value with map keys sorted into canonical CBOR order: shorter
/// encoded key first, ties broken bytewise.
pub fn to_vec_canonical<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let value: ciborium::Value = into_value(value)?;
    to_vec(&canonicalize(value)?)
}

fn canonicalize(value: ciborium::Value) -> Result<ciborium::Value, CborError> {
    match value {
        ciborium::Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize(k)?;
                    let v = canonicalize(v)?;
                    let encoded = to_vec(&k)?;
                    Ok((encoded, k, v))
                })
                .collect::<Result<Vec<_>, CborError>>()?;
            keyed.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
            Ok(ciborium::Value::Map(
                keyed.into_iter().map(|(_, k, v)| (k, v)).collect(),
            ))
        }
        ciborium::Value::Array(items) => Ok(ciborium::Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<Result<_, _>>()?,
        )),
        ciborium::Value::Tag(tag, inner) => {
            Ok(ciborium::Value::Tag(tag, Box::new(canonicalize(*inner)?)))
        }
        other => Ok(other),
    }
}

/// Decode exactly one top-level item from `slice`.
pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    let mut cursor = Cursor::new(slice);
    let value =
        ciborium::from_reader(&mut cursor).map_err(|e| CborError::DecodeFailed(e.to_string()))?;
    if cursor.position() as usize != slice.len() {
        return Err(CborError::ExtraneousData);
    }
    Ok(value)
}

/// Convert a [ciborium::Value] into a type `T`.
#[allow(clippy::needless_pass_by_value)]
pub fn from_value<T>(value: ciborium::Value) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    let buf = to_vec(&value)?;
    from_slice(buf.as_slice())
}

pub fn into_value<S>(v: &S) -> Result<ciborium::Value, CborError>
where
    S: Serialize,
{
    let bytes = to_vec(v)?;
    from_slice(&bytes)
}

fn item_name(value: &ciborium::Value) -> &'static str {
    match value {
        ciborium::Value::Integer(_) => "integer",
        ciborium::Value::Bytes(_) => "bytes",
        ciborium::Value::Float(_) => "float",
        ciborium::Value::Text(_) => "text",
        ciborium::Value::Bool(_) => "bool",
        ciborium::Value::Null => "null",
        ciborium::Value::Tag(..) => "tag",
        ciborium::Value::Array(_) => "array",
        ciborium::Value::Map(_) => "map",
        _ => "unknown",
    }
}

fn map_entries(map: &ciborium::Value) -> Result<&[(ciborium::Value, ciborium::Value)], CborError> {
    map.as_map()
        .map(Vec::as_slice)
        .ok_or(CborError::UnexpectedItem(item_name(map), "map"))
}

fn map_get<'m>(
    map: &'m ciborium::Value,
    key: &str,
) -> Result<Option<&'m ciborium::Value>, CborError> {
    Ok(map_entries(map)?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v))
}

pub fn has_key(map: &ciborium::Value, key: &str) -> Result<bool, CborError> {
    map_get(map, key).map(|v| v.is_some())
}

/// Extract a `bstr` value under a text key, if present. A present value of
/// any other type is an error, never a coercion.
pub fn extract_bytes(map: &ciborium::Value, key: &str) -> Result<Option<Vec<u8>>, CborError> {
    match map_get(map, key)? {
        None => Ok(None),
        Some(ciborium::Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
        Some(other) => Err(CborError::UnexpectedItem(item_name(other), "bytes")),
    }
}

pub fn extract_uint(map: &ciborium::Value, key: &str) -> Result<Option<u64>, CborError> {
    match map_get(map, key)? {
        None => Ok(None),
        Some(ciborium::Value::Integer(i)) => u64::try_from(*i)
            .map(Some)
            .map_err(|_| CborError::UnexpectedItem("negative integer", "unsigned integer")),
        Some(other) => Err(CborError::UnexpectedItem(
            item_name(other),
            "unsigned integer",
        )),
    }
}

pub fn extract_text(map: &ciborium::Value, key: &str) -> Result<Option<String>, CborError> {
    match map_get(map, key)? {
        None => Ok(None),
        Some(ciborium::Value::Text(text)) => Ok(Some(text.clone())),
        Some(other) => Err(CborError::UnexpectedItem(item_name(other), "text")),
    }
}

pub fn extract_bool(map: &ciborium::Value, key: &str) -> Result<Option<bool>, CborError> {
    match map_get(map, key)? {
        None => Ok(None),
        Some(ciborium::Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(CborError::UnexpectedItem(item_name(other), "bool")),
    }
}

pub fn extract_array(
    map: &ciborium::Value,
    key: &str,
) -> Result<Option<Vec<ciborium::Value>>, CborError> {
    match map_get(map, key)? {
        None => Ok(None),
        Some(ciborium::Value::Array(items)) => Ok(Some(items.clone())),
        Some(other) => Err(CborError::UnexpectedItem(item_name(other), "array")),
    }
}

/// Extract a tag 0 (RFC 3339 text) date-time under a text key, if present.
pub fn extract_date_time(
    map: &ciborium::Value,
    key: &str,
) -> Result<Option<OffsetDateTime>, CborError> {
    let value = match map_get(map, key)? {
        None => return Ok(None),
        Some(value) => value,
    };
    match value {
        ciborium::Value::Tag(0, inner) => match inner.as_ref() {
            ciborium::Value::Text(text) => OffsetDateTime::parse(text, &Rfc3339)
                .map(Some)
                .map_err(|_| CborError::InvalidDateTime(text.clone())),
            other => Err(CborError::UnexpectedItem(item_name(other), "text")),
        },
        other => Err(CborError::UnexpectedItem(item_name(other), "tag 0")),
    }
}

/// Build a tag 0 date-time in the 18013-5-restricted form: UTC offset
/// (trailing `Z`) and no fractional seconds.
pub fn date_time_value(dt: OffsetDateTime) -> Result<ciborium::Value, CborError> {
    let restricted = dt
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|e| CborError::InvalidDateTime(e.to_string()))?;
    let text = restricted
        .format(&Rfc3339)
        .map_err(|e| CborError::InvalidDateTime(e.to_string()))?;
    Ok(ciborium::Value::Tag(
        0,
        Box::new(ciborium::Value::Text(text)),
    ))
}

/// Render a value for logs and error messages. Floats only ever appear here.
pub fn pretty_print(value: &ciborium::Value) -> String {
    let mut out = String::new();
    pretty_print_inner(&mut out, value, 0);
    out
}

fn pretty_print_inner(out: &mut String, value: &ciborium::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        ciborium::Value::Integer(i) => out.push_str(&format!("{}", i128::from(*i))),
        ciborium::Value::Float(f) => out.push_str(&format!("{f}")),
        ciborium::Value::Bool(b) => out.push_str(&format!("{b}")),
        ciborium::Value::Null => out.push_str("null"),
        ciborium::Value::Text(t) => out.push_str(&format!("{t:?}")),
        ciborium::Value::Bytes(b) => {
            out.push_str("h'");
            for byte in b {
                out.push_str(&format!("{byte:02x}"));
            }
            out.push('\'');
        }
        ciborium::Value::Tag(tag, inner) => {
            out.push_str(&format!("{tag}("));
            pretty_print_inner(out, inner, indent);
            out.push(')');
        }
        ciborium::Value::Array(items) => {
            out.push_str("[\n");
            for item in items {
                out.push_str(&pad);
                out.push_str("  ");
                pretty_print_inner(out, item, indent + 1);
                out.push_str(",\n");
            }
            out.push_str(&pad);
            out.push(']');
        }
        ciborium::Value::Map(entries) => {
            out.push_str("{\n");
            for (k, v) in entries {
                out.push_str(&pad);
                out.push_str("  ");
                pretty_print_inner(out, k, indent + 1);
                out.push_str(": ");
                pretty_print_inner(out, v, indent + 1);
                out.push_str(",\n");
            }
            out.push_str(&pad);
            out.push('}');
        }
        _ => out.push_str("<unsupported>"),
    }
}
