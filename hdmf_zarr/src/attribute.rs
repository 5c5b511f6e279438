//! Attribute values and their JSON encoding.
//!
//! Every attribute value must land in a `.zattrs` document, so the codec maps
//! typed values to JSON and back:
//! - numeric scalars become JSON numbers; NaN and ±∞ become the strings
//!   `"NaN"`, `"Infinity"`, `"-Infinity"` and decode symmetrically;
//! - multi-dimensional values are nested arrays, preserving shape;
//! - references wrap as `{"zarr_dtype": "object", "value": <record>}`;
//! - byte strings decode to UTF-8 when valid, otherwise wrap as
//!   `{"bytes": "<base64>"}`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value as Json;

use crate::{
    builder::RefValue,
    error::ZarrError,
    link::ReferenceRecord,
    node::NodePath,
};

/// The reserved wrapper key discriminating reference and byte-string objects.
const ZARR_DTYPE_KEY: &str = "zarr_dtype";
const VALUE_KEY: &str = "value";
const BYTES_KEY: &str = "bytes";

/// A typed attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// A null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer beyond the `i64` range.
    UInt(u64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A (possibly nested) list; multi-dimensional values preserve shape as
    /// nested lists.
    List(Vec<AttributeValue>),
    /// A string-keyed mapping.
    Map(BTreeMap<String, AttributeValue>),
    /// An object reference.
    Reference(RefValue),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Encode an attribute value as JSON.
///
/// `encode_ref` turns a reference value into a stored record; the write
/// engine supplies the arena-path computation, the export engine supplies
/// the remapping table.
///
/// # Errors
/// Returns [`ZarrError::NotSerializable`] if a value cannot be encoded, with
/// the carrier `path` and attribute `name` attached.
pub fn encode_attribute(
    value: &AttributeValue,
    path: &NodePath,
    name: &str,
    encode_ref: &mut dyn FnMut(&RefValue) -> Result<ReferenceRecord, ZarrError>,
) -> Result<Json, ZarrError> {
    let not_serializable = |reason: &str| ZarrError::NotSerializable {
        path: path.clone(),
        name: name.to_string(),
        reason: reason.to_string(),
    };
    match value {
        AttributeValue::Null => Ok(Json::Null),
        AttributeValue::Bool(b) => Ok(Json::Bool(*b)),
        AttributeValue::Int(i) => Ok(Json::from(*i)),
        AttributeValue::UInt(u) => Ok(Json::from(*u)),
        AttributeValue::Float(f) => Ok(encode_float(*f)),
        AttributeValue::Str(s) => Ok(Json::from(s.as_str())),
        AttributeValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Json::from(s)),
            Err(_) => Ok(serde_json::json!({ BYTES_KEY: BASE64.encode(bytes) })),
        },
        AttributeValue::List(values) => values
            .iter()
            .map(|v| encode_attribute(v, path, name, &mut *encode_ref))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        AttributeValue::Map(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if key == ZARR_DTYPE_KEY {
                    return Err(not_serializable("mapping uses the reserved zarr_dtype key"));
                }
                out.insert(
                    key.clone(),
                    encode_attribute(v, path, name, &mut *encode_ref)?,
                );
            }
            Ok(Json::Object(out))
        }
        AttributeValue::Reference(reference) => {
            let record = encode_ref(reference)?;
            let record = serde_json::to_value(&record)
                .map_err(|err| not_serializable(&err.to_string()))?;
            Ok(serde_json::json!({ ZARR_DTYPE_KEY: "object", VALUE_KEY: record }))
        }
    }
}

fn encode_float(f: f64) -> Json {
    if f.is_nan() {
        Json::from("NaN")
    } else if f.is_infinite() {
        Json::from(if f > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        // Finite floats always convert.
        serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
    }
}

/// Decode a JSON attribute value.
///
/// Decoding widens symmetrically with encoding: the strings `"NaN"`,
/// `"Infinity"`, and `"-Infinity"` decode as floats, and UTF-8-decodable byte
/// strings come back as [`AttributeValue::Str`].
///
/// # Errors
/// Returns [`ZarrError`] if a reference wrapper is malformed or uses the
/// reserved `"region"` kind.
pub fn decode_attribute(value: &Json, path: &NodePath) -> Result<AttributeValue, ZarrError> {
    match value {
        Json::Null => Ok(AttributeValue::Null),
        Json::Bool(b) => Ok(AttributeValue::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(AttributeValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(AttributeValue::UInt(u))
            } else {
                Ok(AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Json::String(s) => Ok(match s.as_str() {
            "NaN" => AttributeValue::Float(f64::NAN),
            "Infinity" => AttributeValue::Float(f64::INFINITY),
            "-Infinity" => AttributeValue::Float(f64::NEG_INFINITY),
            _ => AttributeValue::Str(s.clone()),
        }),
        Json::Array(values) => values
            .iter()
            .map(|v| decode_attribute(v, path))
            .collect::<Result<Vec<_>, _>>()
            .map(AttributeValue::List),
        Json::Object(map) => {
            if let Some(kind) = map.get(ZARR_DTYPE_KEY).and_then(Json::as_str) {
                match kind {
                    "object" => {
                        let record = map.get(VALUE_KEY).ok_or_else(|| {
                            ZarrError::invalid_metadata(path, "reference wrapper without value")
                        })?;
                        let record: ReferenceRecord = serde_json::from_value(record.clone())
                            .map_err(|err| ZarrError::invalid_metadata(path, err))?;
                        return Ok(AttributeValue::Reference(RefValue::Record(record)));
                    }
                    "region" => {
                        return Err(ZarrError::RegionReferenceUnsupported(path.clone()));
                    }
                    _ => {}
                }
            }
            if map.len() == 1 {
                if let Some(b64) = map.get(BYTES_KEY).and_then(Json::as_str) {
                    let bytes = BASE64
                        .decode(b64)
                        .map_err(|err| ZarrError::invalid_metadata(path, err))?;
                    return Ok(AttributeValue::Bytes(bytes));
                }
            }
            let mut out = BTreeMap::new();
            for (key, v) in map {
                out.insert(key.clone(), decode_attribute(v, path)?);
            }
            Ok(AttributeValue::Map(out))
        }
    }
}
