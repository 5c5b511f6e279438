//! The pluggable object codec.
//!
//! Reference-typed datasets and compound datasets with variable-length fields
//! store opaque object slots. The codec that fills those slots is selectable
//! per dataset: the default produces self-contained binary records, the
//! alternative produces JSON. The chosen codec is recorded as a filter id in
//! the array metadata so readers do not have to guess.
//!
//! The binary wire types mirror the JSON records without `flatten` or
//! untagged enums, which `bincode` cannot represent.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    data_type::{CompoundField, DataType},
    error::ZarrError,
    link::ReferenceRecord,
};

/// The filter id of the binary object codec.
pub const OBJECT_CODEC_BINARY: &str = "binary";
/// The filter id of the JSON object codec.
pub const OBJECT_CODEC_JSON: &str = "json2";

/// The object codec applied to a dataset's object slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectCodecKind {
    /// Self-contained binary records.
    #[default]
    Binary,
    /// JSON records.
    Json,
}

impl ObjectCodecKind {
    /// The filter id recorded in the array metadata.
    #[must_use]
    pub fn filter_id(self) -> &'static str {
        match self {
            Self::Binary => OBJECT_CODEC_BINARY,
            Self::Json => OBJECT_CODEC_JSON,
        }
    }

    /// Resolve a filter id.
    #[must_use]
    pub fn from_filter_id(id: &str) -> Option<Self> {
        match id {
            OBJECT_CODEC_BINARY => Some(Self::Binary),
            OBJECT_CODEC_JSON => Some(Self::Json),
            _ => None,
        }
    }
}

/// A compound record field value.
#[derive(Clone, Debug, PartialEq)]
pub enum WireScalar {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
    /// An object reference.
    Ref(ReferenceRecord),
}

/// A [`ReferenceRecord`] mirror without `flatten`.
#[derive(Serialize, Deserialize)]
struct BinaryReference {
    source: String,
    path: String,
    object_id: Option<String>,
    source_object_id: Option<String>,
    /// Unknown record keys as JSON text; empty when there are none.
    extra_json: String,
}

impl BinaryReference {
    fn from_record(record: &ReferenceRecord) -> Result<Self, ZarrError> {
        let extra_json = if record.extra.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&record.extra).map_err(codec_error)?
        };
        Ok(Self {
            source: record.source.clone(),
            path: record.path.clone(),
            object_id: record.object_id.clone(),
            source_object_id: record.source_object_id.clone(),
            extra_json,
        })
    }

    fn into_record(self) -> Result<ReferenceRecord, ZarrError> {
        let extra = if self.extra_json.is_empty() {
            serde_json::Map::default()
        } else {
            serde_json::from_str(&self.extra_json).map_err(codec_error)?
        };
        Ok(ReferenceRecord {
            source: self.source,
            path: self.path,
            object_id: self.object_id,
            source_object_id: self.source_object_id,
            extra,
        })
    }
}

/// A [`WireScalar`] mirror with an externally tagged representation.
#[derive(Serialize, Deserialize)]
enum BinaryScalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Ref(BinaryReference),
}

fn codec_error(err: impl std::fmt::Display) -> ZarrError {
    ZarrError::InternalInvariant(format!("object codec: {err}"))
}

/// Encode reference records.
///
/// # Errors
/// Returns [`ZarrError`] if serialization fails.
pub fn encode_references(
    kind: ObjectCodecKind,
    records: &[ReferenceRecord],
) -> Result<Vec<u8>, ZarrError> {
    match kind {
        ObjectCodecKind::Binary => {
            let records = records
                .iter()
                .map(BinaryReference::from_record)
                .collect::<Result<Vec<_>, _>>()?;
            bincode::serialize(&records).map_err(codec_error)
        }
        ObjectCodecKind::Json => serde_json::to_vec(records).map_err(codec_error),
    }
}

/// Decode reference records.
///
/// # Errors
/// Returns [`ZarrError`] if the payload does not decode.
pub fn decode_references(
    kind: ObjectCodecKind,
    bytes: &[u8],
) -> Result<Vec<ReferenceRecord>, ZarrError> {
    match kind {
        ObjectCodecKind::Binary => {
            let records: Vec<BinaryReference> =
                bincode::deserialize(bytes).map_err(codec_error)?;
            records
                .into_iter()
                .map(BinaryReference::into_record)
                .collect()
        }
        ObjectCodecKind::Json => serde_json::from_slice(bytes).map_err(codec_error),
    }
}

/// Encode compound records with variable-length fields.
///
/// # Errors
/// Returns [`ZarrError`] if serialization fails.
pub fn encode_rows(
    kind: ObjectCodecKind,
    rows: &[Vec<WireScalar>],
) -> Result<Vec<u8>, ZarrError> {
    match kind {
        ObjectCodecKind::Binary => {
            let rows = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|scalar| {
                            Ok(match scalar {
                                WireScalar::Bool(b) => BinaryScalar::Bool(*b),
                                WireScalar::Int(i) => BinaryScalar::Int(*i),
                                WireScalar::UInt(u) => BinaryScalar::UInt(*u),
                                WireScalar::Float(f) => BinaryScalar::Float(*f),
                                WireScalar::Str(s) => BinaryScalar::Str(s.clone()),
                                WireScalar::Ref(record) => {
                                    BinaryScalar::Ref(BinaryReference::from_record(record)?)
                                }
                            })
                        })
                        .collect::<Result<Vec<_>, ZarrError>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            bincode::serialize(&rows).map_err(codec_error)
        }
        ObjectCodecKind::Json => {
            let rows = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(scalar_to_json)
                        .collect::<Result<Vec<_>, _>>()
                        .map(Json::Array)
                })
                .collect::<Result<Vec<_>, ZarrError>>()?;
            serde_json::to_vec(&rows).map_err(codec_error)
        }
    }
}

/// Decode compound records with variable-length fields.
///
/// The JSON representation is positional, so the expected `fields` drive the
/// interpretation of each column.
///
/// # Errors
/// Returns [`ZarrError`] if the payload does not decode or a column does not
/// match its field's data type.
pub fn decode_rows(
    kind: ObjectCodecKind,
    bytes: &[u8],
    fields: &[CompoundField],
) -> Result<Vec<Vec<WireScalar>>, ZarrError> {
    match kind {
        ObjectCodecKind::Binary => {
            let rows: Vec<Vec<BinaryScalar>> =
                bincode::deserialize(bytes).map_err(codec_error)?;
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|scalar| {
                            Ok(match scalar {
                                BinaryScalar::Bool(b) => WireScalar::Bool(b),
                                BinaryScalar::Int(i) => WireScalar::Int(i),
                                BinaryScalar::UInt(u) => WireScalar::UInt(u),
                                BinaryScalar::Float(f) => WireScalar::Float(f),
                                BinaryScalar::Str(s) => WireScalar::Str(s),
                                BinaryScalar::Ref(record) => {
                                    WireScalar::Ref(record.into_record()?)
                                }
                            })
                        })
                        .collect()
                })
                .collect()
        }
        ObjectCodecKind::Json => {
            let rows: Vec<Vec<Json>> = serde_json::from_slice(bytes).map_err(codec_error)?;
            rows.into_iter()
                .map(|row| {
                    row.iter()
                        .zip(fields)
                        .map(|(value, field)| scalar_from_json(value, &field.data_type))
                        .collect()
                })
                .collect()
        }
    }
}

fn scalar_to_json(scalar: &WireScalar) -> Result<Json, ZarrError> {
    Ok(match scalar {
        WireScalar::Bool(b) => Json::Bool(*b),
        WireScalar::Int(i) => Json::from(*i),
        WireScalar::UInt(u) => Json::from(*u),
        WireScalar::Float(f) => {
            if f.is_nan() {
                Json::from("NaN")
            } else if f.is_infinite() {
                Json::from(if *f > 0.0 { "Infinity" } else { "-Infinity" })
            } else {
                serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number)
            }
        }
        WireScalar::Str(s) => Json::from(s.as_str()),
        WireScalar::Ref(record) => serde_json::to_value(record).map_err(codec_error)?,
    })
}

fn scalar_from_json(value: &Json, data_type: &DataType) -> Result<WireScalar, ZarrError> {
    let mismatch = || codec_error(format!("value {value} does not match {data_type:?}"));
    match data_type {
        DataType::Bool => value.as_bool().map(WireScalar::Bool).ok_or_else(mismatch),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            value.as_i64().map(WireScalar::Int).ok_or_else(mismatch)
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            value.as_u64().map(WireScalar::UInt).ok_or_else(mismatch)
        }
        DataType::Float32 | DataType::Float64 => match value {
            Json::Number(n) => Ok(WireScalar::Float(n.as_f64().ok_or_else(mismatch)?)),
            Json::String(s) => match s.as_str() {
                "NaN" => Ok(WireScalar::Float(f64::NAN)),
                "Infinity" => Ok(WireScalar::Float(f64::INFINITY)),
                "-Infinity" => Ok(WireScalar::Float(f64::NEG_INFINITY)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        DataType::Utf8 | DataType::Ascii | DataType::IsoDatetime => value
            .as_str()
            .map(|s| WireScalar::Str(s.to_string()))
            .ok_or_else(mismatch),
        DataType::ObjectReference => {
            let record: ReferenceRecord =
                serde_json::from_value(value.clone()).map_err(codec_error)?;
            Ok(WireScalar::Ref(record))
        }
        DataType::RegionReference | DataType::Compound(_) => Err(mismatch()),
    }
}
