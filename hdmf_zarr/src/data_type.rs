//! Semantic data types and their physical storage mapping.
//!
//! A [`DataType`] is the semantic dtype declared by the data-modeling layer
//! (`"int32"`, `"text"`, `"object"`, a compound field list, …). Each maps to a
//! physical Zarr V2 dtype string (`"<i4"`, `"|O"`, a structured list, …); the
//! reverse direction additionally consults the `zarr_dtype` attribute, which
//! records semantics the physical dtype cannot (references, text kinds,
//! scalars).

use thiserror::Error;

use crate::metadata::DataTypeMetadata;

/// A semantic data type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    /// A signed 8-bit integer (`int8`).
    Int8,
    /// A signed 16-bit integer (`int16`).
    Int16,
    /// A signed 32-bit integer (`int`, `int32`).
    Int32,
    /// A signed 64-bit integer (`long`, `int64`).
    Int64,
    /// An unsigned 8-bit integer (`uint8`).
    UInt8,
    /// An unsigned 16-bit integer (`uint16`).
    UInt16,
    /// An unsigned 32-bit integer (`uint`, `uint32`).
    UInt32,
    /// An unsigned 64-bit integer (`uint64`).
    UInt64,
    /// A 32-bit float (`float`, `float32`).
    Float32,
    /// A 64-bit float (`double`, `float64`).
    Float64,
    /// An 8-bit boolean (`bool`).
    Bool,
    /// Variable-length UTF-8 text (`text`, `utf`, `utf8`, `utf-8`).
    Utf8,
    /// Variable-length ASCII text (`ascii`, `str`).
    Ascii,
    /// Variable-length ASCII ISO-8601 date-time text (`isodatetime`).
    IsoDatetime,
    /// An object reference (`ref`, `reference`, `object`).
    ObjectReference,
    /// A region reference. Reserved; writes fail.
    RegionReference,
    /// A compound (structured) type.
    Compound(Vec<CompoundField>),
}

/// A field of a compound [`DataType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompoundField {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

/// An unknown or unsupported data type error.
#[derive(Debug, Error)]
#[error("data type {0} is not supported")]
pub struct DataTypeError(String);

impl DataType {
    /// Resolve a declared dtype name.
    ///
    /// # Errors
    /// Returns [`DataTypeError`] if `name` is not in the declared-name table.
    pub fn from_declared(name: &str) -> Result<Self, DataTypeError> {
        match name {
            "float" | "float32" => Ok(Self::Float32),
            "double" | "float64" => Ok(Self::Float64),
            "long" | "int64" => Ok(Self::Int64),
            "int" | "int32" => Ok(Self::Int32),
            "int16" | "short" => Ok(Self::Int16),
            "int8" => Ok(Self::Int8),
            "uint64" => Ok(Self::UInt64),
            "uint" | "uint32" => Ok(Self::UInt32),
            "uint16" => Ok(Self::UInt16),
            "uint8" => Ok(Self::UInt8),
            "bool" => Ok(Self::Bool),
            "text" | "utf" | "utf8" | "utf-8" => Ok(Self::Utf8),
            "ascii" | "str" => Ok(Self::Ascii),
            "isodatetime" => Ok(Self::IsoDatetime),
            "ref" | "reference" | "object" => Ok(Self::ObjectReference),
            "region" => Ok(Self::RegionReference),
            _ => Err(DataTypeError(name.to_string())),
        }
    }

    /// The canonical declared name of this data type.
    #[must_use]
    pub fn declared_name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Utf8 => "utf-8",
            Self::Ascii => "ascii",
            Self::IsoDatetime => "isodatetime",
            Self::ObjectReference => "object",
            Self::RegionReference => "region",
            Self::Compound(_) => "compound",
        }
    }

    /// The physical Zarr V2 dtype of this data type.
    #[must_use]
    pub fn to_metadata(&self) -> DataTypeMetadata {
        match self {
            Self::Int8 => DataTypeMetadata::Simple("|i1".to_string()),
            Self::Int16 => DataTypeMetadata::Simple("<i2".to_string()),
            Self::Int32 => DataTypeMetadata::Simple("<i4".to_string()),
            Self::Int64 => DataTypeMetadata::Simple("<i8".to_string()),
            Self::UInt8 => DataTypeMetadata::Simple("|u1".to_string()),
            Self::UInt16 => DataTypeMetadata::Simple("<u2".to_string()),
            Self::UInt32 => DataTypeMetadata::Simple("<u4".to_string()),
            Self::UInt64 => DataTypeMetadata::Simple("<u8".to_string()),
            Self::Float32 => DataTypeMetadata::Simple("<f4".to_string()),
            Self::Float64 => DataTypeMetadata::Simple("<f8".to_string()),
            Self::Bool => DataTypeMetadata::Simple("|b1".to_string()),
            Self::Utf8
            | Self::Ascii
            | Self::IsoDatetime
            | Self::ObjectReference
            | Self::RegionReference => DataTypeMetadata::Simple("|O".to_string()),
            Self::Compound(fields) => DataTypeMetadata::Structured(
                fields
                    .iter()
                    .map(|field| {
                        let datatype = match field.data_type.to_metadata() {
                            DataTypeMetadata::Simple(s) => s,
                            // Nested compounds do not occur in the model.
                            DataTypeMetadata::Structured(_) => "|O".to_string(),
                        };
                        (field.name.clone(), datatype)
                    })
                    .collect(),
            ),
        }
    }

    /// Resolve a physical Zarr V2 dtype string.
    ///
    /// Both byte orders are accepted; `|O` resolves to [`DataType::Utf8`]
    /// unless the `zarr_dtype` attribute refines it (see
    /// [`DataType::from_metadata_with_hint`]).
    ///
    /// # Errors
    /// Returns [`DataTypeError`] if the dtype string is not supported.
    pub fn from_metadata(metadata: &DataTypeMetadata) -> Result<Self, DataTypeError> {
        match metadata {
            DataTypeMetadata::Simple(s) => match s.as_str() {
                "|i1" => Ok(Self::Int8),
                "<i2" | ">i2" => Ok(Self::Int16),
                "<i4" | ">i4" => Ok(Self::Int32),
                "<i8" | ">i8" => Ok(Self::Int64),
                "|u1" => Ok(Self::UInt8),
                "<u2" | ">u2" => Ok(Self::UInt16),
                "<u4" | ">u4" => Ok(Self::UInt32),
                "<u8" | ">u8" => Ok(Self::UInt64),
                "<f4" | ">f4" => Ok(Self::Float32),
                "<f8" | ">f8" => Ok(Self::Float64),
                "|b1" => Ok(Self::Bool),
                "|O" => Ok(Self::Utf8),
                _ => Err(DataTypeError(s.clone())),
            },
            DataTypeMetadata::Structured(fields) => Ok(Self::Compound(
                fields
                    .iter()
                    .map(|(name, datatype)| {
                        Ok(CompoundField {
                            name: name.clone(),
                            data_type: Self::from_metadata(&DataTypeMetadata::Simple(
                                datatype.clone(),
                            ))?,
                        })
                    })
                    .collect::<Result<Vec<_>, DataTypeError>>()?,
            )),
        }
    }

    /// Resolve a physical dtype refined by the `zarr_dtype` attribute value.
    ///
    /// # Errors
    /// Returns [`DataTypeError`] if the dtype string or hint is not supported.
    pub fn from_metadata_with_hint(
        metadata: &DataTypeMetadata,
        hint: Option<&serde_json::Value>,
    ) -> Result<Self, DataTypeError> {
        match hint {
            Some(serde_json::Value::String(hint)) if hint != "scalar" => {
                Self::from_declared(hint)
            }
            Some(serde_json::Value::Array(fields)) => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        let name = field
                            .get("name")
                            .and_then(serde_json::Value::as_str)
                            .ok_or_else(|| DataTypeError("compound field".to_string()))?;
                        let dtype = field
                            .get("dtype")
                            .and_then(serde_json::Value::as_str)
                            .ok_or_else(|| DataTypeError("compound field".to_string()))?;
                        Ok(CompoundField {
                            name: name.to_string(),
                            data_type: Self::from_declared(dtype)?,
                        })
                    })
                    .collect::<Result<Vec<_>, DataTypeError>>()?;
                Ok(Self::Compound(fields))
            }
            _ => Self::from_metadata(metadata),
        }
    }

    /// The `zarr_dtype` attribute value recording this type's semantics, if
    /// the physical dtype alone does not.
    #[must_use]
    pub fn hint(&self) -> Option<serde_json::Value> {
        match self {
            Self::ObjectReference => Some("object".into()),
            Self::RegionReference => Some("region".into()),
            Self::Utf8 => Some("utf-8".into()),
            Self::Ascii => Some("ascii".into()),
            Self::IsoDatetime => Some("isodatetime".into()),
            Self::Compound(fields) if !self.is_fixed_size() => Some(serde_json::Value::Array(
                fields
                    .iter()
                    .map(|field| {
                        serde_json::json!({
                            "name": field.name,
                            "dtype": field.data_type.declared_name(),
                        })
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    /// The fixed element size in bytes, or [`None`] for variable-size types.
    #[must_use]
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::Utf8
            | Self::Ascii
            | Self::IsoDatetime
            | Self::ObjectReference
            | Self::RegionReference => None,
            Self::Compound(fields) => fields
                .iter()
                .map(|field| field.data_type.fixed_size())
                .sum(),
        }
    }

    /// Indicates if every element has a fixed size.
    #[must_use]
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Indicates if this is a reference kind.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::ObjectReference | Self::RegionReference)
    }

    /// Indicates if this is a variable-length text kind.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Ascii | Self::IsoDatetime)
    }
}
