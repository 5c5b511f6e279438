//! Zarr V2 metadata documents.
//!
//! A file is a store holding, per node, a `.zgroup` or `.zarray` document and
//! an optional `.zattrs` document, plus an optional consolidated `.zmetadata`
//! index at the root.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{node::NodePath, storage::StoreKey};

/// The `.zgroup` document name.
pub const ZGROUP: &str = ".zgroup";
/// The `.zarray` document name.
pub const ZARRAY: &str = ".zarray";
/// The `.zattrs` document name.
pub const ZATTRS: &str = ".zattrs";
/// The consolidated metadata index name.
pub const ZMETADATA: &str = ".zmetadata";

/// Return the `.zgroup` key for a node path.
#[must_use]
pub fn group_key(path: &NodePath) -> StoreKey {
    path.key_of(ZGROUP)
}

/// Return the `.zarray` key for a node path.
#[must_use]
pub fn array_key(path: &NodePath) -> StoreKey {
    path.key_of(ZARRAY)
}

/// Return the `.zattrs` key for a node path.
#[must_use]
pub fn attrs_key(path: &NodePath) -> StoreKey {
    path.key_of(ZATTRS)
}

/// Return the consolidated metadata key.
#[must_use]
pub fn consolidated_key() -> StoreKey {
    NodePath::root().key_of(ZMETADATA)
}

/// Return the chunk data key for a node path and chunk grid indices.
#[must_use]
pub fn chunk_key(path: &NodePath, indices: &[u64], separator: ChunkKeySeparator) -> StoreKey {
    let separator = match separator {
        ChunkKeySeparator::Dot => ".",
        ChunkKeySeparator::Slash => "/",
    };
    let chunk_name = indices
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(separator);
    // A zero-dimensional (scalar) array has a single chunk named "0".
    let chunk_name = if chunk_name.is_empty() {
        "0".to_string()
    } else {
        chunk_name
    };
    path.key_of(&chunk_name)
}

/// Group metadata (`.zgroup`).
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug, Display, Default)]
#[display("{}", serde_json::to_string(self).unwrap_or_default())]
pub struct GroupMetadata {
    /// An integer defining the version of the storage specification. Must be `2`.
    #[serde(default)]
    pub zarr_format: monostate::MustBe!(2u64),
}

/// Array metadata (`.zarray`).
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Display)]
#[display("{}", serde_json::to_string(self).unwrap_or_default())]
pub struct ArrayMetadata {
    /// An integer defining the version of the storage specification. Must be `2`.
    pub zarr_format: monostate::MustBe!(2u64),
    /// The length of each dimension of the array.
    pub shape: Vec<u64>,
    /// The length of each dimension of a chunk of the array.
    pub chunks: Vec<u64>,
    /// The physical data type of the array.
    pub dtype: DataTypeMetadata,
    /// The primary compression codec configuration, or null for raw chunks.
    pub compressor: Option<CodecMetadata>,
    /// The default value for uninitialized portions of the array.
    pub fill_value: FillValueMetadata,
    /// Either `C` or `F`, the layout of bytes within each chunk.
    pub order: ArrayOrder,
    /// Codec configurations applied before compression, or null.
    #[serde(default)]
    pub filters: Option<Vec<CodecMetadata>>,
    /// The separator placed between the dimensions of a chunk key.
    #[serde(default)]
    pub dimension_separator: ChunkKeySeparator,
}

/// The physical data type in an [`ArrayMetadata`] document.
///
/// Either a NumPy-style dtype string or a structured list of
/// `[field_name, dtype]` pairs.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(untagged)]
pub enum DataTypeMetadata {
    /// A simple dtype string, e.g. `"<i4"`.
    Simple(String),
    /// A structured dtype.
    Structured(Vec<(String, String)>),
}

/// An opaque codec configuration: an `id` plus arbitrary parameters.
///
/// Unknown codec parameters round-trip unmodified so that foreign files can be
/// exported without understanding their compressors.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct CodecMetadata {
    /// The codec identifier, e.g. `"gzip"`.
    pub id: String,
    /// Codec parameters.
    #[serde(flatten)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

impl CodecMetadata {
    /// Create codec metadata with no parameters.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            configuration: serde_json::Map::default(),
        }
    }
}

/// A scalar fill value.
///
/// Non-finite floats are encoded as the strings `"NaN"`, `"Infinity"`, and
/// `"-Infinity"`.
#[derive(Clone, PartialEq, Debug, Default)]
pub enum FillValueMetadata {
    /// No fill value.
    #[default]
    Null,
    /// NaN (not-a-number).
    NaN,
    /// Positive infinity.
    Infinity,
    /// Negative infinity.
    NegInfinity,
    /// A number.
    Number(serde_json::Number),
    /// A string (variable-length data types).
    String(String),
}

impl<'de> Deserialize<'de> for FillValueMetadata {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum FillValueType {
            String(String),
            Number(serde_json::Number),
            Null,
        }
        match FillValueType::deserialize(d)? {
            FillValueType::String(string) => match string.as_str() {
                "NaN" => Ok(Self::NaN),
                "Infinity" => Ok(Self::Infinity),
                "-Infinity" => Ok(Self::NegInfinity),
                _ => Ok(Self::String(string)),
            },
            FillValueType::Number(number) => Ok(Self::Number(number)),
            FillValueType::Null => Ok(Self::Null),
        }
    }
}

impl Serialize for FillValueMetadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::NaN => serializer.serialize_str("NaN"),
            Self::Infinity => serializer.serialize_str("Infinity"),
            Self::NegInfinity => serializer.serialize_str("-Infinity"),
            Self::Number(number) => number.serialize(serializer),
            Self::String(string) => serializer.serialize_str(string),
        }
    }
}

/// The layout of bytes within each chunk of the array.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ArrayOrder {
    /// Row-major order. The last dimension varies fastest.
    #[default]
    C,
    /// Column-major order. The first dimension varies fastest.
    F,
}

/// The separator placed between the dimensions of a chunk key.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ChunkKeySeparator {
    /// `.`, the flat directory layout.
    #[default]
    #[serde(rename = ".")]
    Dot,
    /// `/`, the nested directory layout.
    #[serde(rename = "/")]
    Slash,
}

/// The consolidated metadata index (`.zmetadata`).
///
/// Aggregates every metadata document in the file under a single key so that
/// remote readers can traverse without listing.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ConsolidatedMetadata {
    /// The consolidated metadata format version. Must be `1`.
    pub zarr_consolidated_format: monostate::MustBe!(1u64),
    /// Metadata documents by store key.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ConsolidatedMetadata {
    /// Create an index over the given documents.
    #[must_use]
    pub fn new(metadata: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            zarr_consolidated_format: monostate::MustBe!(1u64),
            metadata,
        }
    }
}
