//! The in-memory builder tree.
//!
//! Builders are the intermediate representation exchanged with the
//! data-modeling layer: a [`GroupBuilder`] holds named subgroups, datasets,
//! links, and attributes; a [`DatasetBuilder`] holds a [`Value`] and
//! attributes; a [`LinkBuilder`] points at another builder or at a node in
//! another file.
//!
//! All builders of one tree live in a [`BuilderArena`] and refer to each other
//! by [`BuilderId`]. Object references inside dataset values and attributes
//! are also encoded as identities ([`RefValue::Builder`]), so reference cycles
//! are represented as repeated ids and are never traversed.

use std::collections::BTreeMap;

use crate::{
    attribute::AttributeValue,
    chunk::ChunkIterator,
    data_type::{CompoundField, DataType},
    io::DatasetHandle,
    link::ReferenceRecord,
    metadata::{CodecMetadata, FillValueMetadata},
};

/// The identity of a builder within its [`BuilderArena`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BuilderId(pub(crate) usize);

/// A node in a builder arena.
#[derive(Debug)]
pub enum Builder {
    /// A group.
    Group(GroupBuilder),
    /// A dataset.
    Dataset(DatasetBuilder),
    /// A link.
    Link(LinkBuilder),
}

impl Builder {
    /// The builder's name within its parent.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Group(group) => &group.name,
            Self::Dataset(dataset) => &dataset.name,
            Self::Link(link) => &link.name,
        }
    }
}

/// An arena of builders with a designated root group.
#[derive(Debug, Default)]
pub struct BuilderArena {
    nodes: Vec<Builder>,
}

impl BuilderArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a builder and return its identity.
    pub fn insert(&mut self, builder: Builder) -> BuilderId {
        let id = BuilderId(self.nodes.len());
        self.nodes.push(builder);
        id
    }

    /// Insert a group builder.
    pub fn insert_group(&mut self, group: GroupBuilder) -> BuilderId {
        self.insert(Builder::Group(group))
    }

    /// Insert a dataset builder.
    pub fn insert_dataset(&mut self, dataset: DatasetBuilder) -> BuilderId {
        self.insert(Builder::Dataset(dataset))
    }

    /// Insert a link builder.
    pub fn insert_link(&mut self, link: LinkBuilder) -> BuilderId {
        self.insert(Builder::Link(link))
    }

    /// Borrow a builder.
    ///
    /// # Panics
    /// Panics if `id` is not from this arena.
    #[must_use]
    pub fn get(&self, id: BuilderId) -> &Builder {
        &self.nodes[id.0]
    }

    /// Mutably borrow a builder.
    ///
    /// # Panics
    /// Panics if `id` is not from this arena.
    #[must_use]
    pub fn get_mut(&mut self, id: BuilderId) -> &mut Builder {
        &mut self.nodes[id.0]
    }

    /// Borrow a group builder, or [`None`] if `id` is not a group.
    #[must_use]
    pub fn group(&self, id: BuilderId) -> Option<&GroupBuilder> {
        match self.get(id) {
            Builder::Group(group) => Some(group),
            Builder::Dataset(_) | Builder::Link(_) => None,
        }
    }

    /// Borrow a dataset builder, or [`None`] if `id` is not a dataset.
    #[must_use]
    pub fn dataset(&self, id: BuilderId) -> Option<&DatasetBuilder> {
        match self.get(id) {
            Builder::Dataset(dataset) => Some(dataset),
            Builder::Group(_) | Builder::Link(_) => None,
        }
    }

    /// The number of builders in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Indicates if the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A group builder.
#[derive(Debug, Default)]
pub struct GroupBuilder {
    /// The group's name within its parent (`""` for the root).
    pub name: String,
    /// The group's attributes.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Child groups by name.
    pub subgroups: BTreeMap<String, BuilderId>,
    /// Child datasets by name.
    pub datasets: BTreeMap<String, BuilderId>,
    /// Child links by name.
    pub links: BTreeMap<String, BuilderId>,
}

impl GroupBuilder {
    /// Create a named, empty group builder.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) -> &mut Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

/// A dataset builder.
#[derive(Debug)]
pub struct DatasetBuilder {
    /// The dataset's name within its parent.
    pub name: String,
    /// The declared data type.
    pub data_type: DataType,
    /// The dataset's value.
    pub value: Value,
    /// The dataset's attributes.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Per-dataset I/O overrides.
    pub data_io: ZarrDataIO,
}

impl DatasetBuilder {
    /// Create a dataset builder from a name, declared dtype, and value.
    #[must_use]
    pub fn new(name: &str, data_type: DataType, value: Value) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            value,
            attributes: BTreeMap::new(),
            data_io: ZarrDataIO::default(),
        }
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) -> &mut Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Set per-dataset I/O overrides.
    #[must_use]
    pub fn with_data_io(mut self, data_io: ZarrDataIO) -> Self {
        self.data_io = data_io;
        self
    }
}

/// A link builder.
#[derive(Debug)]
pub struct LinkBuilder {
    /// The link's name within its parent group.
    pub name: String,
    /// The link target.
    pub target: LinkTarget,
}

impl LinkBuilder {
    /// Create a soft link to another builder in the same arena.
    #[must_use]
    pub fn soft(name: &str, target: BuilderId) -> Self {
        Self {
            name: name.to_string(),
            target: LinkTarget::Builder(target),
        }
    }

    /// Create an external link to a node in another file.
    #[must_use]
    pub fn external(name: &str, source: &str, path: &str, object_id: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            target: LinkTarget::External {
                source: source.to_string(),
                path: path.to_string(),
                object_id,
            },
        }
    }

    /// Indicates if this is an external link.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.target, LinkTarget::External { .. })
    }
}

/// The target of a [`LinkBuilder`].
#[derive(Debug)]
pub enum LinkTarget {
    /// A builder in the same arena (a soft link).
    Builder(BuilderId),
    /// A node in another file (an external link).
    External {
        /// The path of the target file, relative to this file's root.
        source: String,
        /// The absolute in-file path of the target node.
        path: String,
        /// The target's object id, if typed.
        object_id: Option<String>,
    },
}

/// An object reference value inside a dataset element or attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum RefValue {
    /// A reference to a builder in the same arena.
    Builder(BuilderId),
    /// A materialized reference record (read or export side).
    Record(ReferenceRecord),
}

/// A dataset value.
pub enum Value {
    /// A scalar.
    Scalar(ScalarValue),
    /// An n-dimensional array of fixed or variable-length elements.
    Array {
        /// Flat element data in C order.
        data: ElementData,
        /// The array shape.
        shape: Vec<u64>,
    },
    /// A table of compound records.
    Compound {
        /// The record fields.
        fields: Vec<CompoundField>,
        /// The records, one [`ScalarValue`] per field.
        rows: Vec<Vec<ScalarValue>>,
    },
    /// A vector of object references.
    References(Vec<RefValue>),
    /// A chunk iterator producing the data incrementally.
    Iterator(ChunkIterator),
    /// A dataset handle produced by a read; chunks load on access.
    Lazy(DatasetHandle),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(value) => f.debug_tuple("Scalar").field(value).finish(),
            Self::Array { data, shape } => f
                .debug_struct("Array")
                .field("data", data)
                .field("shape", shape)
                .finish(),
            Self::Compound { fields, rows } => f
                .debug_struct("Compound")
                .field("fields", fields)
                .field("rows", &rows.len())
                .finish(),
            Self::References(refs) => f.debug_tuple("References").field(refs).finish(),
            Self::Iterator(_) => f.write_str("Iterator(..)"),
            Self::Lazy(handle) => f.debug_tuple("Lazy").field(handle).finish(),
        }
    }
}

/// A scalar value, as stored in scalar datasets and compound record fields.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
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
    Ref(RefValue),
}

/// Flat, typed element data in C order.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementData {
    /// `int8` elements.
    Int8(Vec<i8>),
    /// `int16` elements.
    Int16(Vec<i16>),
    /// `int32` elements.
    Int32(Vec<i32>),
    /// `int64` elements.
    Int64(Vec<i64>),
    /// `uint8` elements.
    UInt8(Vec<u8>),
    /// `uint16` elements.
    UInt16(Vec<u16>),
    /// `uint32` elements.
    UInt32(Vec<u32>),
    /// `uint64` elements.
    UInt64(Vec<u64>),
    /// `float32` elements.
    Float32(Vec<f32>),
    /// `float64` elements.
    Float64(Vec<f64>),
    /// `bool` elements.
    Bool(Vec<bool>),
    /// Variable-length string elements (UTF-8, ASCII, or ISO date-times).
    Str(Vec<String>),
}

impl ElementData {
    /// The number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    /// Indicates if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The natural declared data type of the elements.
    ///
    /// String data defaults to UTF-8; the builder's declared dtype refines it.
    #[must_use]
    pub fn natural_data_type(&self) -> DataType {
        match self {
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt8(_) => DataType::UInt8,
            Self::UInt16(_) => DataType::UInt16,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
            Self::Str(_) => DataType::Utf8,
        }
    }
}

/// Per-dataset I/O overrides, set by the caller to tune storage.
#[derive(Clone, Debug, Default)]
pub struct ZarrDataIO {
    /// Chunk shape override. Defaults to the full array shape.
    pub chunks: Option<Vec<u64>>,
    /// Compressor selection. Defaults to [`CompressorSelection::Default`].
    pub compressor: CompressorSelection,
    /// Fill value override.
    pub fill_value: Option<FillValueMetadata>,
    /// Filter configurations passed through to the array metadata.
    pub filters: Option<Vec<CodecMetadata>>,
    /// Object codec override for reference-typed elements.
    pub object_codec: Option<crate::object_codec::ObjectCodecKind>,
}

/// The compressor applied to a dataset's chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressorSelection {
    /// The backend default (gzip at the default level).
    #[default]
    Default,
    /// No compression.
    Disabled,
    /// Gzip at an explicit level (0–9).
    Gzip(u32),
}
