//! The backend error taxonomy.

use thiserror::Error;

use crate::{
    node::{NodePath, NodePathError},
    storage::StorageError,
};

/// A backend error.
///
/// Errors carry the node path of the offending node where one is available.
/// `ObjectIdMismatch`, schema-cache failures, and consolidation failures are
/// warnings rather than errors; they are logged through [`log::warn!`] and do
/// not abort the surrounding operation.
#[derive(Debug, Error)]
pub enum ZarrError {
    /// The store, or a node within it, does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A create-mode open saw a non-empty store, or a node already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// An unsupported store kind, dtype, or mode.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// An attribute value that cannot be serialized to JSON.
    #[error("attribute {name} at {path} is not serializable: {reason}")]
    NotSerializable {
        /// Node path of the attribute carrier.
        path: NodePath,
        /// Attribute name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// A chunk coordinate was written more than once in a single iterative write.
    #[error("overlapping chunk write at {path} coordinates {coordinates:?}")]
    OverlappingChunks {
        /// Dataset path.
        path: NodePath,
        /// The duplicated chunk coordinates.
        coordinates: Vec<u64>,
    },
    /// An append saw a divergent value for an existing attribute.
    #[error("attribute {name} at {path} conflicts with the stored value")]
    AttributeConflict {
        /// Node path of the attribute carrier.
        path: NodePath,
        /// Attribute name.
        name: String,
    },
    /// A reference or link targets an external file that cannot be opened.
    #[error("external file {file} is unavailable: {reason}")]
    ExternalUnavailable {
        /// The relative source of the external file.
        file: String,
        /// Why the open failed.
        reason: String,
    },
    /// A link target path is missing from its file.
    #[error("broken link to {0}")]
    BrokenLink(NodePath),
    /// Region references are reserved but not implemented.
    #[error("region references are not supported (dataset {0})")]
    RegionReferenceUnsupported(NodePath),
    /// The schema cache could not be written or read.
    ///
    /// Non-fatal on write; surfaced to callers that read the cache directly.
    #[error("schema cache error: {0}")]
    SchemaCache(String),
    /// A bug: an internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
    /// An invalid node path.
    #[error(transparent)]
    NodePath(#[from] NodePathError),
    /// An underlying storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An error serializing or deserializing a metadata document.
    #[error("error parsing metadata for {path}: {reason}")]
    InvalidMetadata {
        /// Node path of the document.
        path: NodePath,
        /// Parse failure detail.
        reason: String,
    },
}

impl ZarrError {
    pub(crate) fn invalid_metadata(path: &NodePath, err: impl std::fmt::Display) -> Self {
        Self::InvalidMetadata {
            path: path.clone(),
            reason: err.to_string(),
        }
    }
}
