//! The schema cache.
//!
//! Schema namespaces loaded at write time are serialized into a reserved
//! subtree (default `/specifications`) as scalar variable-length UTF-8
//! datasets carrying JSON text, one per `<namespace>/<version>/<source>`. The
//! root group's `.specloc` attribute points at the subtree so readers can
//! hydrate a [`TypeMap`] from the cache alone.

use std::collections::BTreeMap;

use crate::{
    codec,
    error::ZarrError,
    metadata::{self, ArrayMetadata, DataTypeMetadata, FillValueMetadata, GroupMetadata},
    node::NodePath,
    store::ZarrStore,
};

/// The reserved root attribute pointing at the schema-cache subtree.
pub const SPECLOC: &str = ".specloc";
/// The default schema-cache subtree name.
pub const DEFAULT_SPEC_GROUP: &str = "specifications";

/// A cached schema namespace: a version and its source documents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceCache {
    /// The namespace version.
    pub version: String,
    /// JSON source documents by source name.
    pub sources: BTreeMap<String, serde_json::Value>,
}

/// The registry associating semantic type namespaces with their schema
/// documents.
///
/// A `TypeMap` handle is passed in when an IO handle is opened; there is no
/// process-wide registry. On write the loaded namespaces are cached into the
/// file; on read the cache hydrates the handle's `TypeMap`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeMap {
    namespaces: BTreeMap<String, NamespaceCache>,
}

impl TypeMap {
    /// Create an empty type map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace source document.
    pub fn insert_source(
        &mut self,
        namespace: &str,
        version: &str,
        source: &str,
        document: serde_json::Value,
    ) {
        let entry = self.namespaces.entry(namespace.to_string()).or_default();
        entry.version = version.to_string();
        entry.sources.insert(source.to_string(), document);
    }

    /// The cached namespaces.
    #[must_use]
    pub fn namespaces(&self) -> &BTreeMap<String, NamespaceCache> {
        &self.namespaces
    }

    /// Indicates if no namespaces are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Merge `other` into this map. Existing `(namespace, version)` entries
    /// win; the cache is write-once per namespace version.
    pub fn merge(&mut self, other: TypeMap) {
        for (name, cache) in other.namespaces {
            self.namespaces.entry(name).or_insert(cache);
        }
    }
}

/// Write the schema cache for `type_map` under `/<spec_group>` and return the
/// `.specloc` value.
///
/// Existing `(namespace, version)` datasets are left untouched.
///
/// # Errors
/// Returns [`ZarrError::SchemaCache`] wrapping the underlying failure; the
/// caller treats it as non-fatal.
pub fn write_spec_cache(store: &ZarrStore, type_map: &TypeMap) -> Result<String, ZarrError> {
    let cache_error = |err: ZarrError| ZarrError::SchemaCache(err.to_string());
    let spec_root = NodePath::root()
        .child(DEFAULT_SPEC_GROUP)
        .map_err(|err| ZarrError::SchemaCache(err.to_string()))?;
    write_group(store, &spec_root).map_err(cache_error)?;
    for (name, cache) in type_map.namespaces() {
        let namespace_path = spec_root.child(name).map_err(ZarrError::from)?;
        write_group(store, &namespace_path).map_err(cache_error)?;
        let version_path = namespace_path
            .child(&cache.version)
            .map_err(ZarrError::from)?;
        write_group(store, &version_path).map_err(cache_error)?;
        for (source, document) in &cache.sources {
            let source_path = version_path.child(source).map_err(ZarrError::from)?;
            // Write-once per (namespace, version).
            if store.exists(&source_path).map_err(cache_error)? {
                continue;
            }
            let text = serde_json::to_string(document)
                .map_err(|err| ZarrError::SchemaCache(err.to_string()))?;
            write_string_scalar(store, &source_path, &text).map_err(cache_error)?;
        }
    }
    Ok(spec_root.as_str().to_string())
}

/// Hydrate a [`TypeMap`] from the schema cache at `specloc`.
///
/// # Errors
/// Returns [`ZarrError::SchemaCache`] wrapping the underlying failure.
pub fn read_spec_cache(store: &ZarrStore, specloc: &str) -> Result<TypeMap, ZarrError> {
    let cache_error = |err: ZarrError| ZarrError::SchemaCache(err.to_string());
    let spec_root = NodePath::new(specloc).map_err(|err| ZarrError::SchemaCache(err.to_string()))?;
    let mut type_map = TypeMap::new();
    for namespace_path in store.child_paths(&spec_root).map_err(cache_error)? {
        for version_path in store.child_paths(&namespace_path).map_err(cache_error)? {
            for source_path in store.child_paths(&version_path).map_err(cache_error)? {
                let text = read_string_scalar(store, &source_path).map_err(cache_error)?;
                let document = serde_json::from_str(&text)
                    .map_err(|err| ZarrError::SchemaCache(err.to_string()))?;
                type_map.insert_source(
                    namespace_path.name(),
                    version_path.name(),
                    source_path.name(),
                    document,
                );
            }
        }
    }
    Ok(type_map)
}

fn write_group(store: &ZarrStore, path: &NodePath) -> Result<(), ZarrError> {
    store.set_json(&metadata::group_key(path), path, &GroupMetadata::default())
}

/// Write a scalar variable-length UTF-8 dataset holding `text`.
pub(crate) fn write_string_scalar(
    store: &ZarrStore,
    path: &NodePath,
    text: &str,
) -> Result<(), ZarrError> {
    let array = ArrayMetadata {
        zarr_format: monostate::MustBe!(2u64),
        shape: vec![1],
        chunks: vec![1],
        dtype: DataTypeMetadata::Simple("|O".to_string()),
        compressor: None,
        fill_value: FillValueMetadata::Null,
        order: metadata::ArrayOrder::C,
        filters: Some(vec![crate::metadata::CodecMetadata::new(codec::VLEN_UTF8)]),
        dimension_separator: store.separator(),
    };
    store.set_json(&metadata::array_key(path), path, &array)?;
    let attrs = serde_json::json!({ "zarr_dtype": "scalar" });
    store.set_json(&metadata::attrs_key(path), path, &attrs)?;
    let payload = codec::encode_vlen(&[text.to_string()]);
    store.set_key(
        &metadata::chunk_key(path, &[0], store.separator()),
        payload.into(),
    )
}

/// Read a scalar variable-length UTF-8 dataset.
pub(crate) fn read_string_scalar(store: &ZarrStore, path: &NodePath) -> Result<String, ZarrError> {
    let array: ArrayMetadata = store
        .get_json(&metadata::array_key(path), path)?
        .ok_or_else(|| ZarrError::NotFound(path.to_string()))?;
    let bytes = store
        .get_key(&metadata::chunk_key(path, &[0], array.dimension_separator))?
        .ok_or_else(|| ZarrError::NotFound(path.to_string()))?;
    let strings = codec::decode_vlen(&bytes)?;
    strings
        .into_iter()
        .next()
        .ok_or_else(|| ZarrError::invalid_metadata(path, "empty scalar dataset"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_cache_round_trip() {
        let store = ZarrStore::open_memory("mem://spec");
        let mut type_map = TypeMap::new();
        type_map.insert_source(
            "core",
            "2.6.0",
            "namespace",
            serde_json::json!({"namespaces": [{"name": "core"}]}),
        );
        type_map.insert_source(
            "core",
            "2.6.0",
            "base",
            serde_json::json!({"groups": []}),
        );

        let specloc = write_spec_cache(&store, &type_map).unwrap();
        assert_eq!(specloc, "/specifications");
        let loaded = read_spec_cache(&store, &specloc).unwrap();
        assert_eq!(loaded, type_map);
    }

    #[test]
    fn spec_cache_is_write_once() {
        let store = ZarrStore::open_memory("mem://spec");
        let mut type_map = TypeMap::new();
        type_map.insert_source("core", "2.6.0", "namespace", serde_json::json!({"v": 1}));
        write_spec_cache(&store, &type_map).unwrap();

        // A second write with a divergent document must not clobber the cache.
        let mut altered = TypeMap::new();
        altered.insert_source("core", "2.6.0", "namespace", serde_json::json!({"v": 2}));
        write_spec_cache(&store, &altered).unwrap();

        let loaded = read_spec_cache(&store, "/specifications").unwrap();
        assert_eq!(loaded, type_map);
    }

    #[test]
    fn type_map_merge_prefers_existing() {
        let mut a = TypeMap::new();
        a.insert_source("core", "1.0", "namespace", serde_json::json!({"v": 1}));
        let mut b = TypeMap::new();
        b.insert_source("core", "9.9", "namespace", serde_json::json!({"v": 2}));
        b.insert_source("ext", "0.1", "namespace", serde_json::json!({"v": 3}));
        a.merge(b);
        assert_eq!(a.namespaces()["core"].version, "1.0");
        assert_eq!(a.namespaces()["ext"].version, "0.1");
    }
}
