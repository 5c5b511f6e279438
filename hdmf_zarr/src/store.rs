//! The store abstraction.
//!
//! A [`ZarrStore`] is a uniform view over the concrete byte stores: a flat or
//! nested directory, an auto-deleting temporary directory, a read-only HTTP
//! location, or a caller-supplied custom store. It carries the open [`Mode`],
//! the source path used as a link origin, and the preferred chunk key
//! separator, and it owns metadata consolidation.

use std::{collections::BTreeMap, collections::HashMap, path::Path, sync::Arc};

use crate::{
    error::ZarrError,
    metadata::{
        self, consolidated_key, ChunkKeySeparator, ConsolidatedMetadata, ZARRAY, ZATTRS, ZGROUP,
    },
    node::NodePath,
    storage::{
        store::{FilesystemStore, HttpStore, MemoryStore, TempStore},
        Bytes, MaybeBytes, ReadableListableStorage, ReadableStorage,
        ReadableWritableListableStorage, StoreKey, StorePrefix,
    },
};

/// The mode a store is opened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Create a new file; fails if the store is non-empty.
    Create,
    /// Open an existing file for reading and writing, creating it if absent.
    Append,
    /// Open an existing file read-only.
    Read,
    /// Open an existing file for reading and writing; fails if absent.
    ReadWrite,
}

impl Mode {
    /// Indicates if the mode permits writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Read)
    }
}

enum Backend {
    ReadWrite(ReadableWritableListableStorage),
    ReadOnly(ReadableStorage),
}

/// A uniform view over a chunked-array store.
pub struct ZarrStore {
    backend: Backend,
    source: String,
    mode: Mode,
    separator: ChunkKeySeparator,
    // Keeps the temporary directory alive for temp-backed stores.
    _tempdir: Option<Arc<TempStore>>,
}

impl std::fmt::Debug for ZarrStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrStore")
            .field("source", &self.source)
            .field("mode", &self.mode)
            .field("separator", &self.separator)
            .finish_non_exhaustive()
    }
}

impl ZarrStore {
    /// Open a flat directory store (chunk keys use the `.` separator).
    ///
    /// # Errors
    /// Returns [`ZarrError`] per the mode rules: *AlreadyExists* when
    /// [`Mode::Create`] sees a non-empty store, *NotFound* when
    /// [`Mode::Read`]/[`Mode::ReadWrite`] see a missing one.
    pub fn open_directory<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self, ZarrError> {
        Self::open_directory_with_separator(path, mode, ChunkKeySeparator::Dot)
    }

    /// Open a nested directory store (chunk keys use the `/` separator).
    ///
    /// # Errors
    /// See [`ZarrStore::open_directory`].
    pub fn open_nested_directory<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self, ZarrError> {
        Self::open_directory_with_separator(path, mode, ChunkKeySeparator::Slash)
    }

    fn open_directory_with_separator<P: AsRef<Path>>(
        path: P,
        mode: Mode,
        separator: ChunkKeySeparator,
    ) -> Result<Self, ZarrError> {
        let path = path.as_ref();
        let source = path.to_string_lossy().to_string();
        if matches!(mode, Mode::Read | Mode::ReadWrite) && !path.exists() {
            return Err(ZarrError::NotFound(source));
        }
        let store = Arc::new(
            FilesystemStore::new(path)
                .map_err(|err| ZarrError::Storage(err.to_string().into()))?,
        );
        let zarr_store = Self {
            backend: Backend::ReadWrite(store),
            source,
            mode,
            separator,
            _tempdir: None,
        };
        zarr_store.check_create_empty()?;
        Ok(zarr_store)
    }

    /// Open a fresh in-memory store in [`Mode::Create`].
    ///
    /// The synthetic `source` is used as the link origin.
    #[must_use]
    pub fn open_memory(source: &str) -> Self {
        Self {
            backend: Backend::ReadWrite(Arc::new(MemoryStore::new())),
            source: source.to_string(),
            mode: Mode::Create,
            separator: ChunkKeySeparator::Dot,
            _tempdir: None,
        }
    }

    /// Open an auto-deleting temporary store in [`Mode::Create`].
    ///
    /// # Errors
    /// Returns [`ZarrError`] if the temporary directory cannot be created.
    pub fn open_temp() -> Result<Self, ZarrError> {
        let store = Arc::new(
            TempStore::new().map_err(|err| ZarrError::Storage(err.to_string().into()))?,
        );
        let source = store.path().to_string_lossy().to_string();
        Ok(Self {
            backend: Backend::ReadWrite(store.clone()),
            source,
            mode: Mode::Create,
            separator: ChunkKeySeparator::Dot,
            _tempdir: Some(store),
        })
    }

    /// Open a read-only HTTP store.
    ///
    /// `storage_options` are opaque header entries forwarded to the server.
    ///
    /// # Errors
    /// Returns [`ZarrError::Unsupported`] for writable modes and
    /// [`ZarrError`] if the URL or options are invalid.
    pub fn open_http(
        url: &str,
        mode: Mode,
        storage_options: &HashMap<String, String>,
    ) -> Result<Self, ZarrError> {
        if mode.is_writable() {
            return Err(ZarrError::Unsupported(format!(
                "http store {url} is read-only and cannot be opened in {mode:?} mode"
            )));
        }
        let store = HttpStore::new_with_options(url, storage_options)
            .map_err(|err| ZarrError::Storage(err.to_string().into()))?;
        Ok(Self {
            backend: Backend::ReadOnly(Arc::new(store)),
            source: url.to_string(),
            mode,
            separator: ChunkKeySeparator::Dot,
            _tempdir: None,
        })
    }

    /// Wrap a caller-supplied store.
    ///
    /// `source` must be a stable identifier usable as a link origin, since
    /// the store itself has no path.
    ///
    /// # Errors
    /// See [`ZarrStore::open_directory`] for the mode rules.
    pub fn from_store(
        store: ReadableWritableListableStorage,
        source: &str,
        mode: Mode,
    ) -> Result<Self, ZarrError> {
        let zarr_store = Self {
            backend: Backend::ReadWrite(store),
            source: source.to_string(),
            mode,
            separator: ChunkKeySeparator::Dot,
            _tempdir: None,
        };
        zarr_store.check_create_empty()?;
        if matches!(zarr_store.mode, Mode::Read | Mode::ReadWrite) && !zarr_store.can_read() {
            return Err(ZarrError::NotFound(zarr_store.source));
        }
        Ok(zarr_store)
    }

    fn check_create_empty(&self) -> Result<(), ZarrError> {
        if self.mode == Mode::Create {
            if let Backend::ReadWrite(store) = &self.backend {
                if !store.list()?.is_empty() {
                    return Err(ZarrError::AlreadyExists(self.source.clone()));
                }
            }
        }
        Ok(())
    }

    /// The stable identifier used as the origin for relative link sources.
    #[must_use]
    pub fn source_path(&self) -> &str {
        &self.source
    }

    /// The open mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The chunk key separator used for newly created arrays.
    #[must_use]
    pub fn separator(&self) -> ChunkKeySeparator {
        self.separator
    }

    /// Indicates if the store appears to be in this format (root `.zgroup`
    /// present).
    #[must_use]
    pub fn can_read(&self) -> bool {
        matches!(self.get_key(&metadata::group_key(&NodePath::root())), Ok(Some(_)))
    }

    /// Check if a node (group or dataset) exists at `path`.
    ///
    /// # Errors
    /// Returns [`ZarrError`] on an underlying storage error.
    pub fn exists(&self, path: &NodePath) -> Result<bool, ZarrError> {
        Ok(self.get_key(&metadata::group_key(path))?.is_some()
            || self.get_key(&metadata::array_key(path))?.is_some())
    }

    pub(crate) fn readable(&self) -> ReadableStorage {
        match &self.backend {
            Backend::ReadWrite(store) => store.clone(),
            Backend::ReadOnly(store) => store.clone(),
        }
    }

    pub(crate) fn listable(&self) -> Option<ReadableListableStorage> {
        match &self.backend {
            Backend::ReadWrite(store) => {
                let store: ReadableListableStorage = store.clone();
                Some(store)
            }
            Backend::ReadOnly(_) => None,
        }
    }

    pub(crate) fn writable(&self) -> Result<ReadableWritableListableStorage, ZarrError> {
        if !self.mode.is_writable() {
            return Err(ZarrError::Unsupported(format!(
                "store {} is open read-only",
                self.source
            )));
        }
        match &self.backend {
            Backend::ReadWrite(store) => Ok(store.clone()),
            Backend::ReadOnly(_) => Err(ZarrError::Unsupported(format!(
                "store {} does not support writes",
                self.source
            ))),
        }
    }

    pub(crate) fn get_key(&self, key: &StoreKey) -> Result<MaybeBytes, ZarrError> {
        Ok(self.readable().get(key)?)
    }

    pub(crate) fn set_key(&self, key: &StoreKey, value: Bytes) -> Result<(), ZarrError> {
        self.writable()?.set(key, value)?;
        Ok(())
    }

    pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &StoreKey,
        path: &NodePath,
    ) -> Result<Option<T>, ZarrError> {
        match self.get_key(key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .map_err(|err| ZarrError::invalid_metadata(path, err))?,
            )),
            None => Ok(None),
        }
    }

    pub(crate) fn set_json<T: serde::Serialize>(
        &self,
        key: &StoreKey,
        path: &NodePath,
        value: &T,
    ) -> Result<(), ZarrError> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|err| ZarrError::invalid_metadata(path, err))?;
        self.set_key(key, json.into())
    }

    /// The direct child node paths of a group at `path`.
    ///
    /// Uses the store listing when available, the consolidated index
    /// otherwise.
    ///
    /// # Errors
    /// Returns [`ZarrError::Unsupported`] if the store is neither listable
    /// nor consolidated.
    pub fn child_paths(&self, path: &NodePath) -> Result<Vec<NodePath>, ZarrError> {
        if let Some(store) = self.listable() {
            let prefix: StorePrefix = path.to_prefix();
            let mut out = Vec::new();
            for child in store.list_dir(&prefix)?.prefixes() {
                let child_path: NodePath = child.try_into()?;
                if self.exists(&child_path)? {
                    out.push(child_path);
                }
            }
            Ok(out)
        } else if let Some(consolidated) = self.read_consolidated()? {
            let prefix = path.to_prefix();
            let mut out: Vec<NodePath> = Vec::new();
            for key in consolidated.metadata.keys() {
                let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                if let Some((child, document)) = rest.split_once('/') {
                    if !document.contains('/') && (document == ZGROUP || document == ZARRAY) {
                        let child_path = path.child(child)?;
                        if !out.contains(&child_path) {
                            out.push(child_path);
                        }
                    }
                }
            }
            Ok(out)
        } else {
            Err(ZarrError::Unsupported(format!(
                "store {} is not listable and has no consolidated metadata",
                self.source
            )))
        }
    }

    /// Rebuild the consolidated metadata index from the per-node documents.
    ///
    /// # Errors
    /// Returns [`ZarrError`] if the store is not listable or writable, or on
    /// an underlying storage error.
    pub fn consolidate(&self) -> Result<(), ZarrError> {
        let store = self.writable()?;
        let mut documents = BTreeMap::new();
        for key in store.list()? {
            let name = key.name();
            if name == ZGROUP || name == ZARRAY || name == ZATTRS {
                if let Some(bytes) = store.get(&key)? {
                    let json: serde_json::Value = serde_json::from_slice(&bytes)
                        .map_err(|err| ZarrError::invalid_metadata(&NodePath::root(), err))?;
                    documents.insert(key.as_str().to_string(), json);
                }
            }
        }
        let index = ConsolidatedMetadata::new(documents);
        self.set_json(&consolidated_key(), &NodePath::root(), &index)
    }

    /// Read the consolidated metadata index, if present.
    ///
    /// # Errors
    /// Returns [`ZarrError`] if the index exists but does not parse.
    pub fn read_consolidated(&self) -> Result<Option<ConsolidatedMetadata>, ZarrError> {
        self.get_json(&consolidated_key(), &NodePath::root())
    }

    /// Release the store handles.
    ///
    /// Reopening the same underlying location afterwards succeeds for
    /// path-backed stores; temporary stores delete their directory.
    pub fn close(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mode_rejects_non_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ZarrStore::open_directory(dir.path(), Mode::Create).unwrap();
        store
            .set_json(
                &metadata::group_key(&NodePath::root()),
                &NodePath::root(),
                &crate::metadata::GroupMetadata::default(),
            )
            .unwrap();
        store.close();
        assert!(matches!(
            ZarrStore::open_directory(dir.path(), Mode::Create),
            Err(ZarrError::AlreadyExists(_))
        ));
        // Reopening the same location in append mode succeeds.
        assert!(ZarrStore::open_directory(dir.path(), Mode::Append).is_ok());
    }

    #[test]
    fn read_mode_requires_existing() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.zarr");
        assert!(matches!(
            ZarrStore::open_directory(&missing, Mode::Read),
            Err(ZarrError::NotFound(_))
        ));
        assert!(matches!(
            ZarrStore::open_directory(&missing, Mode::ReadWrite),
            Err(ZarrError::NotFound(_))
        ));
    }

    #[test]
    fn read_only_mode_blocks_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ZarrStore::open_directory(dir.path(), Mode::Create).unwrap();
        store
            .set_json(
                &metadata::group_key(&NodePath::root()),
                &NodePath::root(),
                &crate::metadata::GroupMetadata::default(),
            )
            .unwrap();
        store.close();

        let store = ZarrStore::open_directory(dir.path(), Mode::Read).unwrap();
        assert!(store.can_read());
        assert!(store.writable().is_err());
    }

    #[test]
    fn http_store_is_read_only() {
        assert!(matches!(
            ZarrStore::open_http("http://example.com/x.zarr", Mode::Create, &HashMap::new()),
            Err(ZarrError::Unsupported(_))
        ));
        let store =
            ZarrStore::open_http("http://example.com/x.zarr", Mode::Read, &HashMap::new())
                .unwrap();
        assert!(store.writable().is_err());
        assert!(store.listable().is_none());
    }

    #[test]
    fn consolidate_and_child_paths() {
        let store = ZarrStore::open_memory("mem://test");
        let root = NodePath::root();
        store
            .set_json(
                &metadata::group_key(&root),
                &root,
                &crate::metadata::GroupMetadata::default(),
            )
            .unwrap();
        let g1 = root.child("g1").unwrap();
        store
            .set_json(
                &metadata::group_key(&g1),
                &g1,
                &crate::metadata::GroupMetadata::default(),
            )
            .unwrap();
        store.consolidate().unwrap();

        let consolidated = store.read_consolidated().unwrap().unwrap();
        assert!(consolidated.metadata.contains_key(".zgroup"));
        assert!(consolidated.metadata.contains_key("g1/.zgroup"));
        assert_eq!(store.child_paths(&root).unwrap(), vec![g1.clone()]);
        assert!(store.exists(&g1).unwrap());
        assert!(!store.exists(&root.child("missing").unwrap()).unwrap());
    }
}
