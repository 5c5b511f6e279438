//! A temporary store, deleted on drop.

use std::path::Path;

use tempfile::TempDir;
use thiserror::Error;

use crate::{
    Bytes, ListableStorageTraits, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey,
    StoreKeys, StoreKeysPrefixes, StorePrefix, WritableStorageTraits,
};

use super::{FilesystemStore, FilesystemStoreCreateError};

/// A filesystem store backed by a temporary directory.
///
/// The directory and its contents are removed when the store is dropped.
#[derive(Debug)]
pub struct TempStore {
    // Field order matters: the inner store must drop before the directory.
    inner: FilesystemStore,
    tempdir: TempDir,
}

impl TempStore {
    /// Create a new temporary store.
    ///
    /// # Errors
    /// Returns a [`TempStoreCreateError`] if the temporary directory or the
    /// inner filesystem store cannot be created.
    pub fn new() -> Result<Self, TempStoreCreateError> {
        let tempdir = TempDir::new()?;
        let inner = FilesystemStore::new(tempdir.path())?;
        Ok(Self { inner, tempdir })
    }

    /// The path of the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.tempdir.path()
    }
}

impl ReadableStorageTraits for TempStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        self.inner.get(key)
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        self.inner.size_key(key)
    }
}

impl WritableStorageTraits for TempStore {
    fn set(&self, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    fn erase(&self, key: &StoreKey) -> Result<(), StorageError> {
        self.inner.erase(key)
    }

    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError> {
        self.inner.erase_prefix(prefix)
    }
}

impl ListableStorageTraits for TempStore {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix)
    }
}

/// A temporary store creation error.
#[derive(Debug, Error)]
pub enum TempStoreCreateError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The inner filesystem store could not be created.
    #[error(transparent)]
    FilesystemStoreCreateError(#[from] FilesystemStoreCreateError),
}
