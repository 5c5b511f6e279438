//! Store keys and prefixes.
//!
//! A [`StoreKey`] addresses one value in a store (`g1/d1/.zarray`); a
//! [`StorePrefix`] addresses the directory of keys beneath a hierarchy node
//! (`g1/d1/`, or the empty root prefix). Both are sequences of non-empty
//! `/`-separated segments, and the constructors here are how the backend
//! derives them: a node's documents are keys under its prefix
//! ([`StorePrefix::key`]) and its children are child prefixes
//! ([`StorePrefix::child`]).

use derive_more::{Display, From};
use thiserror::Error;

/// The key of one value in a store.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct StoreKey(String);

/// An invalid store key.
#[derive(Debug, From, Error)]
#[error("invalid store key {0}")]
pub struct StoreKeyError(String);

/// A list of [`StoreKey`].
pub type StoreKeys = Vec<StoreKey>;

/// The prefix of the keys beneath a node.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct StorePrefix(String);

/// An invalid store prefix.
#[derive(Debug, From, Error)]
#[error("invalid store prefix {0}")]
pub struct StorePrefixError(String);

/// A list of [`StorePrefix`].
pub type StorePrefixes = Vec<StorePrefix>;

fn segments_valid(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(|segment| !segment.is_empty())
}

impl StoreKey {
    /// Create a store key from `key`.
    ///
    /// A key is one or more non-empty `/`-separated segments.
    ///
    /// # Errors
    /// Returns [`StoreKeyError`] if `key` is empty or has an empty segment.
    pub fn new(key: impl Into<String>) -> Result<Self, StoreKeyError> {
        let key = key.into();
        if segments_valid(&key) {
            Ok(Self(key))
        } else {
            Err(StoreKeyError(key))
        }
    }

    /// Extracts a string slice of the underlying key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final segment of the key: the document or chunk name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, name)| name)
    }

    /// The prefix holding this key.
    #[must_use]
    pub fn parent(&self) -> StorePrefix {
        match self.0.rsplit_once('/') {
            Some((dir, _)) => StorePrefix(format!("{dir}/")),
            None => StorePrefix::root(),
        }
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl StorePrefix {
    /// Create a store prefix from `prefix`.
    ///
    /// A prefix is either empty (the root) or non-empty `/`-separated
    /// segments with a trailing `/`.
    ///
    /// # Errors
    /// Returns [`StorePrefixError`] if `prefix` is not terminated by `/` or
    /// has an empty segment.
    pub fn new(prefix: impl Into<String>) -> Result<Self, StorePrefixError> {
        let prefix = prefix.into();
        let valid = match prefix.strip_suffix('/') {
            Some(segments) => segments_valid(segments),
            None => prefix.is_empty(),
        };
        if valid {
            Ok(Self(prefix))
        } else {
            Err(StorePrefixError(prefix))
        }
    }

    /// The root prefix (the empty string).
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Extracts a string slice of the underlying prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key of a value named `suffix` under this prefix.
    ///
    /// `suffix` may itself be segmented, e.g. a nested chunk name `0/0`.
    ///
    /// # Errors
    /// Returns [`StoreKeyError`] if the joined key is invalid.
    pub fn key(&self, suffix: &str) -> Result<StoreKey, StoreKeyError> {
        StoreKey::new(format!("{}{suffix}", self.0))
    }

    /// The prefix of a child node named `name`.
    ///
    /// # Errors
    /// Returns [`StorePrefixError`] if `name` is not a single valid segment.
    pub fn child(&self, name: &str) -> Result<StorePrefix, StorePrefixError> {
        if name.is_empty() || name.contains('/') {
            return Err(StorePrefixError(name.to_string()));
        }
        Ok(Self(format!("{}{name}/", self.0)))
    }

    /// Indicates if `key` lies under this prefix.
    #[must_use]
    pub fn contains(&self, key: &StoreKey) -> bool {
        key.as_str().starts_with(&self.0)
    }
}

impl TryFrom<&str> for StorePrefix {
    type Error = StorePrefixError;

    fn try_from(prefix: &str) -> Result<Self, Self::Error> {
        Self::new(prefix)
    }
}
