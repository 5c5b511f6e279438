//! Hierarchy node paths.
//!
//! A [`NodePath`] locates a group or dataset within a file, e.g. `/g1/d1`.
//! Paths are `/`-rooted with non-empty, `/`-free component names.

use derive_more::Display;
use thiserror::Error;

use crate::storage::{StoreKey, StorePrefix};

/// A hierarchy node path.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct NodePath(String);

/// An invalid node path.
#[derive(Debug, Error)]
#[error("invalid node path {0}")]
pub struct NodePathError(String);

impl NodePath {
    /// Create a new node path from `path`.
    ///
    /// # Errors
    /// Returns [`NodePathError`] if `path` is not valid according to [`NodePath::validate()`].
    pub fn new(path: &str) -> Result<Self, NodePathError> {
        if Self::validate(path) {
            Ok(Self(path.to_string()))
        } else {
            Err(NodePathError(path.to_string()))
        }
    }

    /// The root node.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Extracts a string slice containing the node path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Indicates if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the final component of the path, or `""` for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns the parent path, or [`None`] for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            None
        } else {
            let (parent, _) = self.0.rsplit_once('/').unwrap();
            if parent.is_empty() {
                Some(Self::root())
            } else {
                Some(Self(parent.to_string()))
            }
        }
    }

    /// Returns the path of a child named `name`.
    ///
    /// # Errors
    /// Returns [`NodePathError`] if `name` is empty or contains `/`.
    pub fn child(&self, name: &str) -> Result<NodePath, NodePathError> {
        if name.is_empty() || name.contains('/') {
            return Err(NodePathError(name.to_string()));
        }
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Resolve a path string against this path.
    ///
    /// Absolute paths are returned as-is; relative paths are resolved as
    /// successive children.
    ///
    /// # Errors
    /// Returns [`NodePathError`] if the result is not a valid path.
    pub fn join(&self, path: &str) -> Result<NodePath, NodePathError> {
        if path.starts_with('/') {
            Self::new(path)
        } else {
            let mut out = self.clone();
            for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
                out = out.child(component)?;
            }
            Ok(out)
        }
    }

    /// Validates a path:
    /// - a path always starts with `/`, and
    /// - a non-root path cannot end with `/`, because node names must be non-empty and cannot contain `/`.
    #[must_use]
    pub fn validate(path: &str) -> bool {
        path.eq("/") || (path.starts_with('/') && !path.ends_with('/') && !path.contains("//"))
    }

    /// The store prefix holding this node's keys.
    #[must_use]
    pub fn to_prefix(&self) -> StorePrefix {
        if self.is_root() {
            StorePrefix::root()
        } else {
            // A valid node path is a valid prefix with the slash shifted.
            StorePrefix::new(format!("{}/", &self.0[1..]))
                .expect("validated node paths map to valid store prefixes")
        }
    }

    /// The store key of a file named `name` directly under this node.
    ///
    /// `name` must be non-empty; nested chunk names (`0/0`) are permitted.
    #[must_use]
    pub fn key_of(&self, name: &str) -> StoreKey {
        self.to_prefix()
            .key(name)
            .expect("document and chunk names are valid key suffixes")
    }
}

impl TryFrom<&str> for NodePath {
    type Error = NodePathError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl TryFrom<&StorePrefix> for NodePath {
    type Error = NodePathError;

    fn try_from(prefix: &StorePrefix) -> Result<Self, Self::Error> {
        let path = "/".to_string() + prefix.as_str().trim_end_matches('/');
        Self::new(&path)
    }
}
