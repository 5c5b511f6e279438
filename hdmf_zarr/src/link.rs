//! Links and object references.
//!
//! Zarr has no native link or reference type, so both are emulated with
//! reserved attributes:
//! - a group holding links carries a `zarr_link` attribute with a JSON array
//!   of [`LinkRecord`]s;
//! - a reference-typed dataset carries `zarr_dtype = "object"` and its
//!   elements are [`ReferenceRecord`]s;
//! - a reference-valued attribute wraps its record as
//!   `{"zarr_dtype": "object", "value": <record>}`.
//!
//! A record's `source` is the path of the target's file relative to the root
//! of the file holding the record (`"."` for the same file), so files remain
//! valid when moved as a whole.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::ZarrError;

/// The `source` of a record that targets its own file.
pub const SAME_FILE: &str = ".";

/// A stored pointer to a node, resolvable across files.
///
/// Unknown keys are preserved so that records written by newer
/// implementations round-trip through export.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ReferenceRecord {
    /// The path of the target's file, relative to this file's root; `"."` if
    /// the target is in the same file.
    pub source: String,
    /// The absolute path of the target node within its file.
    pub path: String,
    /// The target's object id (null if untyped).
    #[serde(default)]
    pub object_id: Option<String>,
    /// The root object id of the `source` file.
    #[serde(default)]
    pub source_object_id: Option<String>,
    /// Unknown keys, preserved round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReferenceRecord {
    /// Create a record pointing at `path` within the same file.
    #[must_use]
    pub fn same_file(path: &str) -> Self {
        Self {
            source: SAME_FILE.to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    /// Indicates if the target is in the same file as the record.
    #[must_use]
    pub fn is_same_file(&self) -> bool {
        self.source == SAME_FILE
    }
}

/// One entry of a group's `zarr_link` attribute.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LinkRecord {
    /// The link name within the parent group.
    pub name: String,
    /// The link target.
    #[serde(flatten)]
    pub reference: ReferenceRecord,
}

/// Compute a record `source`: the path of `target_root` relative to
/// `own_root`, or `"."` when they are the same file.
#[must_use]
pub fn relative_source(own_root: &str, target_root: &str) -> String {
    if own_root == target_root {
        return SAME_FILE.to_string();
    }
    pathdiff::diff_paths(Path::new(target_root), Path::new(own_root))
        .map_or_else(|| target_root.to_string(), |p| p.to_string_lossy().to_string())
}

/// Resolve a record `source` against the root of the file holding it.
#[must_use]
pub fn resolve_source(own_root: &str, source: &str) -> String {
    if source == SAME_FILE {
        own_root.to_string()
    } else if Path::new(source).is_absolute() {
        source.to_string()
    } else {
        let joined = Path::new(own_root).join(source);
        // Normalize `..` components so moved file pairs compare equal.
        let mut normalized = std::path::PathBuf::new();
        for component in joined.components() {
            match component {
                std::path::Component::ParentDir => {
                    if !normalized.pop() {
                        normalized.push(component);
                    }
                }
                std::path::Component::CurDir => {}
                _ => normalized.push(component),
            }
        }
        normalized.to_string_lossy().to_string()
    }
}

/// The state of one reference slot during resolution.
enum SlotState<T> {
    Resolving,
    Resolved(T),
    Failed(String),
}

/// A per-read-session resolution cache keyed by `(source, path)`.
///
/// Concurrent readers of the same slot share one resolution attempt: the
/// first caller resolves while the rest block on the condvar, then all see
/// the same outcome.
pub(crate) struct ResolutionCache<T> {
    slots: Mutex<HashMap<(String, String), SlotState<T>>>,
    resolved: Condvar,
}

impl<T: Clone> Default for ResolutionCache<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            resolved: Condvar::new(),
        }
    }
}

impl<T: Clone> ResolutionCache<T> {
    /// Resolve the slot for `record`, running `resolve` at most once per
    /// session for its `(source, path)` key.
    pub(crate) fn resolve_with(
        &self,
        record: &ReferenceRecord,
        resolve: impl FnOnce() -> Result<T, ZarrError>,
    ) -> Result<T, ZarrError> {
        let key = (record.source.clone(), record.path.clone());
        {
            let mut slots = self.slots.lock();
            loop {
                match slots.get(&key) {
                    None => {
                        slots.insert(key.clone(), SlotState::Resolving);
                        break;
                    }
                    // Another caller is resolving this slot; wait below.
                    Some(SlotState::Resolving) => {}
                    Some(SlotState::Resolved(value)) => {
                        let value = value.clone();
                        return Ok(value);
                    }
                    Some(SlotState::Failed(reason)) => {
                        let reason = reason.clone();
                        return Err(Self::failed_error(record, &reason));
                    }
                }
                self.resolved.wait(&mut slots);
            }
        }

        let outcome = resolve();
        let mut slots = self.slots.lock();
        match &outcome {
            Ok(value) => {
                slots.insert(key, SlotState::Resolved(value.clone()));
            }
            Err(err) => {
                slots.insert(key, SlotState::Failed(err.to_string()));
            }
        }
        self.resolved.notify_all();
        outcome
    }

    fn failed_error(record: &ReferenceRecord, reason: &str) -> ZarrError {
        if record.is_same_file() {
            match crate::node::NodePath::new(&record.path) {
                Ok(path) => ZarrError::BrokenLink(path),
                Err(err) => err.into(),
            }
        } else {
            ZarrError::ExternalUnavailable {
                file: record.source.clone(),
                reason: reason.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_record_json() {
        let record = ReferenceRecord {
            source: SAME_FILE.to_string(),
            path: "/g1/d1".to_string(),
            object_id: None,
            source_object_id: Some("root-id".to_string()),
            extra: serde_json::Map::default(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "source": ".",
                "path": "/g1/d1",
                "object_id": null,
                "source_object_id": "root-id",
            })
        );
        assert_eq!(
            serde_json::from_value::<ReferenceRecord>(json).unwrap(),
            record
        );
    }

    #[test]
    fn unknown_keys_preserved() {
        let json = serde_json::json!({
            "name": "alias",
            "source": ".",
            "path": "/g1/d1",
            "object_id": null,
            "source_object_id": null,
            "future_key": {"x": 1},
        });
        let link: LinkRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(link.reference.extra["future_key"]["x"], 1);
        assert_eq!(serde_json::to_value(&link).unwrap(), json);
    }

    #[test]
    fn relative_sources() {
        assert_eq!(relative_source("/data/a.zarr", "/data/a.zarr"), ".");
        assert_eq!(relative_source("/data/a.zarr", "/data/b.zarr"), "../b.zarr");
        assert_eq!(
            relative_source("/data/a.zarr", "/other/c.zarr"),
            "../../other/c.zarr"
        );
    }

    #[test]
    fn resolve_sources() {
        assert_eq!(resolve_source("/data/a.zarr", "."), "/data/a.zarr");
        assert_eq!(
            resolve_source("/data/a.zarr", "../b.zarr"),
            "/data/b.zarr"
        );
        // Move both files together: resolution follows the new directory.
        assert_eq!(
            resolve_source("/moved/a.zarr", "../b.zarr"),
            "/moved/b.zarr"
        );
    }

    #[test]
    fn resolution_cache_shares_attempts() {
        let cache: ResolutionCache<u32> = ResolutionCache::default();
        let record = ReferenceRecord::same_file("/g1");
        let mut calls = 0;
        for _ in 0..3 {
            let value = cache
                .resolve_with(&record, || {
                    calls += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn resolution_cache_caches_failures() {
        let cache: ResolutionCache<u32> = ResolutionCache::default();
        let record = ReferenceRecord {
            source: "../missing.zarr".to_string(),
            path: "/g1".to_string(),
            ..ReferenceRecord::default()
        };
        for _ in 0..2 {
            let err = cache
                .resolve_with(&record, || {
                    Err(ZarrError::ExternalUnavailable {
                        file: "../missing.zarr".to_string(),
                        reason: "no such file".to_string(),
                    })
                })
                .unwrap_err();
            assert!(matches!(err, ZarrError::ExternalUnavailable { .. }));
        }
    }
}
