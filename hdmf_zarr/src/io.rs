//! The builder I/O engine.
//!
//! [`ZarrIO`] orchestrates full writes, reads, and appends over a
//! [`ZarrStore`]: it walks the builder arena in pre-order, creates groups and
//! datasets, encodes attributes, emits link records, exhausts chunk
//! iterators (optionally over a worker pool), caches schema namespaces, and
//! refreshes the consolidated metadata index.
//!
//! On read the tree is materialized with lazy dataset values: a
//! [`DatasetHandle`] carries the array metadata but no chunk is read until
//! the value is accessed, and object references resolve on first dereference
//! through a per-session cache.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    attribute::{decode_attribute, encode_attribute, AttributeValue},
    builder::{
        Builder, BuilderArena, BuilderId, CompressorSelection, DatasetBuilder, ElementData,
        GroupBuilder, LinkBuilder, LinkTarget, RefValue, ScalarValue, Value, ZarrDataIO,
    },
    chunk::{
        self, ChunkIterator, DataChunk, ExhaustedIterator,
    },
    codec, config,
    data_type::{CompoundField, DataType},
    error::ZarrError,
    link::{relative_source, resolve_source, LinkRecord, ReferenceRecord, ResolutionCache},
    metadata::{
        self, ArrayMetadata, ChunkKeySeparator, CodecMetadata, FillValueMetadata, GroupMetadata,
    },
    node::NodePath,
    object_codec::{self, ObjectCodecKind, WireScalar},
    spec_cache::{self, TypeMap, SPECLOC},
    store::{Mode, ZarrStore},
};

/// The reserved attribute holding a group's link records.
pub const ZARR_LINK: &str = "zarr_link";
/// The reserved attribute recording a dataset's semantic dtype.
pub const ZARR_DTYPE: &str = "zarr_dtype";

/// Attribute names owned by the backend; user attributes must not use them.
pub const RESERVED_ATTRIBUTES: &[&str] = &[ZARR_LINK, ZARR_DTYPE, SPECLOC];

/// The reserved attribute carrying an object's id.
pub const OBJECT_ID: &str = "object_id";

/// A progress event emitted during iterative chunked writes.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// The dataset being written.
    pub dataset: NodePath,
    /// Chunks written to the dataset so far.
    pub chunks_written: u64,
}

/// A progress callback.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// An advisory lock provider forwarded to the store layer.
///
/// The backend takes no filesystem lock of its own; cross-process write
/// coordination is the deployment's responsibility.
pub trait Synchronizer: Send + Sync {
    /// Acquire a lock guard for a node path; the lock is held until the
    /// returned guard drops.
    fn lock(&self, path: &NodePath) -> Box<dyn std::any::Any + Send>;
}

/// Options recognized by [`ZarrIO::open`] and the write path.
#[derive(Clone)]
pub struct ZarrIOOptions {
    /// The codec for reference-typed dataset elements.
    pub object_codec: ObjectCodecKind,
    /// Write the schema cache (default true).
    pub cache_spec: bool,
    /// Refresh the consolidated index after write (default true).
    pub consolidate_metadata: bool,
    /// Worker count for parallel chunked writes (default 1: serial).
    pub parallel_workers: usize,
    /// Optional progress callback for chunked writes.
    pub progress: Option<ProgressCallback>,
    /// Optional advisory lock provider.
    pub synchronizer: Option<Arc<dyn Synchronizer>>,
}

impl ZarrIOOptions {
    /// The default options: binary object codec, spec cache and consolidation
    /// on, serial chunk writes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            object_codec: ObjectCodecKind::default(),
            cache_spec: true,
            consolidate_metadata: true,
            parallel_workers: 1,
            progress: None,
            synchronizer: None,
        }
    }
}

impl Default for ZarrIOOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZarrIOOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrIOOptions")
            .field("object_codec", &self.object_codec)
            .field("cache_spec", &self.cache_spec)
            .field("consolidate_metadata", &self.consolidate_metadata)
            .field("parallel_workers", &self.parallel_workers)
            .finish_non_exhaustive()
    }
}

/// The IO handle over one file.
pub struct ZarrIO {
    store: Arc<ZarrStore>,
    options: ZarrIOOptions,
    type_map: RwLock<TypeMap>,
    resolution: ResolutionCache<ResolvedNode>,
    external: Mutex<HashMap<String, Arc<ZarrStore>>>,
}

impl std::fmt::Debug for ZarrIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrIO")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A node produced by reference or link resolution.
#[derive(Clone, Debug)]
pub enum ResolvedNode {
    /// A group, addressable in its (possibly external) store.
    Group {
        /// The store holding the group.
        store: Arc<ZarrStore>,
        /// The group path within that store.
        path: NodePath,
    },
    /// A dataset handle; chunks load on access.
    Dataset(DatasetHandle),
}

impl ResolvedNode {
    /// The resolved node's path within its file.
    #[must_use]
    pub fn path(&self) -> &NodePath {
        match self {
            Self::Group { path, .. } => path,
            Self::Dataset(handle) => handle.path(),
        }
    }
}

impl ZarrIO {
    /// Open an IO handle over `store` with an explicit `type_map`.
    #[must_use]
    pub fn open(store: ZarrStore, type_map: TypeMap, options: ZarrIOOptions) -> Self {
        Self {
            store: Arc::new(store),
            options,
            type_map: RwLock::new(type_map),
            resolution: ResolutionCache::default(),
            external: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &ZarrStore {
        &self.store
    }

    /// The source path of the underlying store.
    #[must_use]
    pub fn source_path(&self) -> &str {
        self.store.source_path()
    }

    /// A snapshot of the handle's type map (hydrated from the schema cache
    /// after a read).
    #[must_use]
    pub fn type_map(&self) -> TypeMap {
        self.type_map.read().clone()
    }

    /// Indicates if `store` appears to hold a file in this format.
    #[must_use]
    pub fn can_read(store: &ZarrStore) -> bool {
        store.can_read()
    }

    /// Release the handle and its store.
    pub fn close(self) {
        drop(self);
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Write the builder tree rooted at `root` into the store.
    ///
    /// Chunk iterators inside dataset values are exhausted (and left
    /// exhausted in the caller's arena). A node's attributes are durable
    /// before its children are written; link records are flushed after the
    /// full tree so targets exist first. Schema-cache and consolidation
    /// failures are logged, not raised.
    ///
    /// # Errors
    /// Returns [`ZarrError`] on mode violations, reserved attribute names,
    /// overlapping chunk writes, attribute conflicts in append mode, or any
    /// underlying storage error. A failed write leaves the store in a
    /// partial state.
    pub fn write(&self, arena: &mut BuilderArena, root: BuilderId) -> Result<(), ZarrError> {
        self.store.writable()?;

        let plan = WritePlan::build(arena, root)?;
        let mut links: Vec<(NodePath, Vec<LinkRecord>)> = Vec::new();
        let mut queue: VecDeque<(ChunkWriteTarget, ChunkIterator)> = VecDeque::new();

        for entry in &plan.order {
            match entry {
                PlanEntry::Group(id, path) => {
                    let records = self.write_group(arena, *id, path, &plan)?;
                    if !records.is_empty() {
                        links.push((path.clone(), records));
                    }
                }
                PlanEntry::Dataset(id, path) => {
                    let Builder::Dataset(dataset) = arena.get_mut(*id) else {
                        return Err(ZarrError::InternalInvariant(
                            "plan dataset entry is not a dataset".to_string(),
                        ));
                    };
                    self.write_dataset(dataset, path, &plan, &mut queue)?;
                }
            }
        }

        self.exhaust_queue(&mut queue)?;
        self.flush_links(links)?;

        if self.options.cache_spec {
            let type_map = self.type_map.read();
            if !type_map.is_empty() {
                match spec_cache::write_spec_cache(&self.store, &type_map) {
                    Ok(specloc) => self.set_root_attribute(SPECLOC, specloc.into())?,
                    Err(err) => log::warn!("schema cache write failed: {err}"),
                }
            }
        }

        if self.options.consolidate_metadata {
            if let Err(err) = self.store.consolidate() {
                log::warn!("metadata consolidation failed: {err}");
            }
        }
        Ok(())
    }

    fn write_group(
        &self,
        arena: &BuilderArena,
        id: BuilderId,
        path: &NodePath,
        plan: &WritePlan,
    ) -> Result<Vec<LinkRecord>, ZarrError> {
        let group = arena.group(id).ok_or_else(|| {
            ZarrError::InternalInvariant("plan group entry is not a group".to_string())
        })?;
        let _guard = self.synchronizer_lock(path);
        let group_key = metadata::group_key(path);
        if self.store.get_key(&group_key)?.is_none() {
            self.store
                .set_json(&group_key, path, &GroupMetadata::default())?;
        }

        let attrs = self.encode_attributes(&group.attributes, path, plan)?;
        self.write_attributes(path, attrs)?;

        let mut records = Vec::with_capacity(group.links.len());
        for link_id in group.links.values() {
            let Builder::Link(link) = arena.get(*link_id) else {
                return Err(ZarrError::InternalInvariant(
                    "group link child is not a link".to_string(),
                ));
            };
            records.push(self.link_record(link, plan)?);
        }
        Ok(records)
    }

    fn link_record(&self, link: &LinkBuilder, plan: &WritePlan) -> Result<LinkRecord, ZarrError> {
        let reference = match &link.target {
            LinkTarget::Builder(target) => plan.builder_record(*target)?,
            LinkTarget::External {
                source,
                path,
                object_id,
            } => {
                let source = if std::path::Path::new(source).is_absolute() {
                    relative_source(self.store.source_path(), source)
                } else {
                    source.clone()
                };
                ReferenceRecord {
                    source,
                    path: path.clone(),
                    object_id: object_id.clone(),
                    source_object_id: plan.root_object_id.clone(),
                    extra: serde_json::Map::default(),
                }
            }
        };
        Ok(LinkRecord {
            name: link.name.clone(),
            reference,
        })
    }

    fn write_dataset(
        &self,
        dataset: &mut DatasetBuilder,
        path: &NodePath,
        plan: &WritePlan,
        queue: &mut VecDeque<(ChunkWriteTarget, ChunkIterator)>,
    ) -> Result<(), ZarrError> {
        let _guard = self.synchronizer_lock(path);

        if matches!(dataset.data_type, DataType::RegionReference) {
            return Err(ZarrError::RegionReferenceUnsupported(path.clone()));
        }

        let already_exists = self.store.get_key(&metadata::array_key(path))?.is_some();
        if already_exists && self.store.mode() != Mode::Create {
            // Append over an existing dataset merges attributes; the data is
            // treated as already present.
            log::debug!("dataset {path} exists, merging attributes only");
            let attrs = self.dataset_attributes(dataset, path, plan, None)?;
            return self.write_attributes(path, attrs);
        }

        // A read value being written back (e.g. export) is materialized first.
        if let Value::Lazy(handle) = &dataset.value {
            dataset.value = handle.read_value()?;
        }
        // A scalar reference is stored as a one-element reference vector.
        if let Value::Scalar(ScalarValue::Ref(reference)) = &dataset.value {
            let reference = reference.clone();
            dataset.value = Value::References(vec![reference]);
        }

        let object_codec = dataset.data_io.object_codec.unwrap_or(self.options.object_codec);
        let separator = self.store.separator();

        // Take the value so the helpers can borrow the rest of the builder;
        // it is restored afterwards (iterators are left exhausted).
        let value = std::mem::replace(
            &mut dataset.value,
            Value::Iterator(ChunkIterator::Serial(Box::new(ExhaustedIterator::new(
                dataset.data_type.clone(),
            )))),
        );
        let restored = match value {
            Value::Scalar(value) => {
                let data = scalar_to_elements(&value, &dataset.data_type, path)?;
                let filters = text_filters(&dataset.data_type);
                let array = self.array_metadata(dataset, vec![1], vec![1], &filters)?;
                self.store
                    .set_json(&metadata::array_key(path), path, &array)?;
                let attrs =
                    self.dataset_attributes(dataset, path, plan, Some("scalar".into()))?;
                self.write_attributes(path, attrs)?;
                let mut target = ChunkWriteTarget::new(path.clone(), array, separator);
                let chunk = DataChunk {
                    indices: vec![0],
                    extent: vec![1],
                    data,
                };
                self.write_chunk(&mut target, chunk)?;
                target.finalize(&self.store)?;
                Value::Scalar(value)
            }
            Value::References(refs) => {
                let records = refs
                    .iter()
                    .map(|r| plan.encode_ref(r))
                    .collect::<Result<Vec<_>, _>>()?;
                let shape = vec![records.len() as u64];
                let chunks = vec![(records.len() as u64).max(1)];
                let filters = vec![CodecMetadata::new(object_codec.filter_id())];
                let array = self.array_metadata_typed(
                    dataset,
                    shape,
                    chunks,
                    &filters,
                    &DataType::ObjectReference,
                )?;
                self.store
                    .set_json(&metadata::array_key(path), path, &array)?;
                let attrs = self.dataset_attributes(dataset, path, plan, Some("object".into()))?;
                self.write_attributes(path, attrs)?;
                let payload = object_codec::encode_references(object_codec, &records)?;
                let payload = codec::compress(payload, &array.compressor)?;
                self.store
                    .set_key(&metadata::chunk_key(path, &[0], separator), payload.into())?;
                Value::References(refs)
            }
            Value::Compound { fields, rows } => {
                self.write_compound(dataset, path, plan, object_codec, &fields, &rows)?;
                Value::Compound { fields, rows }
            }
            Value::Array { data, shape } => {
                if data.len() as u64 != chunk::element_count(&shape) {
                    return Err(ZarrError::InternalInvariant(format!(
                        "dataset {path} holds {} elements for shape {shape:?}",
                        data.len()
                    )));
                }
                let chunks = dataset
                    .data_io
                    .chunks
                    .clone()
                    .unwrap_or_else(|| shape.iter().map(|s| (*s).max(1)).collect());
                let filters = text_filters(&dataset.data_type);
                let array = self.array_metadata(dataset, shape.clone(), chunks, &filters)?;
                self.store
                    .set_json(&metadata::array_key(path), path, &array)?;
                let attrs =
                    self.dataset_attributes(dataset, path, plan, dataset.data_type.hint())?;
                self.write_attributes(path, attrs)?;

                let iter = chunk::ArrayChunkIterator::new(
                    data.clone(),
                    dataset.data_type.clone(),
                    shape.clone(),
                    array.chunks.clone(),
                );
                let mut target = ChunkWriteTarget::new(path.clone(), array, separator);
                let mut iter = ChunkIterator::Serial(Box::new(iter));
                self.exhaust_one(&mut target, &mut iter)?;
                target.finalize(&self.store)?;
                Value::Array { data, shape }
            }
            Value::Iterator(iter) => {
                let declared = iter.as_base().shape();
                let shape: Vec<u64> = declared.iter().map(|s| s.unwrap_or(0)).collect();
                let chunks = iter.as_base().chunk_shape();
                let filters = text_filters(&dataset.data_type);
                let array = self.array_metadata(dataset, shape, chunks, &filters)?;
                self.store
                    .set_json(&metadata::array_key(path), path, &array)?;
                let attrs =
                    self.dataset_attributes(dataset, path, plan, dataset.data_type.hint())?;
                self.write_attributes(path, attrs)?;
                let target = ChunkWriteTarget::new(path.clone(), array, separator);
                queue.push_back((target, iter));
                // The queue owns the iterator now; the placeholder stays.
                return Ok(());
            }
            Value::Lazy(_) => {
                return Err(ZarrError::InternalInvariant(
                    "lazy dataset value was not materialized".to_string(),
                ))
            }
        };
        dataset.value = restored;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_compound(
        &self,
        dataset: &DatasetBuilder,
        path: &NodePath,
        plan: &WritePlan,
        object_codec: ObjectCodecKind,
        fields: &[CompoundField],
        rows: &[Vec<ScalarValue>],
    ) -> Result<(), ZarrError> {
        let data_type = DataType::Compound(fields.to_vec());
        let fixed = data_type.is_fixed_size();
        let separator = self.store.separator();

        let wire_rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| scalar_to_wire(value, plan))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let shape = vec![rows.len() as u64];
        let chunks = vec![(rows.len() as u64).max(1)];
        let filters = if fixed {
            Vec::new()
        } else {
            vec![CodecMetadata::new(object_codec.filter_id())]
        };
        let array = self.array_metadata_typed(dataset, shape, chunks, &filters, &data_type)?;
        self.store
            .set_json(&metadata::array_key(path), path, &array)?;
        let attrs = self.dataset_attributes(dataset, path, plan, data_type.hint())?;
        self.write_attributes(path, attrs)?;

        let payload = if fixed {
            codec::pack_rows(&wire_rows, fields)?
        } else {
            object_codec::encode_rows(object_codec, &wire_rows)?
        };
        let payload = codec::compress(payload, &array.compressor)?;
        self.store
            .set_key(&metadata::chunk_key(path, &[0], separator), payload.into())
    }

    fn array_metadata(
        &self,
        dataset: &DatasetBuilder,
        shape: Vec<u64>,
        chunks: Vec<u64>,
        filters: &[CodecMetadata],
    ) -> Result<ArrayMetadata, ZarrError> {
        let data_type = dataset.data_type.clone();
        self.array_metadata_typed(dataset, shape, chunks, filters, &data_type)
    }

    fn array_metadata_typed(
        &self,
        dataset: &DatasetBuilder,
        shape: Vec<u64>,
        chunks: Vec<u64>,
        filters: &[CodecMetadata],
        data_type: &DataType,
    ) -> Result<ArrayMetadata, ZarrError> {
        let fill_value = dataset.data_io.fill_value.clone().unwrap_or_else(|| {
            if data_type.is_fixed_size() {
                FillValueMetadata::Number(0.into())
            } else {
                FillValueMetadata::Null
            }
        });
        let mut all_filters = filters.to_vec();
        if let Some(extra) = &dataset.data_io.filters {
            all_filters.extend(extra.iter().cloned());
        }
        Ok(ArrayMetadata {
            zarr_format: monostate::MustBe!(2u64),
            shape,
            chunks,
            dtype: data_type.to_metadata(),
            compressor: codec::compressor_metadata(dataset.data_io.compressor),
            fill_value,
            order: metadata::ArrayOrder::C,
            filters: if all_filters.is_empty() {
                None
            } else {
                Some(all_filters)
            },
            dimension_separator: self.store.separator(),
        })
    }

    fn dataset_attributes(
        &self,
        dataset: &DatasetBuilder,
        path: &NodePath,
        plan: &WritePlan,
        zarr_dtype: Option<serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ZarrError> {
        let mut attrs = self.encode_attributes(&dataset.attributes, path, plan)?;
        if let Some(zarr_dtype) = zarr_dtype {
            attrs.insert(ZARR_DTYPE.to_string(), zarr_dtype);
        }
        Ok(attrs)
    }

    fn encode_attributes(
        &self,
        attributes: &BTreeMap<String, AttributeValue>,
        path: &NodePath,
        plan: &WritePlan,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ZarrError> {
        let mut out = serde_json::Map::with_capacity(attributes.len());
        for (name, value) in attributes {
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                return Err(ZarrError::Unsupported(format!(
                    "attribute name {name} at {path} is reserved"
                )));
            }
            let mut encode_ref = |r: &RefValue| plan.encode_ref(r);
            out.insert(
                name.clone(),
                encode_attribute(value, path, name, &mut encode_ref)?,
            );
        }
        Ok(out)
    }

    /// Write `.zattrs`, merging with existing attributes outside create mode.
    fn write_attributes(
        &self,
        path: &NodePath,
        attrs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ZarrError> {
        let key = metadata::attrs_key(path);
        let merged = match self.store.get_json::<serde_json::Map<_, _>>(&key, path)? {
            Some(mut existing) => {
                for (name, value) in attrs {
                    match existing.get(&name) {
                        Some(current) if *current == value => {}
                        Some(_) => {
                            return Err(ZarrError::AttributeConflict {
                                path: path.clone(),
                                name,
                            })
                        }
                        None => {
                            existing.insert(name, value);
                        }
                    }
                }
                existing
            }
            None => attrs,
        };
        if merged.is_empty() {
            return Ok(());
        }
        self.store.set_json(&key, path, &merged)
    }

    fn set_root_attribute(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), ZarrError> {
        let root = NodePath::root();
        let key = metadata::attrs_key(&root);
        let mut attrs = self
            .store
            .get_json::<serde_json::Map<_, _>>(&key, &root)?
            .unwrap_or_default();
        attrs.insert(name.to_string(), value);
        self.store.set_json(&key, &root, &attrs)
    }

    fn flush_links(&self, links: Vec<(NodePath, Vec<LinkRecord>)>) -> Result<(), ZarrError> {
        for (path, records) in links {
            let key = metadata::attrs_key(&path);
            let mut attrs = self
                .store
                .get_json::<serde_json::Map<_, _>>(&key, &path)?
                .unwrap_or_default();
            // Merge with records already on disk (append mode), newest wins
            // per link name.
            let mut merged: Vec<LinkRecord> = match attrs.get(ZARR_LINK) {
                Some(existing) => serde_json::from_value(existing.clone())
                    .map_err(|err| ZarrError::invalid_metadata(&path, err))?,
                None => Vec::new(),
            };
            for record in records {
                merged.retain(|existing| existing.name != record.name);
                merged.push(record);
            }
            let value = serde_json::to_value(&merged)
                .map_err(|err| ZarrError::invalid_metadata(&path, err))?;
            attrs.insert(ZARR_LINK.to_string(), value);
            self.store.set_json(&key, &path, &attrs)?;
        }
        Ok(())
    }

    fn synchronizer_lock(&self, path: &NodePath) -> Option<Box<dyn std::any::Any + Send>> {
        self.options
            .synchronizer
            .as_ref()
            .map(|synchronizer| synchronizer.lock(path))
    }

    // ------------------------------------------------------------------
    // Iterative chunked writes
    // ------------------------------------------------------------------

    /// Drain queued chunk iterators round-robin; parallel-capable iterators
    /// drain over a worker pool when `parallel_workers > 1`.
    fn exhaust_queue(
        &self,
        queue: &mut VecDeque<(ChunkWriteTarget, ChunkIterator)>,
    ) -> Result<(), ZarrError> {
        log::debug!("exhausting chunk iterator queue (length {})", queue.len());
        while let Some((mut target, mut iter)) = queue.pop_front() {
            if iter.is_parallel() && self.options.parallel_workers > 1 {
                self.exhaust_parallel(&mut target, &mut iter)?;
                target.finalize(&self.store)?;
                continue;
            }
            match iter.as_base_mut().next_chunk() {
                Some(chunk) => {
                    self.write_chunk(&mut target, chunk)?;
                    queue.push_back((target, iter));
                }
                None => target.finalize(&self.store)?,
            }
        }
        Ok(())
    }

    fn exhaust_one(
        &self,
        target: &mut ChunkWriteTarget,
        iter: &mut ChunkIterator,
    ) -> Result<(), ZarrError> {
        if iter.is_parallel() && self.options.parallel_workers > 1 {
            return self.exhaust_parallel(target, iter);
        }
        while let Some(chunk) = iter.as_base_mut().next_chunk() {
            self.write_chunk(target, chunk)?;
        }
        Ok(())
    }

    /// Write one chunk, enforcing at-most-once per coordinate and growing the
    /// dataset shape when a chunk lands beyond the current bounds.
    fn write_chunk(
        &self,
        target: &mut ChunkWriteTarget,
        chunk: DataChunk,
    ) -> Result<(), ZarrError> {
        target.admit(&chunk)?;
        let job = target.job(&self.store, chunk);
        job.execute()?;
        target.chunks_written += 1;
        if let Some(progress) = &self.options.progress {
            progress(&ProgressEvent {
                dataset: target.path.clone(),
                chunks_written: target.chunks_written,
            });
        }
        Ok(())
    }

    /// Drain a parallel-capable iterator over a dedicated worker pool.
    ///
    /// The owning task draws chunks and performs the bookkeeping (coordinate
    /// admission, shape growth); workers encode and write independently. On a
    /// worker failure the pool drains in-flight writes and the first error is
    /// re-raised; the dataset is left as-is.
    fn exhaust_parallel(
        &self,
        target: &mut ChunkWriteTarget,
        iter: &mut ChunkIterator,
    ) -> Result<(), ZarrError> {
        // The pool draws from the process-wide concurrency budget, so a
        // write running under another pool's guard shrinks accordingly.
        let budget = config::codec_concurrent_target();
        let workers = self.options.parallel_workers.min(budget).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|err| ZarrError::InternalInvariant(err.to_string()))?;
        // Reserve the budget for this pool; codec work and any further pools
        // see the remainder until the guard drops.
        let _cap = config::ConcurrentTargetGuard::cap((budget / workers).max(1));

        let first_error: Mutex<Option<ZarrError>> = Mutex::new(None);
        let progress = self.options.progress.clone();
        let written = &Mutex::new(0u64);

        pool.scope(|scope| {
            while first_error.lock().is_none() {
                let Some(chunk) = iter.as_base_mut().next_chunk() else {
                    break;
                };
                if let Err(err) = target.admit(&chunk) {
                    *first_error.lock() = Some(err);
                    break;
                }
                let job = target.job(&self.store, chunk);
                let first_error = &first_error;
                let progress = progress.clone();
                let dataset = target.path.clone();
                scope.spawn(move |_| {
                    if first_error.lock().is_some() {
                        return;
                    }
                    match job.execute() {
                        Ok(()) => {
                            let mut written = written.lock();
                            *written += 1;
                            if let Some(progress) = progress {
                                progress(&ProgressEvent {
                                    dataset,
                                    chunks_written: *written,
                                });
                            }
                        }
                        Err(err) => {
                            let mut first_error = first_error.lock();
                            if first_error.is_none() {
                                *first_error = Some(err);
                            }
                        }
                    }
                });
            }
        });

        target.chunks_written += *written.lock();
        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Read the file into a builder arena, returning the arena and the root
    /// group's id.
    ///
    /// Dataset values are lazy handles; no chunk is read here. The schema
    /// cache, when present, hydrates this handle's type map.
    ///
    /// # Errors
    /// Returns [`ZarrError::NotFound`] if the store does not hold a file in
    /// this format, or [`ZarrError`] on storage or metadata errors.
    pub fn read(&self) -> Result<(BuilderArena, BuilderId), ZarrError> {
        if !self.store.can_read() {
            return Err(ZarrError::NotFound(format!(
                "{} does not hold a readable file",
                self.store.source_path()
            )));
        }

        let root = NodePath::root();
        let root_attrs = self.read_raw_attributes(&root)?;
        let specloc = root_attrs
            .get(SPECLOC)
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        if let Some(specloc) = &specloc {
            match spec_cache::read_spec_cache(&self.store, specloc) {
                Ok(cached) => self.type_map.write().merge(cached),
                Err(err) => log::warn!("schema cache read failed: {err}"),
            }
        }

        let mut arena = BuilderArena::new();
        let skip = specloc
            .as_deref()
            .and_then(|s| NodePath::new(s).ok());
        let root_id = read_group_tree(&self.store, &mut arena, &root, skip.as_ref())?;
        Ok((arena, root_id))
    }

    /// Resolve an object reference or link record to its target node.
    ///
    /// Resolution is lazy and cached per session: the first dereference of a
    /// `(source, path)` pair opens the target, subsequent ones reuse it. A
    /// stored `object_id` that does not match the resolved node logs an
    /// `ObjectIdMismatch` warning but still returns the node.
    ///
    /// # Errors
    /// Returns [`ZarrError::ExternalUnavailable`] if the source file cannot
    /// be opened and [`ZarrError::BrokenLink`] if the target path is missing.
    pub fn resolve_reference(&self, record: &ReferenceRecord) -> Result<ResolvedNode, ZarrError> {
        self.resolution.resolve_with(record, || {
            let store = if record.is_same_file() {
                self.store.clone()
            } else {
                self.external_store(&record.source)?
            };
            let path = NodePath::new(&record.path)?;
            let node = if store.get_key(&metadata::array_key(&path))?.is_some() {
                ResolvedNode::Dataset(read_dataset_handle(&store, &path)?)
            } else if store.get_key(&metadata::group_key(&path))?.is_some() {
                ResolvedNode::Group { store: store.clone(), path: path.clone() }
            } else {
                return Err(ZarrError::BrokenLink(path));
            };

            if let Some(expected) = &record.object_id {
                let attrs = read_raw_attributes_from(&store, &path)?;
                let actual = attrs.get(OBJECT_ID).and_then(serde_json::Value::as_str);
                if actual != Some(expected.as_str()) {
                    log::warn!(
                        "object id mismatch at {path}: expected {expected}, found {}",
                        actual.unwrap_or("none")
                    );
                }
            }
            Ok(node)
        })
    }

    /// Materialize a resolved node as a builder subtree.
    ///
    /// # Errors
    /// Returns [`ZarrError`] on storage or metadata errors.
    pub fn materialize(&self, node: &ResolvedNode) -> Result<(BuilderArena, BuilderId), ZarrError> {
        let mut arena = BuilderArena::new();
        match node {
            ResolvedNode::Group { store, path } => {
                let id = read_group_tree(store, &mut arena, path, None)?;
                Ok((arena, id))
            }
            ResolvedNode::Dataset(handle) => {
                let dataset = read_dataset_builder(&handle.store, handle.path())?;
                let id = arena.insert_dataset(dataset);
                Ok((arena, id))
            }
        }
    }

    fn external_store(&self, source: &str) -> Result<Arc<ZarrStore>, ZarrError> {
        let resolved = resolve_source(self.store.source_path(), source);
        let mut external = self.external.lock();
        if let Some(store) = external.get(&resolved) {
            return Ok(store.clone());
        }
        let store = ZarrStore::open_directory(&resolved, Mode::Read).map_err(|err| {
            ZarrError::ExternalUnavailable {
                file: source.to_string(),
                reason: err.to_string(),
            }
        })?;
        let store = Arc::new(store);
        external.insert(resolved, store.clone());
        Ok(store)
    }

    fn read_raw_attributes(
        &self,
        path: &NodePath,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ZarrError> {
        read_raw_attributes_from(&self.store, path)
    }
}

// ----------------------------------------------------------------------
// Write plan
// ----------------------------------------------------------------------

enum PlanEntry {
    Group(BuilderId, NodePath),
    Dataset(BuilderId, NodePath),
}

/// The precomputed write traversal: pre-order node list, per-builder paths,
/// and per-builder object ids for reference records.
struct WritePlan {
    order: Vec<PlanEntry>,
    paths: BTreeMap<BuilderId, NodePath>,
    object_ids: BTreeMap<BuilderId, Option<String>>,
    root_object_id: Option<String>,
}

impl WritePlan {
    fn build(arena: &BuilderArena, root: BuilderId) -> Result<Self, ZarrError> {
        let mut plan = Self {
            order: Vec::new(),
            paths: BTreeMap::new(),
            object_ids: BTreeMap::new(),
            root_object_id: None,
        };
        let root_group = arena.group(root).ok_or_else(|| {
            ZarrError::InternalInvariant("write root is not a group".to_string())
        })?;
        plan.root_object_id = attribute_object_id(&root_group.attributes);
        plan.visit_group(arena, root, NodePath::root())?;
        Ok(plan)
    }

    fn visit_group(
        &mut self,
        arena: &BuilderArena,
        id: BuilderId,
        path: NodePath,
    ) -> Result<(), ZarrError> {
        let group = arena.group(id).ok_or_else(|| {
            ZarrError::InternalInvariant(format!("builder at {path} is not a group"))
        })?;
        self.object_ids
            .insert(id, attribute_object_id(&group.attributes));
        self.paths.insert(id, path.clone());
        self.order.push(PlanEntry::Group(id, path.clone()));

        for (name, dataset_id) in &group.datasets {
            let child = path.child(name)?;
            let dataset = arena.dataset(*dataset_id).ok_or_else(|| {
                ZarrError::InternalInvariant(format!("builder at {child} is not a dataset"))
            })?;
            self.object_ids
                .insert(*dataset_id, attribute_object_id(&dataset.attributes));
            self.paths.insert(*dataset_id, child.clone());
            self.order.push(PlanEntry::Dataset(*dataset_id, child));
        }
        for (name, link_id) in &group.links {
            if !matches!(arena.get(*link_id), Builder::Link(_)) {
                return Err(ZarrError::InternalInvariant(format!(
                    "link child {name} of {path} is not a link"
                )));
            }
        }
        for (name, subgroup_id) in &group.subgroups {
            self.visit_group(arena, *subgroup_id, path.child(name)?)?;
        }
        Ok(())
    }

    fn builder_record(&self, target: BuilderId) -> Result<ReferenceRecord, ZarrError> {
        let path = self.paths.get(&target).ok_or_else(|| {
            ZarrError::InternalInvariant(
                "reference target is not part of the written tree".to_string(),
            )
        })?;
        Ok(ReferenceRecord {
            source: crate::link::SAME_FILE.to_string(),
            path: path.as_str().to_string(),
            object_id: self.object_ids.get(&target).cloned().flatten(),
            source_object_id: self.root_object_id.clone(),
            extra: serde_json::Map::default(),
        })
    }

    fn encode_ref(&self, reference: &RefValue) -> Result<ReferenceRecord, ZarrError> {
        match reference {
            RefValue::Builder(id) => self.builder_record(*id),
            RefValue::Record(record) => Ok(record.clone()),
        }
    }
}

fn attribute_object_id(attributes: &BTreeMap<String, AttributeValue>) -> Option<String> {
    match attributes.get(OBJECT_ID) {
        Some(AttributeValue::Str(id)) => Some(id.clone()),
        _ => None,
    }
}

fn text_filters(data_type: &DataType) -> Vec<CodecMetadata> {
    match data_type {
        DataType::Utf8 => vec![CodecMetadata::new(codec::VLEN_UTF8)],
        DataType::Ascii | DataType::IsoDatetime => vec![CodecMetadata::new(codec::VLEN_BYTES)],
        _ => Vec::new(),
    }
}

fn scalar_to_elements(
    value: &ScalarValue,
    data_type: &DataType,
    path: &NodePath,
) -> Result<ElementData, ZarrError> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let out = match (data_type, value) {
        (DataType::Bool, ScalarValue::Bool(b)) => ElementData::Bool(vec![*b]),
        (DataType::Int8, ScalarValue::Int(i)) => ElementData::Int8(vec![*i as i8]),
        (DataType::Int16, ScalarValue::Int(i)) => ElementData::Int16(vec![*i as i16]),
        (DataType::Int32, ScalarValue::Int(i)) => ElementData::Int32(vec![*i as i32]),
        (DataType::Int64, ScalarValue::Int(i)) => ElementData::Int64(vec![*i]),
        (DataType::UInt8, ScalarValue::UInt(u)) => ElementData::UInt8(vec![*u as u8]),
        (DataType::UInt16, ScalarValue::UInt(u)) => ElementData::UInt16(vec![*u as u16]),
        (DataType::UInt32, ScalarValue::UInt(u)) => ElementData::UInt32(vec![*u as u32]),
        (DataType::UInt64, ScalarValue::UInt(u)) => ElementData::UInt64(vec![*u]),
        (DataType::Float32, ScalarValue::Float(f)) => ElementData::Float32(vec![*f as f32]),
        (DataType::Float64, ScalarValue::Float(f)) => ElementData::Float64(vec![*f]),
        (DataType::Utf8 | DataType::Ascii | DataType::IsoDatetime, ScalarValue::Str(s)) => {
            ElementData::Str(vec![s.clone()])
        }
        _ => {
            return Err(ZarrError::InternalInvariant(format!(
                "scalar at {path} does not match its declared data type"
            )))
        }
    };
    Ok(out)
}

fn scalar_to_wire(value: &ScalarValue, plan: &WritePlan) -> Result<WireScalar, ZarrError> {
    Ok(match value {
        ScalarValue::Bool(b) => WireScalar::Bool(*b),
        ScalarValue::Int(i) => WireScalar::Int(*i),
        ScalarValue::UInt(u) => WireScalar::UInt(*u),
        ScalarValue::Float(f) => WireScalar::Float(*f),
        ScalarValue::Str(s) => WireScalar::Str(s.clone()),
        ScalarValue::Ref(reference) => WireScalar::Ref(plan.encode_ref(reference)?),
    })
}

fn wire_to_scalar(value: WireScalar) -> ScalarValue {
    match value {
        WireScalar::Bool(b) => ScalarValue::Bool(b),
        WireScalar::Int(i) => ScalarValue::Int(i),
        WireScalar::UInt(u) => ScalarValue::UInt(u),
        WireScalar::Float(f) => ScalarValue::Float(f),
        WireScalar::Str(s) => ScalarValue::Str(s),
        WireScalar::Ref(record) => ScalarValue::Ref(RefValue::Record(record)),
    }
}

// ----------------------------------------------------------------------
// Chunk write target
// ----------------------------------------------------------------------

/// Bookkeeping for one dataset receiving chunked writes.
struct ChunkWriteTarget {
    path: NodePath,
    array: ArrayMetadata,
    separator: ChunkKeySeparator,
    written: HashSet<Vec<u64>>,
    shape_grew: bool,
    chunks_written: u64,
}

impl ChunkWriteTarget {
    fn new(path: NodePath, array: ArrayMetadata, separator: ChunkKeySeparator) -> Self {
        Self {
            path,
            array,
            separator,
            written: HashSet::new(),
            shape_grew: false,
            chunks_written: 0,
        }
    }

    /// Admit a chunk: enforce at-most-once per coordinate and grow the shape
    /// when the chunk lands beyond the current bounds.
    fn admit(&mut self, chunk: &DataChunk) -> Result<(), ZarrError> {
        if chunk.indices.len() != self.array.shape.len() {
            return Err(ZarrError::InternalInvariant(format!(
                "chunk rank {} does not match dataset {} rank {}",
                chunk.indices.len(),
                self.path,
                self.array.shape.len()
            )));
        }
        if !self.written.insert(chunk.indices.clone()) {
            return Err(ZarrError::OverlappingChunks {
                path: self.path.clone(),
                coordinates: chunk.indices.clone(),
            });
        }
        for dim in 0..self.array.shape.len() {
            let needed = chunk.indices[dim] * self.array.chunks[dim] + chunk.extent[dim];
            if needed > self.array.shape[dim] {
                self.array.shape[dim] = needed;
                self.shape_grew = true;
            }
        }
        Ok(())
    }

    fn job(&self, store: &Arc<ZarrStore>, chunk: DataChunk) -> ChunkJob {
        ChunkJob {
            store: store.clone(),
            key: metadata::chunk_key(&self.path, &chunk.indices, self.separator),
            chunk_shape: self.array.chunks.clone(),
            compressor: self.array.compressor.clone(),
            fill_value: self.array.fill_value.clone(),
            chunk,
        }
    }

    /// Rewrite the array metadata if the shape grew during the write.
    fn finalize(&self, store: &ZarrStore) -> Result<(), ZarrError> {
        if self.shape_grew {
            store.set_json(&metadata::array_key(&self.path), &self.path, &self.array)?;
        }
        Ok(())
    }
}

/// An independent chunk write: encode, compress, store.
struct ChunkJob {
    store: Arc<ZarrStore>,
    key: crate::storage::StoreKey,
    chunk_shape: Vec<u64>,
    compressor: Option<CodecMetadata>,
    fill_value: FillValueMetadata,
    chunk: DataChunk,
}

impl ChunkJob {
    fn execute(self) -> Result<(), ZarrError> {
        let map = chunk::chunk_fill_map(&self.chunk_shape, &self.chunk.extent);
        let full = codec::pad_block(&self.chunk.data, &map, &self.fill_value);
        let bytes = match &full {
            ElementData::Str(strings) => codec::encode_vlen(strings),
            _ => codec::encode_fixed(&full),
        };
        let bytes = codec::compress(bytes, &self.compressor)?;
        self.store.set_key(&self.key, bytes.into())
    }
}

// ----------------------------------------------------------------------
// Read side
// ----------------------------------------------------------------------

fn read_raw_attributes_from(
    store: &ZarrStore,
    path: &NodePath,
) -> Result<serde_json::Map<String, serde_json::Value>, ZarrError> {
    Ok(store
        .get_json(&metadata::attrs_key(path), path)?
        .unwrap_or_default())
}

/// Read the group tree under `path` into `arena`, skipping the schema-cache
/// subtree. Dataset values are lazy handles; links become link builders with
/// their stored source (`"."` for same-file targets).
fn read_group_tree(
    store: &Arc<ZarrStore>,
    arena: &mut BuilderArena,
    path: &NodePath,
    skip: Option<&NodePath>,
) -> Result<BuilderId, ZarrError> {
    let raw_attrs = read_raw_attributes_from(store, path)?;
    let mut group = GroupBuilder::new(if path.is_root() { "" } else { path.name() });
    for (name, value) in &raw_attrs {
        if name == ZARR_LINK || name == SPECLOC {
            continue;
        }
        group
            .attributes
            .insert(name.clone(), decode_attribute(value, path)?);
    }

    let mut link_builders = Vec::new();
    if let Some(records) = raw_attrs.get(ZARR_LINK) {
        let records: Vec<LinkRecord> = serde_json::from_value(records.clone())
            .map_err(|err| ZarrError::invalid_metadata(path, err))?;
        for record in records {
            link_builders.push(LinkBuilder::external(
                &record.name,
                &record.reference.source,
                &record.reference.path,
                record.reference.object_id.clone(),
            ));
        }
    }

    let group_id = arena.insert_group(group);
    for child_path in store.child_paths(path)? {
        if Some(&child_path) == skip {
            continue;
        }
        let name = child_path.name().to_string();
        if store.get_key(&metadata::array_key(&child_path))?.is_some() {
            let dataset = read_dataset_builder(store, &child_path)?;
            let child_id = arena.insert_dataset(dataset);
            match arena.get_mut(group_id) {
                Builder::Group(group) => {
                    group.datasets.insert(name, child_id);
                }
                _ => unreachable!(),
            }
        } else {
            let child_id = read_group_tree(store, arena, &child_path, skip)?;
            match arena.get_mut(group_id) {
                Builder::Group(group) => {
                    group.subgroups.insert(name, child_id);
                }
                _ => unreachable!(),
            }
        }
    }
    for link in link_builders {
        let name = link.name.clone();
        let link_id = arena.insert_link(link);
        match arena.get_mut(group_id) {
            Builder::Group(group) => {
                group.links.insert(name, link_id);
            }
            _ => unreachable!(),
        }
    }
    Ok(group_id)
}

fn read_dataset_builder(
    store: &Arc<ZarrStore>,
    path: &NodePath,
) -> Result<DatasetBuilder, ZarrError> {
    let handle = read_dataset_handle(store, path)?;
    let raw_attrs = read_raw_attributes_from(store, path)?;

    let mut data_io = ZarrDataIO {
        chunks: Some(handle.metadata.chunks.clone()),
        ..ZarrDataIO::default()
    };
    data_io.compressor = match &handle.metadata.compressor {
        None => CompressorSelection::Disabled,
        Some(codec) if codec.id == "gzip" => CompressorSelection::Gzip(
            codec
                .configuration
                .get("level")
                .and_then(serde_json::Value::as_u64)
                .map_or(codec::DEFAULT_GZIP_LEVEL, |l| l as u32),
        ),
        Some(_) => CompressorSelection::Default,
    };
    if handle.object_codec != ObjectCodecKind::default() {
        data_io.object_codec = Some(handle.object_codec);
    }

    let name = handle.path.name().to_string();
    let mut dataset = DatasetBuilder::new(&name, handle.data_type.clone(), Value::Lazy(handle));
    dataset.data_io = data_io;
    for (name, value) in &raw_attrs {
        if name == ZARR_DTYPE || name == ZARR_LINK {
            continue;
        }
        dataset
            .attributes
            .insert(name.clone(), decode_attribute(value, path)?);
    }
    Ok(dataset)
}

fn read_dataset_handle(
    store: &Arc<ZarrStore>,
    path: &NodePath,
) -> Result<DatasetHandle, ZarrError> {
    let array: ArrayMetadata = store
        .get_json(&metadata::array_key(path), path)?
        .ok_or_else(|| ZarrError::NotFound(path.to_string()))?;
    let raw_attrs = read_raw_attributes_from(store, path)?;
    let hint = raw_attrs.get(ZARR_DTYPE);
    let scalar = hint.and_then(serde_json::Value::as_str) == Some("scalar");
    let data_type = DataType::from_metadata_with_hint(&array.dtype, hint)
        .map_err(|err| ZarrError::invalid_metadata(path, err))?;
    let object_codec = array
        .filters
        .iter()
        .flatten()
        .find_map(|filter| ObjectCodecKind::from_filter_id(&filter.id))
        .unwrap_or_default();
    Ok(DatasetHandle {
        store: store.clone(),
        path: path.clone(),
        metadata: Arc::new(array),
        data_type,
        scalar,
        object_codec,
    })
}

/// A lazily-read dataset: metadata is loaded, chunks are not.
#[derive(Clone)]
pub struct DatasetHandle {
    store: Arc<ZarrStore>,
    path: NodePath,
    metadata: Arc<ArrayMetadata>,
    data_type: DataType,
    scalar: bool,
    object_codec: ObjectCodecKind,
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("path", &self.path)
            .field("shape", &self.metadata.shape)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

impl DatasetHandle {
    /// The dataset path.
    #[must_use]
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// The dataset shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.metadata.shape
    }

    /// The declared data type.
    #[must_use]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Indicates if this dataset stores a scalar.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    /// The array metadata document.
    #[must_use]
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    fn chunk_bytes(&self, indices: &[u64]) -> Result<Option<Vec<u8>>, ZarrError> {
        let key = metadata::chunk_key(&self.path, indices, self.metadata.dimension_separator);
        match self.store.get_key(&key)? {
            Some(bytes) => Ok(Some(codec::decompress(&bytes, &self.metadata.compressor)?)),
            None => Ok(None),
        }
    }

    /// Read the full array.
    ///
    /// Missing chunks materialize as the fill value.
    ///
    /// # Errors
    /// Returns [`ZarrError`] for reference or compound datasets (use
    /// [`DatasetHandle::read_references`] / [`DatasetHandle::read_rows`]) and
    /// on storage errors.
    pub fn read_array(&self) -> Result<(ElementData, Vec<u64>), ZarrError> {
        let shape = self.metadata.shape.clone();
        let chunks = self.metadata.chunks.clone();
        let count = usize::try_from(chunk::element_count(&shape)).unwrap_or(usize::MAX);
        let empty = empty_elements(&self.data_type, &self.path)?;
        let mut dest = codec::pad_block(&empty, &vec![None; count], &self.metadata.fill_value);

        for indices in chunk::grid_indices(&chunk::chunk_grid_shape(&shape, &chunks)) {
            let Some(bytes) = self.chunk_bytes(&indices)? else {
                continue;
            };
            let full = codec::decode_fixed(&bytes, &empty)?;
            let extent = chunk::chunk_extent(&shape, &chunks, &indices);
            let map = chunk::chunk_fill_map(&chunks, &extent);
            let block = codec::unpad_block(&full, &map);
            chunk::scatter_block(&mut dest, &block, &shape, &chunks, &indices, &extent);
        }
        Ok((dest, shape))
    }

    /// Read a scalar dataset's value.
    ///
    /// # Errors
    /// Returns [`ZarrError`] if the dataset is empty or on storage errors.
    pub fn read_scalar(&self) -> Result<ScalarValue, ZarrError> {
        if self.data_type.is_reference() {
            let records = self.read_references()?;
            let record = records
                .into_iter()
                .next()
                .ok_or_else(|| ZarrError::invalid_metadata(&self.path, "empty scalar dataset"))?;
            return Ok(ScalarValue::Ref(RefValue::Record(record)));
        }
        let (data, _) = self.read_array()?;
        element_scalar(&data, 0)
            .ok_or_else(|| ZarrError::invalid_metadata(&self.path, "empty scalar dataset"))
    }

    /// Read a reference-typed dataset's records.
    ///
    /// # Errors
    /// Returns [`ZarrError::RegionReferenceUnsupported`] for region
    /// references and [`ZarrError`] on storage errors.
    pub fn read_references(&self) -> Result<Vec<ReferenceRecord>, ZarrError> {
        if matches!(self.data_type, DataType::RegionReference) {
            return Err(ZarrError::RegionReferenceUnsupported(self.path.clone()));
        }
        let count = usize::try_from(chunk::element_count(&self.metadata.shape)).unwrap_or(0);
        let grid = chunk::chunk_grid_shape(&self.metadata.shape, &self.metadata.chunks);
        let mut out = Vec::with_capacity(count);
        for indices in chunk::grid_indices(&grid) {
            if let Some(bytes) = self.chunk_bytes(&indices)? {
                out.extend(object_codec::decode_references(self.object_codec, &bytes)?);
            }
        }
        out.truncate(count);
        Ok(out)
    }

    /// Read a compound dataset's records.
    ///
    /// # Errors
    /// Returns [`ZarrError`] if the dataset is not compound or on storage
    /// errors.
    pub fn read_rows(&self) -> Result<Vec<Vec<ScalarValue>>, ZarrError> {
        let DataType::Compound(fields) = &self.data_type else {
            return Err(ZarrError::invalid_metadata(
                &self.path,
                "dataset is not compound",
            ));
        };
        let fixed = self.data_type.is_fixed_size();
        let count = usize::try_from(chunk::element_count(&self.metadata.shape)).unwrap_or(0);
        let grid = chunk::chunk_grid_shape(&self.metadata.shape, &self.metadata.chunks);
        let mut out = Vec::with_capacity(count);
        for indices in chunk::grid_indices(&grid) {
            if let Some(bytes) = self.chunk_bytes(&indices)? {
                let rows = if fixed {
                    codec::unpack_rows(&bytes, fields)?
                } else {
                    object_codec::decode_rows(self.object_codec, &bytes, fields)?
                };
                out.extend(rows.into_iter().map(|row| {
                    row.into_iter().map(wire_to_scalar).collect::<Vec<_>>()
                }));
            }
        }
        out.truncate(count);
        Ok(out)
    }

    /// Read and materialize the dataset's value.
    ///
    /// # Errors
    /// Returns [`ZarrError`] on storage or decoding errors.
    pub fn read_value(&self) -> Result<Value, ZarrError> {
        if self.data_type.is_reference() {
            let records = self.read_references()?;
            let refs: Vec<RefValue> = records.into_iter().map(RefValue::Record).collect();
            if self.scalar {
                let reference = refs.into_iter().next().ok_or_else(|| {
                    ZarrError::invalid_metadata(&self.path, "empty scalar dataset")
                })?;
                return Ok(Value::Scalar(ScalarValue::Ref(reference)));
            }
            return Ok(Value::References(refs));
        }
        if let DataType::Compound(fields) = &self.data_type {
            return Ok(Value::Compound {
                fields: fields.clone(),
                rows: self.read_rows()?,
            });
        }
        if self.scalar {
            return Ok(Value::Scalar(self.read_scalar()?));
        }
        let (data, shape) = self.read_array()?;
        Ok(Value::Array { data, shape })
    }
}

fn empty_elements(data_type: &DataType, path: &NodePath) -> Result<ElementData, ZarrError> {
    Ok(match data_type {
        DataType::Int8 => ElementData::Int8(Vec::new()),
        DataType::Int16 => ElementData::Int16(Vec::new()),
        DataType::Int32 => ElementData::Int32(Vec::new()),
        DataType::Int64 => ElementData::Int64(Vec::new()),
        DataType::UInt8 => ElementData::UInt8(Vec::new()),
        DataType::UInt16 => ElementData::UInt16(Vec::new()),
        DataType::UInt32 => ElementData::UInt32(Vec::new()),
        DataType::UInt64 => ElementData::UInt64(Vec::new()),
        DataType::Float32 => ElementData::Float32(Vec::new()),
        DataType::Float64 => ElementData::Float64(Vec::new()),
        DataType::Bool => ElementData::Bool(Vec::new()),
        DataType::Utf8 | DataType::Ascii | DataType::IsoDatetime => ElementData::Str(Vec::new()),
        DataType::ObjectReference | DataType::RegionReference | DataType::Compound(_) => {
            return Err(ZarrError::InternalInvariant(format!(
                "dataset {path} has no element array representation"
            )))
        }
    })
}

fn element_scalar(data: &ElementData, index: usize) -> Option<ScalarValue> {
    if index >= data.len() {
        return None;
    }
    Some(match data {
        ElementData::Int8(v) => ScalarValue::Int(i64::from(v[index])),
        ElementData::Int16(v) => ScalarValue::Int(i64::from(v[index])),
        ElementData::Int32(v) => ScalarValue::Int(i64::from(v[index])),
        ElementData::Int64(v) => ScalarValue::Int(v[index]),
        ElementData::UInt8(v) => ScalarValue::UInt(u64::from(v[index])),
        ElementData::UInt16(v) => ScalarValue::UInt(u64::from(v[index])),
        ElementData::UInt32(v) => ScalarValue::UInt(u64::from(v[index])),
        ElementData::UInt64(v) => ScalarValue::UInt(v[index]),
        ElementData::Float32(v) => ScalarValue::Float(f64::from(v[index])),
        ElementData::Float64(v) => ScalarValue::Float(v[index]),
        ElementData::Bool(v) => ScalarValue::Bool(v[index]),
        ElementData::Str(v) => ScalarValue::Str(v[index].clone()),
    })
}
