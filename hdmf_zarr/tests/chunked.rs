#![allow(missing_docs)]

use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hdmf_zarr::builder::{
    Builder, BuilderArena, BuilderId, DatasetBuilder, ElementData, GroupBuilder, Value,
};
use hdmf_zarr::chunk::{
    ArrayChunkIterator, ChunkIterator, DataChunk, DataChunkIterator, ParallelDataChunkIterator,
};
use hdmf_zarr::data_type::DataType;
use hdmf_zarr::io::{ProgressEvent, ZarrIO, ZarrIOOptions};
use hdmf_zarr::spec_cache::TypeMap;
use hdmf_zarr::store::ZarrStore;
use hdmf_zarr::ZarrError;

/// A scripted iterator yielding a fixed list of chunks, for exercising
/// overlap detection and unlimited dimensions.
struct ScriptedIterator {
    data_type: DataType,
    shape: Vec<Option<u64>>,
    chunk_shape: Vec<u64>,
    chunks: VecDeque<DataChunk>,
}

impl DataChunkIterator for ScriptedIterator {
    fn data_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn shape(&self) -> Vec<Option<u64>> {
        self.shape.clone()
    }

    fn chunk_shape(&self) -> Vec<u64> {
        self.chunk_shape.clone()
    }

    fn next_chunk(&mut self) -> Option<DataChunk> {
        self.chunks.pop_front()
    }
}

impl ParallelDataChunkIterator for ScriptedIterator {}

fn add_dataset(
    arena: &mut BuilderArena,
    parent: BuilderId,
    dataset: DatasetBuilder,
) -> BuilderId {
    let name = dataset.name.clone();
    let id = arena.insert_dataset(dataset);
    match arena.get_mut(parent) {
        Builder::Group(group) => {
            group.datasets.insert(name, id);
        }
        _ => unreachable!(),
    }
    id
}

fn open_io(options: ZarrIOOptions) -> ZarrIO {
    ZarrIO::open(ZarrStore::open_memory("mem://chunked.zarr"), TypeMap::new(), options)
}

fn big_data(shape: u64) -> ElementData {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    ElementData::Int32((0..shape * shape).map(|i| i as i32).collect())
}

#[test]
fn s4_iterative_chunked_write() -> Result<(), Box<dyn Error>> {
    const N: u64 = 100;
    let data = big_data(N);
    let iter = ArrayChunkIterator::new(
        data.clone(),
        DataType::Int32,
        vec![N, N],
        vec![10, 10],
    );

    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    let big = add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "big",
            DataType::Int32,
            Value::Iterator(ChunkIterator::Serial(Box::new(iter))),
        ),
    );

    let io = open_io(ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    // The iterator is left exhausted in the caller's arena.
    match &arena.dataset(big).unwrap().value {
        Value::Iterator(_) => {}
        other => panic!("unexpected value {other:?}"),
    }

    let (tree, root) = io.read()?;
    let big = tree.group(root).unwrap().datasets["big"];
    let (read, shape) = match &tree.dataset(big).unwrap().value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(shape, vec![N, N]);
    assert_eq!(read, data);
    Ok(())
}

#[test]
fn overlapping_chunk_writes_fail() {
    let chunk = |v: i32| DataChunk {
        indices: vec![0],
        extent: vec![2],
        data: ElementData::Int32(vec![v, v]),
    };
    let iter = ScriptedIterator {
        data_type: DataType::Int32,
        shape: vec![Some(4)],
        chunk_shape: vec![2],
        chunks: VecDeque::from([chunk(1), chunk(2)]),
    };

    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "dup",
            DataType::Int32,
            Value::Iterator(ChunkIterator::Serial(Box::new(iter))),
        ),
    );

    let io = open_io(ZarrIOOptions::new());
    let err = io.write(&mut arena, root).unwrap_err();
    assert!(matches!(
        err,
        ZarrError::OverlappingChunks { ref coordinates, .. } if coordinates == &vec![0]
    ));
}

#[test]
fn parallel_write_matches_serial() -> Result<(), Box<dyn Error>> {
    const N: u64 = 40;
    let data = big_data(N);

    let iter = ArrayChunkIterator::new(
        data.clone(),
        DataType::Int32,
        vec![N, N],
        vec![8, 8],
    );
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "par",
            DataType::Int32,
            Value::Iterator(ChunkIterator::Parallel(Box::new(iter))),
        ),
    );

    let progressed = Arc::new(AtomicU64::new(0));
    let progress_counter = progressed.clone();
    let mut options = ZarrIOOptions::new();
    options.parallel_workers = 4;
    options.progress = Some(Arc::new(move |_event: &ProgressEvent| {
        progress_counter.fetch_add(1, Ordering::Relaxed);
    }));

    let io = open_io(options);
    io.write(&mut arena, root)?;
    assert_eq!(progressed.load(Ordering::Relaxed), 25);

    let (tree, root) = io.read()?;
    let par = tree.group(root).unwrap().datasets["par"];
    let (read, shape) = match &tree.dataset(par).unwrap().value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(shape, vec![N, N]);
    assert_eq!(read, data);
    Ok(())
}

#[test]
fn parallel_write_respects_concurrency_cap() -> Result<(), Box<dyn Error>> {
    use hdmf_zarr::config::ConcurrentTargetGuard;

    // With the process-wide budget capped to one, a four-worker request
    // degrades to a single-thread pool and the write is still correct.
    let _cap = ConcurrentTargetGuard::cap(1);

    const N: u64 = 16;
    let data = big_data(N);
    let iter = ArrayChunkIterator::new(
        data.clone(),
        DataType::Int32,
        vec![N, N],
        vec![8, 8],
    );
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "capped",
            DataType::Int32,
            Value::Iterator(ChunkIterator::Parallel(Box::new(iter))),
        ),
    );

    let mut options = ZarrIOOptions::new();
    options.parallel_workers = 4;
    let io = open_io(options);
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let capped = tree.group(root).unwrap().datasets["capped"];
    let (read, _) = match &tree.dataset(capped).unwrap().value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(read, data);
    Ok(())
}

#[test]
fn unlimited_dimension_grows_with_chunks() -> Result<(), Box<dyn Error>> {
    let iter = ScriptedIterator {
        data_type: DataType::Int32,
        shape: vec![None, Some(3)],
        chunk_shape: vec![2, 3],
        chunks: VecDeque::from([
            DataChunk {
                indices: vec![0, 0],
                extent: vec![2, 3],
                data: ElementData::Int32(vec![0, 1, 2, 3, 4, 5]),
            },
            DataChunk {
                indices: vec![2, 0],
                extent: vec![1, 3],
                data: ElementData::Int32(vec![12, 13, 14]),
            },
        ]),
    };
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "grow",
            DataType::Int32,
            Value::Iterator(ChunkIterator::Serial(Box::new(iter))),
        ),
    );

    let io = open_io(ZarrIOOptions::new());
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let grow = tree.group(root).unwrap().datasets["grow"];
    let (read, shape) = match &tree.dataset(grow).unwrap().value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    // The shape followed the furthest chunk; the unwritten middle chunk reads
    // back as the fill value.
    assert_eq!(shape, vec![5, 3]);
    assert_eq!(
        read,
        ElementData::Int32(vec![0, 1, 2, 3, 4, 5, 0, 0, 0, 0, 0, 0, 12, 13, 14])
    );
    Ok(())
}

#[test]
fn unlimited_dimension_with_no_chunks_reads_empty() -> Result<(), Box<dyn Error>> {
    let iter = ScriptedIterator {
        data_type: DataType::Float64,
        shape: vec![None, Some(4)],
        chunk_shape: vec![1, 4],
        chunks: VecDeque::new(),
    };
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "empty",
            DataType::Float64,
            Value::Iterator(ChunkIterator::Serial(Box::new(iter))),
        ),
    );

    let io = open_io(ZarrIOOptions::new());
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let empty = tree.group(root).unwrap().datasets["empty"];
    let (read, shape) = match &tree.dataset(empty).unwrap().value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(shape, vec![0, 4]);
    assert_eq!(read.len(), 0);
    Ok(())
}

#[test]
fn compressed_chunks_round_trip() -> Result<(), Box<dyn Error>> {
    use hdmf_zarr::builder::CompressorSelection;

    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    let data = ElementData::Float64((0..256).map(f64::from).collect());
    let mut dataset = DatasetBuilder::new(
        "smooth",
        DataType::Float64,
        Value::Array {
            data: data.clone(),
            shape: vec![16, 16],
        },
    );
    dataset.data_io.chunks = Some(vec![4, 16]);
    dataset.data_io.compressor = CompressorSelection::Gzip(6);
    add_dataset(&mut arena, root, dataset);

    let io = open_io(ZarrIOOptions::new());
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let smooth = tree.group(root).unwrap().datasets["smooth"];
    let dataset = tree.dataset(smooth).unwrap();
    assert_eq!(dataset.data_io.chunks, Some(vec![4, 16]));
    assert_eq!(dataset.data_io.compressor, CompressorSelection::Gzip(6));
    let (read, _) = match &dataset.value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(read, data);
    Ok(())
}
