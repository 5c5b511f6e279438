//! Chunk grids and chunk iterators.
//!
//! Datasets are stored as a regular grid of chunks. An in-memory array is
//! split into chunk blocks on write; an iterative write draws blocks from a
//! [`DataChunkIterator`] instead, which also permits unlimited dimensions
//! (the dataset grows as chunks arrive).

use crate::builder::ElementData;
use crate::data_type::DataType;

/// The number of elements of an array shape.
#[must_use]
pub fn element_count(shape: &[u64]) -> u64 {
    shape.iter().product()
}

/// The shape of the chunk grid covering `shape` with `chunks`-shaped chunks.
///
/// # Panics
/// Panics if `chunks` has a zero entry or the wrong dimensionality.
#[must_use]
pub fn chunk_grid_shape(shape: &[u64], chunks: &[u64]) -> Vec<u64> {
    assert_eq!(shape.len(), chunks.len());
    shape
        .iter()
        .zip(chunks)
        .map(|(s, c)| s.div_ceil(*c))
        .collect()
}

/// All chunk grid indices of a grid, in C order.
#[must_use]
pub fn grid_indices(grid_shape: &[u64]) -> Vec<Vec<u64>> {
    let mut out = Vec::new();
    if grid_shape.iter().any(|&g| g == 0) {
        return out;
    }
    let mut indices = vec![0u64; grid_shape.len()];
    loop {
        out.push(indices.clone());
        // Odometer increment, last dimension fastest.
        let mut dim = grid_shape.len();
        loop {
            if dim == 0 {
                return out;
            }
            dim -= 1;
            indices[dim] += 1;
            if indices[dim] < grid_shape[dim] {
                break;
            }
            indices[dim] = 0;
        }
    }
}

/// The extent of chunk `indices` clipped to the array `shape`.
#[must_use]
pub fn chunk_extent(shape: &[u64], chunks: &[u64], indices: &[u64]) -> Vec<u64> {
    indices
        .iter()
        .zip(chunks.iter().zip(shape))
        .map(|(i, (c, s))| (s.saturating_sub(i * c)).min(*c))
        .collect()
}

/// Map each position of a full `chunk_shape` block (C order) to the flat index
/// within an `extent`-shaped block, or [`None`] where the position is padding.
#[must_use]
pub(crate) fn chunk_fill_map(chunk_shape: &[u64], extent: &[u64]) -> Vec<Option<usize>> {
    let len = usize::try_from(element_count(chunk_shape)).unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    let mut coords = vec![0u64; chunk_shape.len()];
    for _ in 0..len {
        if coords.iter().zip(extent).all(|(c, e)| c < e) {
            let mut flat = 0u64;
            for (c, e) in coords.iter().zip(extent) {
                flat = flat * e + c;
            }
            out.push(Some(usize::try_from(flat).unwrap()));
        } else {
            out.push(None);
        }
        // Odometer increment over the chunk shape.
        let mut dim = chunk_shape.len();
        while dim > 0 {
            dim -= 1;
            coords[dim] += 1;
            if coords[dim] < chunk_shape[dim] {
                break;
            }
            coords[dim] = 0;
        }
    }
    out
}

/// Map each position of an `extent`-shaped block at chunk `indices` to its
/// flat index within the full `shape`-d array (C order).
#[must_use]
pub(crate) fn block_array_map(
    shape: &[u64],
    chunks: &[u64],
    indices: &[u64],
    extent: &[u64],
) -> Vec<usize> {
    let len = usize::try_from(element_count(extent)).unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    let offset: Vec<u64> = indices.iter().zip(chunks).map(|(i, c)| i * c).collect();
    let mut coords = vec![0u64; extent.len()];
    for _ in 0..len {
        let mut flat = 0u64;
        for ((c, o), s) in coords.iter().zip(&offset).zip(shape) {
            flat = flat * s + (c + o);
        }
        out.push(usize::try_from(flat).unwrap());
        let mut dim = extent.len();
        while dim > 0 {
            dim -= 1;
            coords[dim] += 1;
            if coords[dim] < extent[dim] {
                break;
            }
            coords[dim] = 0;
        }
    }
    out
}

macro_rules! for_each_element_data {
    ($data:expr, $inner:ident, $body:expr) => {
        match $data {
            ElementData::Int8($inner) => ElementData::Int8($body),
            ElementData::Int16($inner) => ElementData::Int16($body),
            ElementData::Int32($inner) => ElementData::Int32($body),
            ElementData::Int64($inner) => ElementData::Int64($body),
            ElementData::UInt8($inner) => ElementData::UInt8($body),
            ElementData::UInt16($inner) => ElementData::UInt16($body),
            ElementData::UInt32($inner) => ElementData::UInt32($body),
            ElementData::UInt64($inner) => ElementData::UInt64($body),
            ElementData::Float32($inner) => ElementData::Float32($body),
            ElementData::Float64($inner) => ElementData::Float64($body),
            ElementData::Bool($inner) => ElementData::Bool($body),
            ElementData::Str($inner) => ElementData::Str($body),
        }
    };
}

/// Gather the block of chunk `indices` from flat array `data`.
///
/// Returns the block (C order over the clipped extent) and the extent.
#[must_use]
pub(crate) fn gather_block(
    data: &ElementData,
    shape: &[u64],
    chunks: &[u64],
    indices: &[u64],
) -> (ElementData, Vec<u64>) {
    let extent = chunk_extent(shape, chunks, indices);
    let map = block_array_map(shape, chunks, indices, &extent);
    let block = for_each_element_data!(data, v, map.iter().map(|&i| v[i].clone()).collect());
    (block, extent)
}

/// Scatter an `extent`-shaped block at chunk `indices` into flat array `dest`.
pub(crate) fn scatter_block(
    dest: &mut ElementData,
    block: &ElementData,
    shape: &[u64],
    chunks: &[u64],
    indices: &[u64],
    extent: &[u64],
) {
    let map = block_array_map(shape, chunks, indices, extent);
    macro_rules! scatter {
        ($($variant:ident),*) => {
            match (dest, block) {
                $((ElementData::$variant(dest), ElementData::$variant(block)) => {
                    for (dst_index, value) in map.iter().zip(block) {
                        dest[*dst_index] = value.clone();
                    }
                })*
                _ => debug_assert!(false, "chunk block dtype mismatch"),
            }
        };
    }
    scatter!(
        Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32, UInt64, Float32, Float64, Bool, Str
    );
}

/// A block of data destined for one chunk of a dataset.
#[derive(Debug)]
pub struct DataChunk {
    /// The chunk grid indices.
    pub indices: Vec<u64>,
    /// The block shape; elementwise at most the dataset's chunk shape.
    pub extent: Vec<u64>,
    /// The block data, C order over `extent`.
    pub data: ElementData,
}

/// A producer of array chunks with coordinates.
pub trait DataChunkIterator: Send {
    /// The declared data type of the elements.
    fn data_type(&self) -> DataType;

    /// The declared dataset shape; [`None`] entries are unlimited dimensions.
    fn shape(&self) -> Vec<Option<u64>>;

    /// The chunk shape.
    fn chunk_shape(&self) -> Vec<u64>;

    /// Produce the next chunk, or [`None`] when exhausted.
    fn next_chunk(&mut self) -> Option<DataChunk>;
}

/// A [`DataChunkIterator`] whose chunks may be written concurrently.
///
/// Implementations assert that the produced chunks are independent: no two
/// chunks target the same coordinates and block data does not alias shared
/// mutable state.
pub trait ParallelDataChunkIterator: DataChunkIterator + Sync {}

/// A chunk iterator handed to the engine inside a dataset value.
pub enum ChunkIterator {
    /// Chunks are written one at a time by the owning task.
    Serial(Box<dyn DataChunkIterator>),
    /// Chunks may be distributed over a worker pool.
    Parallel(Box<dyn ParallelDataChunkIterator>),
}

impl ChunkIterator {
    pub(crate) fn as_base(&self) -> &dyn DataChunkIterator {
        match self {
            Self::Serial(iter) => iter.as_ref(),
            Self::Parallel(iter) => iter.as_ref(),
        }
    }

    pub(crate) fn as_base_mut(&mut self) -> &mut dyn DataChunkIterator {
        match self {
            Self::Serial(iter) => iter.as_mut(),
            Self::Parallel(iter) => iter.as_mut(),
        }
    }

    /// Indicates if chunks may be written concurrently.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel(_))
    }
}

/// An already-drained iterator, left behind in a builder after a write has
/// consumed its chunks.
#[derive(Debug)]
pub struct ExhaustedIterator {
    data_type: DataType,
}

impl ExhaustedIterator {
    /// Create an exhausted iterator for `data_type` elements.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl DataChunkIterator for ExhaustedIterator {
    fn data_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn shape(&self) -> Vec<Option<u64>> {
        Vec::new()
    }

    fn chunk_shape(&self) -> Vec<u64> {
        Vec::new()
    }

    fn next_chunk(&mut self) -> Option<DataChunk> {
        None
    }
}

/// A chunk iterator over an in-memory array, yielding grid blocks in C order.
#[derive(Debug)]
pub struct ArrayChunkIterator {
    data: ElementData,
    data_type: DataType,
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    remaining: std::vec::IntoIter<Vec<u64>>,
}

impl ArrayChunkIterator {
    /// Create an iterator over `data` with the given shapes.
    ///
    /// # Panics
    /// Panics if the shapes are inconsistent with the data length.
    #[must_use]
    pub fn new(
        data: ElementData,
        data_type: DataType,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
    ) -> Self {
        assert_eq!(data.len() as u64, element_count(&shape));
        let grid = chunk_grid_shape(&shape, &chunk_shape);
        Self {
            data,
            data_type,
            shape,
            chunk_shape,
            remaining: grid_indices(&grid).into_iter(),
        }
    }
}

impl DataChunkIterator for ArrayChunkIterator {
    fn data_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn shape(&self) -> Vec<Option<u64>> {
        self.shape.iter().copied().map(Some).collect()
    }

    fn chunk_shape(&self) -> Vec<u64> {
        self.chunk_shape.clone()
    }

    fn next_chunk(&mut self) -> Option<DataChunk> {
        let indices = self.remaining.next()?;
        let (data, extent) = gather_block(&self.data, &self.shape, &self.chunk_shape, &indices);
        Some(DataChunk {
            indices,
            extent,
            data,
        })
    }
}

impl ParallelDataChunkIterator for ArrayChunkIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_math() {
        assert_eq!(chunk_grid_shape(&[10, 10], &[3, 5]), vec![4, 2]);
        assert_eq!(chunk_grid_shape(&[0, 10], &[3, 5]), vec![0, 2]);
        assert_eq!(grid_indices(&[2, 2]).len(), 4);
        assert_eq!(grid_indices(&[0, 2]).len(), 0);
        assert_eq!(
            grid_indices(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(chunk_extent(&[10, 10], &[3, 5], &[3, 1]), vec![1, 5]);
    }

    #[test]
    fn gather_and_scatter_round_trip() {
        let data = ElementData::Int32((0..16).collect());
        let shape = [4, 4];
        let chunks = [3, 3];
        let mut rebuilt = ElementData::Int32(vec![0; 16]);
        for indices in grid_indices(&chunk_grid_shape(&shape, &chunks)) {
            let (block, extent) = gather_block(&data, &shape, &chunks, &indices);
            scatter_block(&mut rebuilt, &block, &shape, &chunks, &indices, &extent);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn gather_edge_block() {
        let data = ElementData::Int32((0..16).collect());
        // Bottom-right 1x1 edge chunk of a 4x4 array with 3x3 chunks.
        let (block, extent) = gather_block(&data, &[4, 4], &[3, 3], &[1, 1]);
        assert_eq!(extent, vec![1, 1]);
        assert_eq!(block, ElementData::Int32(vec![15]));
    }

    #[test]
    fn fill_map_marks_padding() {
        let map = chunk_fill_map(&[2, 2], &[2, 1]);
        assert_eq!(map, vec![Some(0), None, Some(1), None]);
    }

    #[test]
    fn array_chunk_iterator_covers_grid() {
        let mut iter = ArrayChunkIterator::new(
            ElementData::Int32((0..16).collect()),
            DataType::Int32,
            vec![4, 4],
            vec![2, 2],
        );
        let mut count = 0;
        while let Some(chunk) = iter.next_chunk() {
            assert_eq!(chunk.extent, vec![2, 2]);
            assert_eq!(chunk.data.len(), 4);
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
