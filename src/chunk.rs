//! Partition of the reconstruction axis into chunks
//!
//! A chunk is a range `[start, end)` of slice indices. The chunks of a
//! [ChunkPlan] cover `[0, len)` in ascending order without gap or overlap,
//! every chunk holds `chunk_size` slices except the last one which may be
//! shorter.

use crate::error::{Error, Result};
use std::{fmt, ops::Range};

const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    len: usize,
    chunk_size: usize,
}
impl ChunkPlan {
    /// Splits `len` slices into chunks of `chunk_size` slices
    pub fn new(len: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::invalid("the chunk size must be positive"));
        }
        Ok(Self { len, chunk_size })
    }
    /// Largest chunks of a `(n_projection, n_slice, width)` stack whose
    /// reconstruction working set fits into `budget` bytes
    pub fn for_memory_budget(shape: [usize; 3], budget: usize) -> Result<Self> {
        let [_, len, _] = shape;
        let per_slice = Self::slice_bytes(shape);
        match budget / per_slice.max(1) {
            0 => Err(Error::invalid(format!(
                "a memory budget of {budget} bytes cannot hold a single slice ({per_slice} bytes)"
            ))),
            n => Self::new(len, n.min(len.max(1))),
        }
    }
    /// Bytes of the projection sub-stack and of the reconstructed slices for
    /// a single slice of a `(n_projection, n_slice, width)` stack
    fn slice_bytes(shape: [usize; 3]) -> usize {
        let [n_projection, len, width] = shape;
        F32_BYTES * width * (n_projection + len)
    }
    /// Working set of the largest chunk in bytes
    pub fn chunk_bytes(&self, shape: [usize; 3]) -> usize {
        Self::slice_bytes(shape) * self.chunk_size.min(self.len)
    }
    /// Length of the partitioned axis
    pub fn axis_len(&self) -> usize {
        self.len
    }
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
    /// Number of chunks
    pub fn n_chunk(&self) -> usize {
        self.len.div_ceil(self.chunk_size)
    }
    /// Range of chunk #`k`
    pub fn range(&self, k: usize) -> Option<Range<usize>> {
        let start = k.checked_mul(self.chunk_size)?;
        if start >= self.len {
            None
        } else {
            Some(start..(start + self.chunk_size).min(self.len))
        }
    }
    /// Iterator over the chunk ranges in ascending order
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.n_chunk()).filter_map(move |k| self.range(k))
    }
    /// Index of the chunk holding slice `index` and the slice offset within it
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index < self.len {
            Some((index / self.chunk_size, index % self.chunk_size))
        } else {
            None
        }
    }
}
impl fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slices in {} chunks of {}",
            self.len,
            self.n_chunk(),
            self.chunk_size
        )
    }
}

/// Chunk ranges of `len` slices with at most `chunk_size` slices per chunk
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Result<Vec<Range<usize>>> {
    Ok(ChunkPlan::new(len, chunk_size)?.ranges().collect())
}
