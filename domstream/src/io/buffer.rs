//! Ordered chunk queue owned by one stream
//!
//! Provides FIFO append, head insertion and peek-style slicing.

use std::collections::VecDeque;

use crate::chunk::Chunk;
use crate::error::StreamError;

/// Ordered queue of pending chunks
///
/// There is no capacity limit: growth is controlled by the producer through
/// back-pressure, not by the buffer.
///
/// # Example
///
/// ```
/// use domstream::io::ChunkBuffer;
/// use domstream::Chunk;
///
/// let mut buffer = ChunkBuffer::new();
/// buffer.append("a".into()).unwrap();
/// buffer.prepend("b".into()).unwrap();
///
/// let all = buffer.drain_all();
/// assert_eq!(all, vec![Chunk::from("b"), Chunk::from("a")]);
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer(VecDeque<Chunk>);

impl ChunkBuffer {
    /// Create a new empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self(VecDeque::new())
    }

    /// Append a chunk at the tail, returning the new length
    ///
    /// The chunk is validated first; on error the buffer is untouched.
    pub fn append(&mut self, chunk: Chunk) -> Result<usize, StreamError> {
        if let Err(e) = chunk.validate() {
            log::warn!("buffer.append: rejected {} chunk", chunk.kind());
            return Err(e);
        }
        self.0.push_back(chunk);
        Ok(self.0.len())
    }

    /// Insert a chunk at the head, returning the new length
    pub fn prepend(&mut self, chunk: Chunk) -> Result<usize, StreamError> {
        if let Err(e) = chunk.validate() {
            log::warn!("buffer.prepend: rejected {} chunk", chunk.kind());
            return Err(e);
        }
        self.0.push_front(chunk);
        Ok(self.0.len())
    }

    /// Remove and return every chunk in order
    pub fn drain_all(&mut self) -> Vec<Chunk> {
        self.0.drain(..).collect()
    }

    /// Copy the chunks in `offset..end` without removing them.
    ///
    /// `end` is an index, not a count. Bounds are clamped to the buffer, and
    /// an offset past `end` yields an empty slice.
    #[must_use]
    pub fn take(&self, end: usize, offset: usize) -> Vec<Chunk> {
        let end = end.min(self.0.len());
        if offset >= end {
            return Vec::new();
        }
        self.0.range(offset..end).cloned().collect()
    }

    /// Copy of the whole buffer
    #[must_use]
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.0.iter().cloned().collect()
    }

    /// Remove the head chunk
    pub fn pop_front(&mut self) -> Option<Chunk> {
        self.0.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
