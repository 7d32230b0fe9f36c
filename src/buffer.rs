//! Chunked inbound byte queue.
//!
//! Transport reads arrive as discrete chunks that rarely line up with frame
//! boundaries. [`ChunkQueue`] keeps the arrived-but-unparsed bytes as an
//! ordered list of owned chunks and lets the decoder copy arbitrary ranges
//! across chunk boundaries before committing to a destructive `advance`.
//!
//! Each connection owns exactly one queue; it is cleared on disconnect.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;

/// Error copying out of a [`ChunkQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Destination slice cannot hold the requested range.
    OutOfSpace {
        /// Bytes the copy would write.
        needed: usize,
        /// Bytes available past the destination offset.
        available: usize,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSpace { needed, available } => {
                write!(f, "destination too small: need {needed} bytes, have {available}")
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Ordered queue of owned byte chunks with cross-chunk random read access.
///
/// `len()` is always the sum of unread bytes across all retained chunks.
/// Reads are addressed in queue coordinates: offset 0 is the first unread
/// byte regardless of how many chunks ago it arrived.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Bytes>,
    /// Read offset into the first chunk (partial consumption).
    head: usize,
    /// Unread bytes across all chunks.
    len: usize,
}

impl ChunkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no unread bytes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a chunk, taking ownership. O(1); empty chunks are dropped.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Copies `[src_start, src_end)` into `dst` starting at `dst_offset`,
    /// traversing chunk boundaries. Does not consume queue bytes.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::OutOfSpace`] when the destination cannot hold
    /// the range.
    ///
    /// # Panics
    ///
    /// Panics if the source range is out of bounds or inverted.
    pub fn copy_into(
        &self,
        dst: &mut [u8],
        dst_offset: usize,
        src_start: usize,
        src_end: usize,
    ) -> Result<(), QueueError> {
        assert!(src_start <= src_end, "inverted source range");
        assert!(src_end <= self.len, "source range past end of queue");

        let needed = src_end - src_start;
        let available = dst.len().saturating_sub(dst_offset);
        if available < needed {
            return Err(QueueError::OutOfSpace { needed, available });
        }
        if needed == 0 {
            return Ok(());
        }

        // Walk chunks in queue coordinates, copying the overlap of each
        // chunk's unread span with the requested range.
        let mut pos = 0usize;
        let mut written = 0usize;
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let skip = if idx == 0 { self.head } else { 0 };
            let chunk_lo = pos;
            let chunk_hi = pos + (chunk.len() - skip);
            let lo = src_start.max(chunk_lo);
            let hi = src_end.min(chunk_hi);
            if lo < hi {
                let off = skip + (lo - chunk_lo);
                let n = hi - lo;
                dst[dst_offset + written..dst_offset + written + n]
                    .copy_from_slice(&chunk[off..off + n]);
                written += n;
            }
            if chunk_hi >= src_end {
                break;
            }
            pos = chunk_hi;
        }
        debug_assert_eq!(written, needed);
        Ok(())
    }

    /// Returns a contiguous copy of `[start, end)` without consuming.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or inverted.
    #[must_use]
    pub fn copy_range(&self, start: usize, end: usize) -> Bytes {
        let mut buf = BytesMut::zeroed(end - start);
        self.copy_into(&mut buf, 0, start, end)
            .expect("destination sized to range");
        buf.freeze()
    }

    /// Discards `n` bytes from the front, dropping fully consumed chunks
    /// and adjusting the head offset for partial consumption.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the unread length.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len, "advance past end of queue");
        let mut remaining = n;
        while remaining > 0 {
            let front_unread = self.chunks[0].len() - self.head;
            if remaining >= front_unread {
                self.chunks.pop_front();
                self.head = 0;
                remaining -= front_unread;
            } else {
                self.head += remaining;
                remaining = 0;
            }
        }
        self.len -= n;
    }

    /// Copies the first `n` bytes into a fresh buffer and consumes them.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the unread length.
    #[must_use]
    pub fn take(&mut self, n: usize) -> Bytes {
        let out = self.copy_range(0, n);
        self.advance(n);
        out
    }

    /// Drops all buffered bytes. Used on disconnect.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head = 0;
        self.len = 0;
    }

    /// Appends raw bytes, copying them into an owned chunk.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut chunk = BytesMut::with_capacity(data.len());
        chunk.put_slice(data);
        self.append(chunk.freeze());
    }
}
