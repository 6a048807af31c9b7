//! Incremental (INCR) transfer bookkeeping.
//!
//! The sending side walks a payload with an [`IncrCursor`]: every time the
//! requestor deletes the destination property, the cursor yields the next
//! span (at most `max` bytes). Once the data is exhausted one more, empty,
//! span is yielded to signal completion, after which the cursor is done.
//!
//! The receiving side collects spans in a [`ChunkAssembler`], which keeps its
//! buffer NUL-terminated after every append.

use std::ops::Range;

/// Position of a sub-conversion within an incremental send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrOffset {
    /// Next chunk starts at this byte offset
    At(usize),
    /// All data sent; the zero-length terminator is still owed
    FinalEmpty,
    /// Terminator sent; never revisited
    Done,
}

/// Walks a payload in bounded chunks.
#[derive(Debug, Clone)]
pub struct IncrCursor {
    len: usize,
    offset: IncrOffset,
}

impl IncrCursor {
    /// Cursor over a payload of `len` bytes, positioned at the start.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            offset: IncrOffset::At(0),
        }
    }

    /// Current position
    pub fn offset(&self) -> IncrOffset {
        self.offset
    }

    /// True once the terminator has been handed out
    pub fn is_done(&self) -> bool {
        self.offset == IncrOffset::Done
    }

    /// Next span to write: a non-empty range while data remains, then one
    /// empty range, then `None`.
    pub fn next_chunk(&mut self, max: usize) -> Option<Range<usize>> {
        match self.offset {
            IncrOffset::At(start) => {
                let remaining = self.len.saturating_sub(start);
                if remaining > max {
                    self.offset = IncrOffset::At(start + max);
                    Some(start..start + max)
                } else {
                    self.offset = IncrOffset::FinalEmpty;
                    Some(start..self.len)
                }
            }
            IncrOffset::FinalEmpty => {
                self.offset = IncrOffset::Done;
                Some(self.len..self.len)
            }
            IncrOffset::Done => None,
        }
    }
}

/// Accumulates received chunks into one NUL-terminated buffer.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    buffer: Vec<u8>,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAssembler {
    /// Empty assembler; the buffer holds only the terminator.
    pub fn new() -> Self {
        Self { buffer: vec![0] }
    }

    /// Append `chunk` and re-terminate.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.pop();
        self.buffer.extend_from_slice(chunk);
        self.buffer.push(0);
    }

    /// Logical length (terminator excluded)
    pub fn len(&self) -> usize {
        self.buffer.len() - 1
    }

    /// True when nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accumulated bytes (terminator excluded)
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len()]
    }

    /// Accumulated bytes followed by the terminator
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the accumulated bytes, dropping the terminator.
    pub fn finish(mut self) -> Vec<u8> {
        self.buffer.pop();
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_megabyte_in_quarter_megabyte_chunks() {
        let len = 1024 * 1024;
        let max = 256 * 1024;
        let mut cursor = IncrCursor::new(len);

        let mut chunks = Vec::new();
        while let Some(range) = cursor.next_chunk(max) {
            chunks.push(range);
        }

        assert_eq!(chunks.len(), 5);
        assert!(chunks[..4].iter().all(|r| r.len() == max));
        assert!(chunks[4].is_empty());
        assert!(cursor.is_done());
        assert_eq!(cursor.next_chunk(max), None);
    }

    #[test]
    fn test_offset_progression() {
        let mut cursor = IncrCursor::new(10);
        assert_eq!(cursor.offset(), IncrOffset::At(0));
        assert_eq!(cursor.next_chunk(4), Some(0..4));
        assert_eq!(cursor.offset(), IncrOffset::At(4));
        assert_eq!(cursor.next_chunk(4), Some(4..8));
        assert_eq!(cursor.next_chunk(4), Some(8..10));
        assert_eq!(cursor.offset(), IncrOffset::FinalEmpty);
        assert_eq!(cursor.next_chunk(4), Some(10..10));
        assert_eq!(cursor.offset(), IncrOffset::Done);
    }

    #[test]
    fn test_assembler_nul_termination() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.as_bytes_with_nul(), &[0]);
        assembler.append(b"hel");
        assert_eq!(assembler.as_bytes_with_nul(), b"hel\0");
        assembler.append(b"lo");
        assert_eq!(assembler.data(), b"hello");
        assert_eq!(assembler.as_bytes_with_nul(), b"hello\0");
        assert_eq!(assembler.finish(), b"hello");
    }

    proptest! {
        #[test]
        fn test_incr_roundtrip(payload in proptest::collection::vec(any::<u8>(), 1..4096), max in 1usize..512) {
            let mut cursor = IncrCursor::new(payload.len());
            let mut assembler = ChunkAssembler::new();
            let mut last = None;
            while let Some(range) = cursor.next_chunk(max) {
                prop_assert!(range.len() <= max);
                assembler.append(&payload[range.clone()]);
                prop_assert_eq!(assembler.as_bytes_with_nul().last(), Some(&0));
                last = Some(range);
            }
            prop_assert!(last.is_some_and(|r| r.is_empty()));
            prop_assert_eq!(assembler.finish(), payload);
        }
    }
}
