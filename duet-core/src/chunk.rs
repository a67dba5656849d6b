//! Chunking: walk an outgoing file in bounded pieces, in order.

use crate::wire::MAX_FRAME_LEN;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024; // 16 KiB

/// Default cap on a single outgoing file. Enforced before anything is sent.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100 MiB

/// Room left in a frame for the `FileChunk` fields around the byte array.
const CHUNK_ENVELOPE_OVERHEAD: u64 = 4 * 1024;

/// Largest chunk whose `FileChunk` envelope still fits in one frame. A byte takes at most
/// four characters (`255,`) in the JSON number array.
pub const MAX_CHUNK_SIZE: u64 = (MAX_FRAME_LEN as u64 - CHUNK_ENVELOPE_OVERHEAD) / 4;

/// Chunk size actually used: 0 means [`DEFAULT_CHUNK_SIZE`], anything above
/// [`MAX_CHUNK_SIZE`] is capped.
pub fn effective_chunk_size(chunk_size: u64) -> u64 {
    match chunk_size {
        0 => DEFAULT_CHUNK_SIZE,
        n => n.min(MAX_CHUNK_SIZE),
    }
}

/// Walks a fully loaded buffer one chunk at a time. Owns the bytes so a sender can
/// park it between scheduler turns.
#[derive(Debug)]
pub struct ChunkCursor {
    data: Vec<u8>,
    chunk_size: usize,
    offset: usize,
}

impl ChunkCursor {
    pub fn new(data: Vec<u8>, chunk_size: u64) -> Self {
        let chunk_size = usize::try_from(effective_chunk_size(chunk_size)).unwrap_or(usize::MAX);
        Self {
            data,
            chunk_size,
            offset: 0,
        }
    }

    /// Next chunk, or `None` once every byte has been handed out.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = self.offset.saturating_add(self.chunk_size).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Some(chunk)
    }

    /// Bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Give back the source bytes (e.g. to publish them as the sender-side artifact).
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::wire::{encode_frame, encode_message};

    fn chunk_lens(len: usize, chunk_size: u64) -> Vec<usize> {
        let mut cursor = ChunkCursor::new(vec![0u8; len], chunk_size);
        std::iter::from_fn(|| cursor.next_chunk().map(|c| c.len())).collect()
    }

    #[test]
    fn ten_thousand_bytes_in_4k_chunks() {
        assert_eq!(chunk_lens(10_000, 4_096), vec![4_096, 4_096, 1_808]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(chunk_lens(90, 30), vec![30, 30, 30]);
    }

    #[test]
    fn zero_chunk_size_uses_default() {
        assert_eq!(chunk_lens(DEFAULT_CHUNK_SIZE as usize * 2, 0).len(), 2);
    }

    #[test]
    fn oversized_chunk_size_is_capped() {
        assert_eq!(effective_chunk_size(5 * 1024 * 1024), MAX_CHUNK_SIZE);
        assert_eq!(effective_chunk_size(u64::MAX), MAX_CHUNK_SIZE);
        assert_eq!(effective_chunk_size(4_096), 4_096);
    }

    #[test]
    fn largest_chunk_still_fits_in_a_frame() {
        let msg = Message::FileChunk {
            file_id: crate::participant::generate_id(),
            chunk: vec![0xFF; MAX_CHUNK_SIZE as usize],
        };
        let text = encode_message(&msg).unwrap();
        assert!(text.len() <= MAX_FRAME_LEN as usize);
        assert!(encode_frame(&text).is_ok());
    }

    #[test]
    fn cursor_walks_in_order() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut cursor = ChunkCursor::new(data.clone(), 4_096);
        let first = cursor.next_chunk().unwrap();
        assert_eq!(first, data[..4_096]);
        assert_eq!(cursor.offset(), 4_096);
        while cursor.next_chunk().is_some() {}
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.offset(), 10_000);
        assert_eq!(cursor.into_inner(), data);
    }

    #[test]
    fn cursor_on_empty_file() {
        let mut cursor = ChunkCursor::new(Vec::new(), 4_096);
        assert!(cursor.is_exhausted());
        assert!(cursor.next_chunk().is_none());
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_chunks_reassemble_exactly(
                data in proptest::collection::vec(any::<u8>(), 0..5_000),
                chunk_size in 1u64..700,
            ) {
                let mut cursor = ChunkCursor::new(data.clone(), chunk_size);
                let mut joined = Vec::with_capacity(data.len());
                while let Some(chunk) = cursor.next_chunk() {
                    prop_assert!(!chunk.is_empty());
                    prop_assert!(chunk.len() as u64 <= chunk_size);
                    joined.extend_from_slice(&chunk);
                }
                prop_assert_eq!(joined, data);
            }

            #[test]
            fn prop_offsets_tile_the_file(total in 0usize..100_000, chunk_size in 1u64..10_000) {
                let mut cursor = ChunkCursor::new(vec![7u8; total], chunk_size);
                let mut count = 0u64;
                let mut expected_offset = 0u64;
                while let Some(chunk) = cursor.next_chunk() {
                    expected_offset += chunk.len() as u64;
                    prop_assert_eq!(cursor.offset(), expected_offset);
                    count += 1;
                }
                prop_assert_eq!(expected_offset, total as u64);
                prop_assert_eq!(count, (total as u64).div_ceil(chunk_size));
            }
        }
    }
}
