//! Chunking and reassembly for large binary payloads
//!
//! Splits arbitrary payloads into data-channel-sized frames and reassembles
//! them on the receiving end, with SHA-256 content digests over the full
//! payload for end-to-end integrity.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::errors::TransferError;

/// Fallback chunk size when a caller passes zero.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

// ----------------------------------------------------------------------------
// Splitting and Reassembly
// ----------------------------------------------------------------------------

/// Split `data` into consecutive slices of at most `chunk_size` bytes.
///
/// The last chunk may be shorter; no padding is added. Empty input yields
/// zero chunks.
pub fn chunk(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    data.chunks(size).map(|piece| piece.to_vec()).collect()
}

/// Concatenate chunks in order. The caller is responsible for ordering.
pub fn reassemble(chunks: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

// ----------------------------------------------------------------------------
// Content Hashing
// ----------------------------------------------------------------------------

/// SHA-256 digest of `data` as lowercase hex.
///
/// Computed over the uncompressed payload: before chunking on the sender,
/// after reassembly and decompression on the receiver.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify `data` against an expected hex digest (case-insensitive).
pub fn verify_hash(data: &[u8], expected_hex: &str) -> bool {
    compute_hash(data).eq_ignore_ascii_case(expected_hex)
}

// ----------------------------------------------------------------------------
// Chunk Assembler
// ----------------------------------------------------------------------------

/// Receiver-side reassembly state for one transfer.
///
/// The data channel is reliable and ordered, so `push` assigns incrementing
/// indexes; the sparse map keyed by index keeps reassembly robust if a caller
/// routes chunks explicitly via `insert`.
#[derive(Debug)]
pub struct ChunkAssembler {
    expected: u32,
    total_size: u64,
    cursor: u32,
    received: HashMap<u32, Vec<u8>>,
}

impl ChunkAssembler {
    pub fn new(expected: u32, total_size: u64) -> Self {
        Self {
            expected,
            total_size,
            cursor: 0,
            received: HashMap::new(),
        }
    }

    /// Record the next in-order chunk; returns the index it was assigned.
    pub fn push(&mut self, bytes: Vec<u8>) -> u32 {
        let index = self.cursor;
        self.cursor += 1;
        self.insert(index, bytes);
        index
    }

    /// Record a chunk at an explicit index. Duplicate indexes keep the first
    /// copy; returns false when the index was already present.
    pub fn insert(&mut self, index: u32, bytes: Vec<u8>) -> bool {
        if self.received.contains_key(&index) {
            return false;
        }
        self.received.insert(index, bytes);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.expected
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Concatenate all chunks in index order.
    ///
    /// Fails if any chunk is missing rather than producing a short buffer.
    pub fn into_bytes(self) -> Result<Vec<u8>, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::MissingChunks {
                expected: self.expected,
                received: self.received.len() as u32,
            });
        }
        let mut out = Vec::with_capacity(self.total_size as usize);
        for index in 0..self.expected {
            match self.received.get(&index) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => {
                    return Err(TransferError::MissingChunks {
                        expected: self.expected,
                        received: index,
                    })
                }
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
