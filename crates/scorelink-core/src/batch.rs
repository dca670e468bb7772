//! Document batch binary codec
//!
//! Serializes an ordered collection of opaque document snapshots into one
//! blob for transfer. The layout is a durable wire format:
//!
//! `[count:u32][ per entry: idLen:u32, idBytes(UTF-8), stateLen:u32, stateBytes ]`
//!
//! with all integers little-endian fixed-width. Entry order is the input
//! order, and decode preserves it exactly. Document states are opaque
//! externally-produced snapshots; this codec never interprets them.

use crate::errors::CodecError;
use crate::types::DocumentId;

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode documents in input order.
pub fn encode(documents: &[(DocumentId, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimate_encoded_size(documents) as usize);
    out.extend_from_slice(&(documents.len() as u32).to_le_bytes());
    for (id, state) in documents {
        let id_bytes = id.as_str().as_bytes();
        out.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(id_bytes);
        out.extend_from_slice(&(state.len() as u32).to_le_bytes());
        out.extend_from_slice(state);
    }
    out
}

/// Exact byte count `encode` would produce, without allocating the output.
pub fn estimate_encoded_size(documents: &[(DocumentId, Vec<u8>)]) -> u64 {
    let mut total = 4u64;
    for (id, state) in documents {
        total += 8 + id.as_str().len() as u64 + state.len() as u64;
    }
    total
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Strict inverse of `encode`. Truncated input is a decode error, never an
/// out-of-bounds read or a silently short result.
pub fn decode(bytes: &[u8]) -> Result<Vec<(DocumentId, Vec<u8>)>, CodecError> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u32("document count")?;
    let mut documents = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let id_len = reader.read_u32("id length")? as usize;
        let id = String::from_utf8(reader.read_bytes(id_len, "id bytes")?.to_vec())?;
        let state_len = reader.read_u32("state length")? as usize;
        let state = reader.read_bytes(state_len, "state bytes")?.to_vec();
        documents.push((DocumentId::new(id), state));
    }
    reader.finish()?;
    Ok(documents)
}

/// Partial decode that reads only the id fields, skipping state bytes.
pub fn extract_ids(bytes: &[u8]) -> Result<Vec<DocumentId>, CodecError> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u32("document count")?;
    let mut ids = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let id_len = reader.read_u32("id length")? as usize;
        let id = String::from_utf8(reader.read_bytes(id_len, "id bytes")?.to_vec())?;
        let state_len = reader.read_u32("state length")? as usize;
        reader.skip(state_len, "state bytes")?;
        ids.push(DocumentId::new(id));
    }
    reader.finish()?;
    Ok(ids)
}

// ----------------------------------------------------------------------------
// Bounds-checked Reader
// ----------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, CodecError> {
        let raw = self.read_bytes(4, context)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                context,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize, context: &'static str) -> Result<(), CodecError> {
        self.read_bytes(len, context).map(|_| ())
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.remaining() > 0 {
            return Err(CodecError::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
