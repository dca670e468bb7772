//! Compression algorithms for transfer payloads
//!
//! Algorithms are capability-checked variants: a runtime that cannot handle
//! one reports it as unsupported, which callers must treat as a distinct
//! recoverable failure rather than a hash mismatch.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

// ----------------------------------------------------------------------------
// Compression Algorithm
// ----------------------------------------------------------------------------

/// Compression algorithm advertised in a transfer-start message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Brotli,
    Gzip,
    None,
}

impl Compression {
    /// Whether this runtime can compress/decompress the algorithm.
    /// Brotli appears on the wire for interop but is not handled here.
    pub fn is_supported(&self) -> bool {
        matches!(self, Compression::Gzip | Compression::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::Brotli => "brotli",
            Compression::Gzip => "gzip",
            Compression::None => "none",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Compress / Decompress
// ----------------------------------------------------------------------------

pub fn compress(data: &[u8], algorithm: Compression) -> Result<Vec<u8>, CodecError> {
    match algorithm {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Brotli => Err(CodecError::UnsupportedCompression(algorithm)),
    }
}

pub fn decompress(data: &[u8], algorithm: Compression) -> Result<Vec<u8>, CodecError> {
    match algorithm {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Brotli => Err(CodecError::UnsupportedCompression(algorithm)),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let data = b"do re mi fa sol la ti do".repeat(100);
        let compressed = compress(&data, Compression::Gzip).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, Compression::Gzip).unwrap(), data);
    }

    #[test]
    fn test_none_is_passthrough() {
        let data = vec![1u8, 2, 3];
        assert_eq!(compress(&data, Compression::None).unwrap(), data);
        assert_eq!(decompress(&data, Compression::None).unwrap(), data);
    }

    #[test]
    fn test_brotli_is_a_distinct_recoverable_error() {
        let err = decompress(b"anything", Compression::Brotli).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnsupportedCompression(Compression::Brotli)
        ));
        assert!(!Compression::Brotli.is_supported());
        assert!(Compression::Gzip.is_supported());
        assert!(Compression::None.is_supported());
    }

    #[test]
    fn test_corrupt_gzip_stream_fails() {
        assert!(decompress(&[0xde, 0xad, 0xbe, 0xef], Compression::Gzip).is_err());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Compression::Gzip).unwrap(), "\"gzip\"");
        assert_eq!(serde_json::to_string(&Compression::None).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::from_str::<Compression>("\"brotli\"").unwrap(),
            Compression::Brotli
        );
    }
}
