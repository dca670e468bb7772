//! Transfer protocol contract shared by host and joiner
//!
//! Control messages are JSON text frames over a single reliable, ordered
//! data channel. Binary frames are raw chunk payloads with no envelope; the
//! channel's text/binary framing is the only discriminator. Field names are
//! camelCase so a joining page written in any language decodes them directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compress::Compression;
use crate::errors::CodecError;
use crate::types::{DocumentId, TransferId};

/// Version of the bootstrap protocol spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

// ----------------------------------------------------------------------------
// Content Type
// ----------------------------------------------------------------------------

/// What a chunked transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    AppBundle,
    DocumentData,
}

// ----------------------------------------------------------------------------
// Error Codes
// ----------------------------------------------------------------------------

/// Wire-level error taxonomy carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BundleNotAvailable,
    TransferFailed,
    HashMismatch,
    VersionMismatch,
    SessionExpired,
    BackpressureStall,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::BundleNotAvailable => "BUNDLE_NOT_AVAILABLE",
            ErrorCode::TransferFailed => "TRANSFER_FAILED",
            ErrorCode::HashMismatch => "HASH_MISMATCH",
            ErrorCode::VersionMismatch => "VERSION_MISMATCH",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::BackpressureStall => "BACKPRESSURE_STALL",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Control Messages
// ----------------------------------------------------------------------------

/// Closed set of control messages exchanged over the bootstrap channel.
///
/// Unknown `type` tags are decode errors; they are never ignored silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Joiner asks the host to begin sending the app bundle.
    #[serde(rename_all = "camelCase")]
    RequestBootstrap { version: u32 },

    /// Joiner asks for documents; absent id list means all session documents.
    #[serde(rename_all = "camelCase")]
    RequestDocuments {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_ids: Option<Vec<DocumentId>>,
    },

    /// Host announces an incoming chunked payload. Chunks follow immediately,
    /// in order, as raw binary frames.
    #[serde(rename_all = "camelCase")]
    TransferStart {
        transfer_id: TransferId,
        content_type: ContentType,
        total_size: u64,
        total_chunks: u32,
        hash: String,
        compression: Compression,
    },

    /// Informational progress ping. Receivers must accept and ignore it;
    /// senders may omit it without breaking interop.
    #[serde(rename_all = "camelCase")]
    TransferProgress {
        transfer_id: TransferId,
        chunk_index: u32,
        total_chunks: u32,
    },

    /// Logical end of a transfer; the receiver then verifies count and hash.
    #[serde(rename_all = "camelCase")]
    TransferEnd { transfer_id: TransferId, success: bool },

    /// Fatal or informational failure notice, from either side.
    #[serde(rename_all = "camelCase")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<TransferId>,
    },
}

impl ControlMessage {
    /// Message kind for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::RequestBootstrap { .. } => "request-bootstrap",
            ControlMessage::RequestDocuments { .. } => "request-documents",
            ControlMessage::TransferStart { .. } => "transfer-start",
            ControlMessage::TransferProgress { .. } => "transfer-progress",
            ControlMessage::TransferEnd { .. } => "transfer-end",
            ControlMessage::Error { .. } => "error",
        }
    }
}

/// Encode a control message as a JSON text frame.
pub fn encode_control(message: &ControlMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a JSON text frame; unknown `type` values are rejected.
pub fn decode_control(text: &str) -> Result<ControlMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_round_trip() {
        let messages = vec![
            ControlMessage::RequestBootstrap {
                version: PROTOCOL_VERSION,
            },
            ControlMessage::RequestDocuments { document_ids: None },
            ControlMessage::RequestDocuments {
                document_ids: Some(vec![DocumentId::from("song-1")]),
            },
            ControlMessage::TransferStart {
                transfer_id: TransferId::random(),
                content_type: ContentType::AppBundle,
                total_size: 1024,
                total_chunks: 4,
                hash: "abc123".into(),
                compression: Compression::Gzip,
            },
            ControlMessage::TransferProgress {
                transfer_id: TransferId::random(),
                chunk_index: 2,
                total_chunks: 4,
            },
            ControlMessage::TransferEnd {
                transfer_id: TransferId::random(),
                success: true,
            },
            ControlMessage::Error {
                code: ErrorCode::HashMismatch,
                message: "digest differs".into(),
                transfer_id: None,
            },
        ];
        for message in messages {
            let encoded = encode_control(&message).unwrap();
            assert_eq!(decode_control(&encoded).unwrap(), message);
        }
    }

    #[test]
    fn test_wire_shape_is_tagged_camel_case() {
        let encoded = encode_control(&ControlMessage::TransferEnd {
            transfer_id: TransferId::random(),
            success: false,
        })
        .unwrap();
        assert!(encoded.contains("\"type\":\"transfer-end\""));
        assert!(encoded.contains("\"transferId\""));
        assert!(encoded.contains("\"success\":false"));
    }

    #[test]
    fn test_absent_optionals_are_omitted_not_null() {
        let encoded = encode_control(&ControlMessage::RequestDocuments { document_ids: None }).unwrap();
        assert_eq!(encoded, "{\"type\":\"request-documents\"}");

        let encoded = encode_control(&ControlMessage::Error {
            code: ErrorCode::Unknown,
            message: "m".into(),
            transfer_id: None,
        })
        .unwrap();
        assert!(!encoded.contains("transferId"));
        assert!(!encoded.contains("null"));
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(decode_control("{\"type\":\"request-karaoke\"}").is_err());
        assert!(decode_control("not json at all").is_err());
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::BundleNotAvailable).unwrap(),
            "\"BUNDLE_NOT_AVAILABLE\""
        );
        assert_eq!(
            serde_json::from_str::<ErrorCode>("\"BACKPRESSURE_STALL\"").unwrap(),
            ErrorCode::BackpressureStall
        );
    }
}
