//! Error types for the scorelink bootstrap protocol
//!
//! This module contains all error types used throughout the protocol crates:
//! codec errors, transfer errors, signaling errors, session errors, and the
//! main ScorelinkError type that unifies them all.

use crate::compress::Compression;
use crate::protocol::ErrorCode;
use crate::types::{PeerId, Timestamp, TransferId, TransportType};

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

/// Errors from the pure data transformations: chunking, batch encoding,
/// compression, and payload encoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated input while reading {context}: need {needed} bytes, {remaining} remain")]
    Truncated {
        context: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{0} trailing bytes after the final record")]
    TrailingBytes(usize),

    #[error("document id is not valid UTF-8")]
    InvalidDocumentId(#[from] std::string::FromUtf8Error),

    #[error("compression algorithm not supported in this runtime: {0}")]
    UnsupportedCompression(Compression),

    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("compression stream error: {0}")]
    CompressionIo(#[from] std::io::Error),

    #[error("unknown transport type tag: {0}")]
    UnknownTransport(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ----------------------------------------------------------------------------
// Transfer Errors
// ----------------------------------------------------------------------------

/// Errors raised while serving or receiving a chunked transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no app bundle is available")]
    BundleNotAvailable,

    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    #[error("data channel closed")]
    ChannelClosed,

    #[error("missing chunks: received {received} of {expected}")]
    MissingChunks { expected: u32, received: u32 },

    #[error("unexpected {message_type} message while {state}")]
    UnexpectedMessage {
        state: &'static str,
        message_type: &'static str,
    },

    #[error("transfer-end for unknown transfer {transfer_id}")]
    UnknownTransfer { transfer_id: TransferId },

    #[error("peer reported {code}: {message}")]
    PeerError { code: ErrorCode, message: String },
}

impl TransferError {
    /// Wire error code that describes this failure to the remote side.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::BundleNotAvailable => ErrorCode::BundleNotAvailable,
            TransferError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            TransferError::PeerError { code, .. } => *code,
            TransferError::MissingChunks { .. } => ErrorCode::HashMismatch,
            _ => ErrorCode::TransferFailed,
        }
    }
}

// ----------------------------------------------------------------------------
// Signaling Errors
// ----------------------------------------------------------------------------

/// Errors from the relay connection and offer/answer exchange.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),

    #[error("relay connection lost after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("signaling message from unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer endpoint error: {0}")]
    Endpoint(String),

    #[error("signaling bridge destroyed")]
    Destroyed,
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Errors from session lifecycle management and the live-sync layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session expired at {}", .expired_at.as_millis())]
    Expired { expired_at: Timestamp },

    #[error("transport not available on this platform: {transport}")]
    TransportUnavailable { transport: TransportType },

    #[error("session payload too large for a QR code: {bytes} bytes (limit {limit})")]
    PayloadTooLarge { bytes: usize, limit: usize },

    #[error("avatar exceeds {limit} bytes")]
    AvatarTooLarge { limit: usize },

    #[error("no active session")]
    NoActiveSession,

    #[error("live sync error: {0}")]
    LiveSync(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Top-level error for the scorelink protocol crates.
#[derive(Debug, thiserror::Error)]
pub enum ScorelinkError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub type Result<T> = core::result::Result<T, ScorelinkError>;
