//! Bootstrap receiver
//!
//! The joiner-side counterpart of the bootstrap host: requests content,
//! collects chunk frames, verifies count and hash, decompresses, and hands
//! off ready bytes. Its phases map one-to-one onto the join page's
//! connecting/downloading/verifying/error states.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use scorelink_core::batch;
use scorelink_core::chunk::{self, ChunkAssembler};
use scorelink_core::compress::{self, Compression};
use scorelink_core::errors::{CodecError, ScorelinkError, TransferError};
use scorelink_core::protocol::{
    decode_control, ContentType, ControlMessage, ErrorCode, PROTOCOL_VERSION,
};
use scorelink_core::types::{DocumentId, TransferId};

use crate::channel::{send_control, ChannelEvent, DataChannel};

// ----------------------------------------------------------------------------
// Receive Phase
// ----------------------------------------------------------------------------

/// Observable progress of the joiner's current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivePhase {
    Connecting,
    Downloading { received: u32, total: u32 },
    Verifying,
    Complete,
    Failed(ErrorCode),
}

// ----------------------------------------------------------------------------
// Bootstrap Receiver
// ----------------------------------------------------------------------------

struct IncomingTransfer {
    transfer_id: TransferId,
    content_type: ContentType,
    assembler: ChunkAssembler,
    hash: String,
    compression: Compression,
}

/// Drives one data channel through bootstrap and document requests.
pub struct BootstrapReceiver {
    channel: Arc<dyn DataChannel>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    phase: ReceivePhase,
}

impl BootstrapReceiver {
    pub fn new(channel: Arc<dyn DataChannel>) -> Result<Self, TransferError> {
        let events = channel.take_events().ok_or(TransferError::ChannelClosed)?;
        Ok(Self {
            channel,
            events,
            phase: ReceivePhase::Connecting,
        })
    }

    pub fn phase(&self) -> &ReceivePhase {
        &self.phase
    }

    /// Request the app bundle and return its verified, decompressed bytes.
    pub async fn request_app_bundle(&mut self) -> Result<Vec<u8>, ScorelinkError> {
        self.send(&ControlMessage::RequestBootstrap {
            version: PROTOCOL_VERSION,
        })
        .await?;
        self.receive_transfer(ContentType::AppBundle).await
    }

    /// Request documents (all session documents when `ids` is `None`) and
    /// return the decoded batch. An empty result is a normal completion.
    pub async fn request_documents(
        &mut self,
        ids: Option<Vec<DocumentId>>,
    ) -> Result<Vec<(DocumentId, Vec<u8>)>, ScorelinkError> {
        self.send(&ControlMessage::RequestDocuments { document_ids: ids })
            .await?;
        let bytes = self.receive_transfer(ContentType::DocumentData).await?;
        Ok(batch::decode(&bytes)?)
    }

    async fn send(&self, message: &ControlMessage) -> Result<(), ScorelinkError> {
        send_control(self.channel.as_ref(), message)
            .await
            .map_err(|e| ScorelinkError::Transfer(e.into()))
    }

    /// Drive channel events until one transfer completes and verifies.
    async fn receive_transfer(
        &mut self,
        expected: ContentType,
    ) -> Result<Vec<u8>, ScorelinkError> {
        let mut incoming: Option<IncomingTransfer> = None;
        while let Some(event) = self.events.recv().await {
            match event {
                ChannelEvent::Text(text) => {
                    let message = decode_control(&text).map_err(ScorelinkError::Codec)?;
                    if let Some(bytes) = self.on_control(&mut incoming, expected, message)? {
                        return Ok(bytes);
                    }
                }
                ChannelEvent::Binary(bytes) => match incoming.as_mut() {
                    Some(transfer) => {
                        transfer.assembler.push(bytes);
                        self.phase = ReceivePhase::Downloading {
                            received: transfer.assembler.received_count(),
                            total: transfer.assembler.expected(),
                        };
                    }
                    None => warn!("chunk frame with no announced transfer ignored"),
                },
                ChannelEvent::BufferedAmountLow => {}
                ChannelEvent::Closed | ChannelEvent::Error(_) => {
                    self.phase = ReceivePhase::Failed(ErrorCode::TransferFailed);
                    return Err(TransferError::ChannelClosed.into());
                }
            }
        }
        self.phase = ReceivePhase::Failed(ErrorCode::TransferFailed);
        Err(TransferError::ChannelClosed.into())
    }

    /// Handle one control frame; returns verified bytes once the transfer
    /// ends cleanly.
    fn on_control(
        &mut self,
        incoming: &mut Option<IncomingTransfer>,
        expected: ContentType,
        message: ControlMessage,
    ) -> Result<Option<Vec<u8>>, ScorelinkError> {
        match message {
            ControlMessage::TransferStart {
                transfer_id,
                content_type,
                total_size,
                total_chunks,
                hash,
                compression,
            } => {
                if incoming.is_some() {
                    return Err(TransferError::UnexpectedMessage {
                        state: "receiving a transfer",
                        message_type: "transfer-start",
                    }
                    .into());
                }
                *incoming = Some(IncomingTransfer {
                    transfer_id,
                    content_type,
                    assembler: ChunkAssembler::new(total_chunks, total_size),
                    hash,
                    compression,
                });
                self.phase = ReceivePhase::Downloading {
                    received: 0,
                    total: total_chunks,
                };
                Ok(None)
            }
            // Informational only; correctness never depends on it.
            ControlMessage::TransferProgress { .. } => Ok(None),
            ControlMessage::TransferEnd {
                transfer_id,
                success,
            } => {
                let transfer = incoming.take().ok_or(TransferError::UnknownTransfer {
                    transfer_id,
                })?;
                if transfer.transfer_id != transfer_id {
                    return Err(TransferError::UnknownTransfer { transfer_id }.into());
                }
                if !success {
                    self.phase = ReceivePhase::Failed(ErrorCode::TransferFailed);
                    return Err(TransferError::PeerError {
                        code: ErrorCode::TransferFailed,
                        message: "host marked the transfer unsuccessful".into(),
                    }
                    .into());
                }
                if transfer.content_type != expected {
                    self.phase = ReceivePhase::Failed(ErrorCode::TransferFailed);
                    return Err(TransferError::UnexpectedMessage {
                        state: "awaiting requested content",
                        message_type: "transfer-end",
                    }
                    .into());
                }
                self.phase = ReceivePhase::Verifying;
                let assembled = transfer.assembler.into_bytes().map_err(|e| {
                    self.phase = ReceivePhase::Failed(ErrorCode::TransferFailed);
                    ScorelinkError::Transfer(e)
                })?;
                // Unsupported compression is recoverable and distinct from a
                // hash mismatch.
                let raw = compress::decompress(&assembled, transfer.compression)
                    .map_err(ScorelinkError::Codec)?;
                if !chunk::verify_hash(&raw, &transfer.hash) {
                    self.phase = ReceivePhase::Failed(ErrorCode::HashMismatch);
                    return Err(CodecError::HashMismatch {
                        expected: transfer.hash,
                        actual: chunk::compute_hash(&raw),
                    }
                    .into());
                }
                self.phase = ReceivePhase::Complete;
                debug!(transfer = %transfer_id, bytes = raw.len(), "transfer verified");
                Ok(Some(raw))
            }
            ControlMessage::Error {
                code,
                message,
                transfer_id,
            } => {
                warn!(%code, %message, ?transfer_id, "host reported error");
                self.phase = ReceivePhase::Failed(code);
                Err(TransferError::PeerError { code, message }.into())
            }
            // Joiner-bound channels never carry requests; tolerate them.
            other => {
                debug!(kind = other.kind(), "ignoring request frame on joiner side");
                Ok(None)
            }
        }
    }
}
