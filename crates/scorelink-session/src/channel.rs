//! Data-channel abstraction
//!
//! The bootstrap protocol runs over one reliable, ordered, message-size-
//! bounded data channel per peer. The concrete channel (a WebRTC data
//! channel, a GATT link, an in-memory pair) lives behind this trait; the
//! host and receiver only see labels, frames, buffered amount, and events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use scorelink_core::errors::TransferError;
use scorelink_core::protocol::{encode_control, ControlMessage};

/// Label of the data channel dedicated to bootstrap transfers. Channels with
/// any other label are not ours; the transport may multiplex several
/// purposes over one peer connection.
pub const BOOTSTRAP_CHANNEL_LABEL: &str = "scorelink-bootstrap";

// ----------------------------------------------------------------------------
// Channel Events
// ----------------------------------------------------------------------------

/// Events surfaced by a data channel to its owning side.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A JSON control frame arrived.
    Text(String),
    /// A raw chunk frame arrived.
    Binary(Vec<u8>),
    /// The outbound buffered amount dropped below the low-water mark.
    BufferedAmountLow,
    /// The channel closed.
    Closed,
    /// The channel failed.
    Error(String),
}

// ----------------------------------------------------------------------------
// Channel Errors
// ----------------------------------------------------------------------------

/// Errors from sending over a data channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("data channel closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl From<ChannelError> for TransferError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Closed => TransferError::ChannelClosed,
            ChannelError::SendFailed(reason) => TransferError::SendFailed { reason },
        }
    }
}

// ----------------------------------------------------------------------------
// Data Channel Trait
// ----------------------------------------------------------------------------

/// A reliable, ordered, bounded-message-size channel to one peer.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Send a JSON control frame.
    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    /// Send one raw chunk frame.
    async fn send_binary(&self, data: &[u8]) -> Result<(), ChannelError>;

    /// Bytes currently queued in the transport's outbound buffer.
    fn buffered_amount(&self) -> usize;

    /// Take the channel's event stream. Yields `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;

    async fn close(&self);
}

/// Encode and send one control message.
pub async fn send_control(
    channel: &dyn DataChannel,
    message: &ControlMessage,
) -> Result<(), ChannelError> {
    let text = encode_control(message)
        .map_err(|e| ChannelError::SendFailed(format!("encode {}: {e}", message.kind())))?;
    channel.send_text(&text).await
}
