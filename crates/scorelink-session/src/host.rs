//! Bootstrap host
//!
//! Owns zero-or-one app bundle and a live, mutable set of documents, and
//! serves both to joining peers as chunked, flow-controlled transfers.
//! Each peer gets its own task and an `idle → sending → idle` state machine
//! with a FIFO request queue, so starting the next transfer and resuming a
//! paused one can never interleave two transfers' chunks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scorelink_core::batch;
use scorelink_core::chunk;
use scorelink_core::compress::{self, Compression};
use scorelink_core::config::TransferConfig;
use scorelink_core::errors::CodecError;
use scorelink_core::payload::BootstrapInfo;
use scorelink_core::protocol::{
    decode_control, ControlMessage, ContentType, ErrorCode, PROTOCOL_VERSION,
};
use scorelink_core::types::{DocumentId, PeerId, TransferId};

use crate::channel::{send_control, ChannelEvent, DataChannel, BOOTSTRAP_CHANNEL_LABEL};

// ----------------------------------------------------------------------------
// Stored Content
// ----------------------------------------------------------------------------

struct StoredBundle {
    /// Bytes as they go over the wire (post-compression).
    bytes: Vec<u8>,
    /// SHA-256 of the uncompressed bundle.
    hash: String,
    compression: Compression,
}

// ----------------------------------------------------------------------------
// Per-Peer Transfer State
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum ContentRequest {
    Bootstrap,
    Documents { ids: Option<Vec<DocumentId>> },
}

struct ActiveTransfer {
    transfer_id: TransferId,
    chunks: Vec<Vec<u8>>,
    cursor: usize,
}

/// Peer state machine: idle (no active transfer) or sending one, plus the
/// queue of requests that arrived mid-transfer.
struct PeerState {
    queue: VecDeque<ContentRequest>,
    active: Option<ActiveTransfer>,
    paused: bool,
}

impl PeerState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: None,
            paused: false,
        }
    }
}

enum Pumped {
    /// All chunks and the transfer-end were sent.
    Completed,
    /// Backpressure hit; waiting for a buffered-amount-low event.
    Paused,
    /// The channel rejected a send; the transfer was discarded.
    Failed,
}

struct PeerHandle {
    channel: Arc<dyn DataChannel>,
    task: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Bootstrap Host
// ----------------------------------------------------------------------------

/// Serves the app bundle and document snapshots to joining peers.
pub struct BootstrapHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    config: TransferConfig,
    bundle: RwLock<Option<Arc<StoredBundle>>>,
    documents: RwLock<Arc<Vec<(DocumentId, Vec<u8>)>>>,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    destroyed: AtomicBool,
}

impl BootstrapHost {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                bundle: RwLock::new(None),
                documents: RwLock::new(Arc::new(Vec::new())),
                peers: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Store the app bundle, replacing any previous one. The hash covers the
    /// raw bytes; `compression` selects how they travel. Transfers already
    /// in flight keep the bundle they started with.
    pub fn set_app_bundle(&self, raw: &[u8], compression: Compression) -> Result<(), CodecError> {
        let hash = chunk::compute_hash(raw);
        let bytes = compress::compress(raw, compression)?;
        debug!(
            raw_size = raw.len(),
            wire_size = bytes.len(),
            %compression,
            "app bundle updated"
        );
        *self.inner.bundle.write().unwrap() = Some(Arc::new(StoredBundle {
            bytes,
            hash,
            compression,
        }));
        Ok(())
    }

    /// Replace the shareable document set atomically, as seen by subsequent
    /// requests. In-flight transfers are unaffected.
    pub fn set_documents(&self, documents: Vec<(DocumentId, Vec<u8>)>) {
        *self.inner.documents.write().unwrap() = Arc::new(documents);
    }

    /// Bundle hash/size and document-data estimate for the QR payload.
    pub fn bootstrap_info(&self) -> BootstrapInfo {
        let bundle = self.inner.bundle.read().unwrap().clone();
        let documents = self.inner.documents.read().unwrap().clone();
        BootstrapInfo {
            version: PROTOCOL_VERSION,
            bundle_hash: bundle.as_ref().map(|b| b.hash.clone()),
            bundle_size: bundle.as_ref().map(|b| b.bytes.len() as u64),
            song_data_size: Some(batch::estimate_encoded_size(&documents)),
        }
    }

    /// Register a data channel for a joining peer. Channels whose label is
    /// not the bootstrap label are ignored.
    pub fn handle_data_channel(&self, channel: Arc<dyn DataChannel>, peer_id: PeerId) {
        if channel.label() != BOOTSTRAP_CHANNEL_LABEL {
            debug!(peer = %peer_id, label = channel.label(), "ignoring non-bootstrap channel");
            return;
        }
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let Some(events) = channel.take_events() else {
            warn!(peer = %peer_id, "channel event stream already taken");
            return;
        };
        info!(peer = %peer_id, "bootstrap channel registered");
        let inner = self.inner.clone();
        let task_channel = channel.clone();
        let task_peer = peer_id.clone();
        let task = tokio::spawn(async move {
            HostInner::peer_loop(inner, task_peer, task_channel, events).await;
        });
        self.inner
            .peers
            .lock()
            .unwrap()
            .insert(peer_id, PeerHandle { channel, task });
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().unwrap().len()
    }

    /// Close all peer channels and clear internal state. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<PeerHandle> = {
            let mut peers = self.inner.peers.lock().unwrap();
            peers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.channel.close().await;
            handle.task.abort();
        }
        info!("bootstrap host destroyed");
    }
}

impl HostInner {
    async fn peer_loop(
        inner: Arc<HostInner>,
        peer_id: PeerId,
        channel: Arc<dyn DataChannel>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let mut state = PeerState::new();
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Text(text) => match decode_control(&text) {
                    Ok(message) => {
                        inner
                            .on_control(&peer_id, channel.as_ref(), &mut state, message)
                            .await;
                    }
                    Err(error) => {
                        warn!(peer = %peer_id, error = %error, "undecodable control frame");
                    }
                },
                ChannelEvent::Binary(_) => {
                    debug!(peer = %peer_id, "unexpected binary frame from joiner ignored");
                }
                ChannelEvent::BufferedAmountLow => {
                    if state.paused {
                        state.paused = false;
                        inner.drive(&peer_id, channel.as_ref(), &mut state).await;
                    }
                }
                ChannelEvent::Closed => break,
                ChannelEvent::Error(reason) => {
                    warn!(peer = %peer_id, %reason, "channel error");
                    break;
                }
            }
        }
        inner.peers.lock().unwrap().remove(&peer_id);
        info!(peer = %peer_id, "peer connection removed");
    }

    async fn on_control(
        &self,
        peer_id: &PeerId,
        channel: &dyn DataChannel,
        state: &mut PeerState,
        message: ControlMessage,
    ) {
        match message {
            ControlMessage::RequestBootstrap { version } => {
                if version != PROTOCOL_VERSION {
                    warn!(peer = %peer_id, theirs = version, "protocol version mismatch");
                    let notice = ControlMessage::Error {
                        code: ErrorCode::VersionMismatch,
                        message: format!(
                            "host speaks protocol version {PROTOCOL_VERSION}, joiner requested {version}"
                        ),
                        transfer_id: None,
                    };
                    if let Err(error) = send_control(channel, &notice).await {
                        debug!(peer = %peer_id, error = %error, "version notice failed");
                    }
                    return;
                }
                state.queue.push_back(ContentRequest::Bootstrap);
                self.drive(peer_id, channel, state).await;
            }
            ControlMessage::RequestDocuments { document_ids } => {
                state
                    .queue
                    .push_back(ContentRequest::Documents { ids: document_ids });
                self.drive(peer_id, channel, state).await;
            }
            ControlMessage::Error { code, message, .. } => {
                warn!(peer = %peer_id, %code, %message, "joiner reported error");
            }
            // Host-originated message kinds echoed back; nothing to do.
            other => debug!(peer = %peer_id, kind = other.kind(), "ignoring message"),
        }
    }

    /// Start queued transfers and pump the active one until the queue drains,
    /// backpressure pauses us, or the channel fails. Runs on the single
    /// per-peer task, which serializes starts against resumes.
    async fn drive(&self, peer_id: &PeerId, channel: &dyn DataChannel, state: &mut PeerState) {
        loop {
            if state.active.is_none() {
                let Some(request) = state.queue.pop_front() else {
                    return;
                };
                match self.begin_transfer(channel, &request).await {
                    Ok(Some(active)) => {
                        state.active = Some(active);
                        state.paused = false;
                    }
                    // The request was answered with an error frame.
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(peer = %peer_id, error = %error, "transfer start failed");
                        return;
                    }
                }
            }
            match self.pump(peer_id, channel, state).await {
                Pumped::Completed => continue,
                Pumped::Paused => return,
                Pumped::Failed => return,
            }
        }
    }

    /// Announce a transfer for `request`, or answer it with an error frame.
    async fn begin_transfer(
        &self,
        channel: &dyn DataChannel,
        request: &ContentRequest,
    ) -> Result<Option<ActiveTransfer>, crate::channel::ChannelError> {
        let (content_type, payload, hash, compression) = match request {
            ContentRequest::Bootstrap => {
                let bundle = self.bundle.read().unwrap().clone();
                let Some(bundle) = bundle else {
                    send_control(
                        channel,
                        &ControlMessage::Error {
                            code: ErrorCode::BundleNotAvailable,
                            message: "no app bundle is available".into(),
                            transfer_id: None,
                        },
                    )
                    .await?;
                    return Ok(None);
                };
                (
                    ContentType::AppBundle,
                    bundle.bytes.clone(),
                    bundle.hash.clone(),
                    bundle.compression,
                )
            }
            ContentRequest::Documents { ids } => {
                let documents = self.documents.read().unwrap().clone();
                let selected: Vec<(DocumentId, Vec<u8>)> = match ids {
                    None => documents.as_ref().clone(),
                    Some(ids) => documents
                        .iter()
                        .filter(|(id, _)| ids.contains(id))
                        .cloned()
                        .collect(),
                };
                // An empty selection still gets a well-formed zero-document
                // transfer so the joiner's state machine terminates.
                let encoded = batch::encode(&selected);
                let hash = chunk::compute_hash(&encoded);
                (ContentType::DocumentData, encoded, hash, Compression::None)
            }
        };

        let chunks = chunk::chunk(&payload, self.config.chunk_size);
        let transfer_id = TransferId::random();
        info!(
            transfer = %transfer_id,
            ?content_type,
            total_size = payload.len(),
            total_chunks = chunks.len(),
            "transfer starting"
        );
        send_control(
            channel,
            &ControlMessage::TransferStart {
                transfer_id,
                content_type,
                total_size: payload.len() as u64,
                total_chunks: chunks.len() as u32,
                hash,
                compression,
            },
        )
        .await?;
        Ok(Some(ActiveTransfer {
            transfer_id,
            chunks,
            cursor: 0,
        }))
    }

    /// Send chunks while the channel can absorb them. Pauses at the
    /// backpressure threshold; the buffered-amount-low event resumes us.
    async fn pump(&self, peer_id: &PeerId, channel: &dyn DataChannel, state: &mut PeerState) -> Pumped {
        let Some(mut active) = state.active.take() else {
            return Pumped::Completed;
        };
        while active.cursor < active.chunks.len() {
            if channel.buffered_amount() >= self.config.backpressure_threshold {
                debug!(
                    peer = %peer_id,
                    transfer = %active.transfer_id,
                    sent = active.cursor,
                    "backpressure threshold reached, pausing"
                );
                state.paused = true;
                state.active = Some(active);
                return Pumped::Paused;
            }
            let index = active.cursor;
            if let Err(error) = channel.send_binary(&active.chunks[index]).await {
                warn!(
                    peer = %peer_id,
                    transfer = %active.transfer_id,
                    chunk = index,
                    error = %error,
                    "chunk send failed, discarding transfer"
                );
                let notice = ControlMessage::Error {
                    code: ErrorCode::TransferFailed,
                    message: format!("chunk {index} send failed"),
                    transfer_id: Some(active.transfer_id),
                };
                // Best effort: the channel may already be gone.
                if let Err(error) = send_control(channel, &notice).await {
                    debug!(peer = %peer_id, error = %error, "failure notice undeliverable");
                }
                return Pumped::Failed;
            }
            active.cursor += 1;
            if self.config.progress_interval > 0
                && active.cursor < active.chunks.len()
                && active.cursor as u32 % self.config.progress_interval == 0
            {
                let progress = ControlMessage::TransferProgress {
                    transfer_id: active.transfer_id,
                    chunk_index: active.cursor as u32 - 1,
                    total_chunks: active.chunks.len() as u32,
                };
                if let Err(error) = send_control(channel, &progress).await {
                    debug!(peer = %peer_id, error = %error, "progress ping failed");
                }
            }
        }
        let transfer_id = active.transfer_id;
        match send_control(
            channel,
            &ControlMessage::TransferEnd {
                transfer_id,
                success: true,
            },
        )
        .await
        {
            Ok(()) => {
                info!(peer = %peer_id, transfer = %transfer_id, "transfer complete");
                Pumped::Completed
            }
            Err(error) => {
                warn!(peer = %peer_id, transfer = %transfer_id, error = %error, "transfer-end failed");
                Pumped::Failed
            }
        }
    }
}
