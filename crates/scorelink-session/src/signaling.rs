//! Signaling bridge
//!
//! Bridges offer/answer/ICE exchange over a lightweight pub/sub relay into
//! established data channels, for joiners that have not yet loaded the
//! application and therefore cannot use the full document-sync machinery.
//! The bridge's only contract is "deliver a working data channel, keyed by
//! peer id, to a callback"; it knows nothing of chunking, transfers, or
//! document formats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scorelink_core::config::SignalingConfig;
use scorelink_core::errors::SignalingError;
use scorelink_core::types::{PeerId, SessionId};

use crate::channel::{DataChannel, BOOTSTRAP_CHANNEL_LABEL};

// ----------------------------------------------------------------------------
// Signaling Envelopes
// ----------------------------------------------------------------------------

/// JSON envelopes relayed between peers during connection setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalEnvelope {
    Offer { from: PeerId, sdp: String },
    Answer { from: PeerId, sdp: String },
    Ice { from: PeerId, candidate: String },
}

// ----------------------------------------------------------------------------
// Relay Seam
// ----------------------------------------------------------------------------

/// Publish/subscribe relay used only for connection setup.
///
/// At-least-once delivery of envelopes is assumed; the relay's own wire
/// format is its business.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    async fn connect(&self) -> Result<(), SignalingError>;

    /// Subscribe to a topic. The stream ending signals loss of the relay
    /// connection.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>, SignalingError>;

    /// Publish to a topic, optionally addressed to one peer.
    async fn publish(
        &self,
        topic: &str,
        envelope: SignalEnvelope,
        to: Option<&PeerId>,
    ) -> Result<(), SignalingError>;

    async fn close(&self);
}

// ----------------------------------------------------------------------------
// Peer Endpoint Seam
// ----------------------------------------------------------------------------

/// Connection state reported by a peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events from one peer endpoint.
pub enum EndpointEvent {
    /// A locally gathered ICE candidate to trickle back to the peer.
    IceCandidate(String),
    /// The peer opened a data channel toward us.
    DataChannel(Arc<dyn DataChannel>),
    StateChanged(EndpointState),
}

impl std::fmt::Debug for EndpointEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointEvent::IceCandidate(_) => f.write_str("IceCandidate"),
            EndpointEvent::DataChannel(channel) => {
                write!(f, "DataChannel({})", channel.label())
            }
            EndpointEvent::StateChanged(state) => write!(f, "StateChanged({state:?})"),
        }
    }
}

/// The external peer-to-peer engine, scoped to one remote peer.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Apply the remote offer and produce the local answer.
    async fn apply_remote_offer(&self, sdp: &str) -> Result<String, SignalingError>;

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), SignalingError>;

    /// Take the endpoint's event stream. Yields `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EndpointEvent>>;

    async fn close(&self);
}

/// Creates one endpoint per joining peer.
pub trait EndpointFactory: Send + Sync {
    fn create(&self, peer_id: &PeerId) -> Result<Arc<dyn PeerEndpoint>, SignalingError>;
}

/// Callback receiving established bootstrap channels, keyed by peer id.
pub type ChannelSink = Arc<dyn Fn(Arc<dyn DataChannel>, PeerId) + Send + Sync>;

// ----------------------------------------------------------------------------
// Signaling Bridge
// ----------------------------------------------------------------------------

/// Host-side signaling bridge for one session.
pub struct SignalingBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    session_id: SessionId,
    local_id: PeerId,
    config: SignalingConfig,
    relay: Arc<dyn SignalingRelay>,
    factory: Arc<dyn EndpointFactory>,
    sink: ChannelSink,
    peers: Mutex<HashMap<PeerId, Arc<dyn PeerEndpoint>>>,
    destroyed: AtomicBool,
    errors: mpsc::UnboundedSender<SignalingError>,
}

impl SignalingBridge {
    /// Build a bridge. The returned receiver surfaces unrecoverable bridge
    /// errors (reconnect exhaustion) to the owning session manager.
    pub fn new(
        session_id: SessionId,
        local_id: PeerId,
        config: SignalingConfig,
        relay: Arc<dyn SignalingRelay>,
        factory: Arc<dyn EndpointFactory>,
        sink: ChannelSink,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingError>) {
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                session_id,
                local_id,
                config,
                relay,
                factory,
                sink,
                peers: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
                errors,
            }),
        };
        (bridge, errors_rx)
    }

    /// Connect to the relay and start dispatching signaling for the session
    /// topic. Resolves once the subscription is established.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.inner.relay.connect().await?;
        let receiver = self.inner.relay.subscribe(&self.inner.topic()).await?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            BridgeInner::dispatch_loop(inner, receiver).await;
        });
        Ok(())
    }

    /// Number of peers with live endpoints.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().unwrap().len()
    }

    /// Close all peer endpoints and the relay connection. Idempotent;
    /// suppresses further reconnect attempts.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let endpoints: Vec<Arc<dyn PeerEndpoint>> = {
            let mut peers = self.inner.peers.lock().unwrap();
            peers.drain().map(|(_, endpoint)| endpoint).collect()
        };
        for endpoint in endpoints {
            endpoint.close().await;
        }
        self.inner.relay.close().await;
        info!(session = %self.inner.session_id, "signaling bridge destroyed");
    }
}

impl BridgeInner {
    fn topic(&self) -> String {
        format!("session/{}", self.session_id)
    }

    async fn dispatch_loop(
        inner: Arc<BridgeInner>,
        mut receiver: mpsc::UnboundedReceiver<SignalEnvelope>,
    ) {
        loop {
            while let Some(envelope) = receiver.recv().await {
                BridgeInner::handle_envelope(&inner, envelope).await;
            }
            // Subscription stream ended: the relay connection is gone.
            if inner.destroyed.load(Ordering::SeqCst) {
                return;
            }
            match inner.reconnect().await {
                Ok(next) => receiver = next,
                Err(error) => {
                    warn!(error = %error, "signaling relay lost for good");
                    let _ = inner.errors.send(error);
                    return;
                }
            }
        }
    }

    /// Bounded reconnect with increasing backoff.
    async fn reconnect(&self) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>, SignalingError> {
        let mut backoff = self.config.initial_backoff;
        for attempt in 1..=self.config.max_reconnect_attempts {
            if self.destroyed.load(Ordering::SeqCst) {
                return Err(SignalingError::Destroyed);
            }
            tokio::time::sleep(backoff).await;
            warn!(attempt, "relay connection lost, reconnecting");
            let result = async {
                self.relay.connect().await?;
                self.relay.subscribe(&self.topic()).await
            }
            .await;
            match result {
                Ok(receiver) => return Ok(receiver),
                Err(error) => debug!(attempt, error = %error, "reconnect attempt failed"),
            }
            backoff = backoff
                .mul_f32(self.config.backoff_multiplier)
                .min(self.config.max_backoff);
        }
        Err(SignalingError::RetriesExhausted {
            attempts: self.config.max_reconnect_attempts,
        })
    }

    async fn handle_envelope(inner: &Arc<BridgeInner>, envelope: SignalEnvelope) {
        match envelope {
            SignalEnvelope::Offer { from, sdp } => {
                if let Err(error) = BridgeInner::handle_offer(inner, &from, &sdp).await {
                    warn!(peer = %from, error = %error, "offer handling failed");
                }
            }
            SignalEnvelope::Ice { from, candidate } => {
                let endpoint = inner.peers.lock().unwrap().get(&from).cloned();
                match endpoint {
                    Some(endpoint) => {
                        if let Err(error) = endpoint.add_ice_candidate(&candidate).await {
                            warn!(peer = %from, error = %error, "ICE candidate rejected");
                        }
                    }
                    // Stale or duplicate signaling; nothing to apply it to.
                    None => debug!(peer = %from, "ICE candidate from unknown peer ignored"),
                }
            }
            SignalEnvelope::Answer { from, .. } => {
                debug!(peer = %from, "answer envelope ignored on the answering side");
            }
        }
    }

    async fn handle_offer(
        inner: &Arc<BridgeInner>,
        peer_id: &PeerId,
        sdp: &str,
    ) -> Result<(), SignalingError> {
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(SignalingError::Destroyed);
        }
        info!(peer = %peer_id, "offer received, creating endpoint");
        let endpoint = inner.factory.create(peer_id)?;
        {
            let mut peers = inner.peers.lock().unwrap();
            peers.insert(peer_id.clone(), endpoint.clone());
        }
        if let Some(events) = endpoint.take_events() {
            let spawned = inner.clone();
            let peer = peer_id.clone();
            tokio::spawn(async move {
                spawned.endpoint_loop(peer, events).await;
            });
        }
        let answer = endpoint.apply_remote_offer(sdp).await?;
        inner
            .relay
            .publish(
                &inner.topic(),
                SignalEnvelope::Answer {
                    from: inner.local_id.clone(),
                    sdp: answer,
                },
                Some(peer_id),
            )
            .await
    }

    async fn endpoint_loop(
        self: Arc<Self>,
        peer_id: PeerId,
        mut events: mpsc::UnboundedReceiver<EndpointEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                EndpointEvent::IceCandidate(candidate) => {
                    let envelope = SignalEnvelope::Ice {
                        from: self.local_id.clone(),
                        candidate,
                    };
                    if let Err(error) = self
                        .relay
                        .publish(&self.topic(), envelope, Some(&peer_id))
                        .await
                    {
                        debug!(peer = %peer_id, error = %error, "candidate publish failed");
                    }
                }
                EndpointEvent::DataChannel(channel) => {
                    if channel.label() == BOOTSTRAP_CHANNEL_LABEL {
                        (self.sink)(channel, peer_id.clone());
                    } else {
                        debug!(
                            peer = %peer_id,
                            label = channel.label(),
                            "ignoring data channel with unrelated label"
                        );
                    }
                }
                EndpointEvent::StateChanged(state) => match state {
                    EndpointState::Failed | EndpointState::Disconnected | EndpointState::Closed => {
                        self.remove_peer(&peer_id).await;
                        return;
                    }
                    EndpointState::Connecting | EndpointState::Connected => {}
                },
            }
        }
    }

    /// Tear down one peer's endpoint without touching the others.
    async fn remove_peer(&self, peer_id: &PeerId) {
        let endpoint = self.peers.lock().unwrap().remove(peer_id);
        if let Some(endpoint) = endpoint {
            endpoint.close().await;
            info!(peer = %peer_id, "peer endpoint removed");
        }
    }
}
