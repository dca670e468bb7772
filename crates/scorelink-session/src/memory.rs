//! In-memory transports
//!
//! Deterministic in-process implementations of the transport seams: linked
//! data-channel pairs with a manual-drain buffered-amount model, a pub/sub
//! relay hub, loopback peer endpoints, and a shared live-sync hub. The test
//! suites run entirely on these; they also back local-network sessions,
//! where both sides live in one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use scorelink_core::errors::{SessionError, SignalingError};
use scorelink_core::types::PeerId;

use crate::channel::{ChannelError, ChannelEvent, DataChannel};
use crate::livesync::{LiveSyncTransport, LiveSyncUpdate};
use crate::manager::{Session, SessionBackend};
use crate::signaling::{
    EndpointEvent, EndpointFactory, PeerEndpoint, SignalEnvelope, SignalingRelay,
};

// ----------------------------------------------------------------------------
// Memory Channel
// ----------------------------------------------------------------------------

struct ChannelSide {
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    buffered: usize,
    low_water: usize,
    auto_drain: bool,
    open: bool,
    /// Fail binary sends after this many succeed (test hook).
    fail_binary_after: Option<usize>,
    binary_sent: usize,
}

struct ChannelLink {
    sides: [ChannelSide; 2],
}

/// One end of a linked in-memory data channel pair.
pub struct MemoryChannel {
    label: String,
    index: usize,
    link: Arc<Mutex<ChannelLink>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl MemoryChannel {
    /// A connected pair whose outbound buffers drain instantly (no
    /// backpressure).
    pub fn pair(label: &str) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        Self::build_pair(label, usize::MAX, true)
    }

    /// A connected pair that accumulates sent bytes until `drain` is called,
    /// emitting `BufferedAmountLow` when the level drops below `low_water`.
    pub fn pair_with_buffering(
        label: &str,
        low_water: usize,
    ) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        Self::build_pair(label, low_water, false)
    }

    fn build_pair(
        label: &str,
        low_water: usize,
        auto_drain: bool,
    ) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let side = |events_tx| ChannelSide {
            events_tx,
            buffered: 0,
            low_water,
            auto_drain,
            open: true,
            fail_binary_after: None,
            binary_sent: 0,
        };
        let link = Arc::new(Mutex::new(ChannelLink {
            sides: [side(tx_a), side(tx_b)],
        }));
        let make = |index, rx| {
            Arc::new(MemoryChannel {
                label: label.to_string(),
                index,
                link: link.clone(),
                events: Mutex::new(Some(rx)),
            })
        };
        (make(0, rx_a), make(1, rx_b))
    }

    /// Drain `bytes` from this side's outbound buffer, firing
    /// `BufferedAmountLow` if the level crosses the low-water mark.
    pub fn drain(&self, bytes: usize) {
        let mut link = self.link.lock().unwrap();
        let side = &mut link.sides[self.index];
        let before = side.buffered;
        side.buffered = side.buffered.saturating_sub(bytes);
        if before >= side.low_water && side.buffered < side.low_water {
            let _ = side.events_tx.send(ChannelEvent::BufferedAmountLow);
        }
    }

    /// Make binary sends from this side fail after `successes` more succeed.
    pub fn fail_binary_after(&self, successes: usize) {
        let mut link = self.link.lock().unwrap();
        let side = &mut link.sides[self.index];
        side.fail_binary_after = Some(side.binary_sent + successes);
    }

    pub fn buffered(&self) -> usize {
        self.link.lock().unwrap().sides[self.index].buffered
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let link = self.link.lock().unwrap();
        if !link.sides[self.index].open {
            return Err(ChannelError::Closed);
        }
        let peer = &link.sides[1 - self.index];
        if peer.open {
            let _ = peer.events_tx.send(ChannelEvent::Text(text.to_string()));
        }
        Ok(())
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), ChannelError> {
        let mut link = self.link.lock().unwrap();
        if !link.sides[self.index].open {
            return Err(ChannelError::Closed);
        }
        let side = &mut link.sides[self.index];
        if side.fail_binary_after.is_some_and(|limit| side.binary_sent >= limit) {
            return Err(ChannelError::SendFailed("simulated channel failure".into()));
        }
        side.binary_sent += 1;
        if !side.auto_drain {
            side.buffered += data.len();
        }
        let peer = &link.sides[1 - self.index];
        if peer.open {
            let _ = peer.events_tx.send(ChannelEvent::Binary(data.to_vec()));
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.link.lock().unwrap().sides[self.index].buffered
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.lock().unwrap().take()
    }

    async fn close(&self) {
        let mut link = self.link.lock().unwrap();
        for side in &mut link.sides {
            if side.open {
                side.open = false;
                let _ = side.events_tx.send(ChannelEvent::Closed);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Memory Relay
// ----------------------------------------------------------------------------

struct RelaySubscriber {
    peer_id: PeerId,
    sender: mpsc::UnboundedSender<SignalEnvelope>,
}

#[derive(Default)]
struct RelayHubState {
    topics: HashMap<String, Vec<RelaySubscriber>>,
}

/// Shared pub/sub hub standing in for a signaling relay server.
#[derive(Default)]
pub struct MemoryRelayHub {
    state: Mutex<RelayHubState>,
}

impl MemoryRelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A relay client for one peer.
    pub fn client(self: &Arc<Self>, peer_id: PeerId) -> Arc<MemoryRelay> {
        Arc::new(MemoryRelay {
            hub: self.clone(),
            peer_id,
            fail_connect: AtomicBool::new(false),
        })
    }

    /// Sever every subscription on a topic, as a relay outage would.
    pub fn drop_topic(&self, topic: &str) {
        self.state.lock().unwrap().topics.remove(topic);
    }

    fn publish(&self, topic: &str, envelope: SignalEnvelope, from: &PeerId, to: Option<&PeerId>) {
        let state = self.state.lock().unwrap();
        let Some(subscribers) = state.topics.get(topic) else {
            return;
        };
        for subscriber in subscribers {
            if subscriber.peer_id == *from {
                continue;
            }
            if to.is_some_and(|target| *target != subscriber.peer_id) {
                continue;
            }
            let _ = subscriber.sender.send(envelope.clone());
        }
    }
}

/// One peer's connection to the relay hub.
pub struct MemoryRelay {
    hub: Arc<MemoryRelayHub>,
    peer_id: PeerId,
    fail_connect: AtomicBool,
}

impl MemoryRelay {
    /// Make future connect attempts fail (test hook).
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingRelay for MemoryRelay {
    async fn connect(&self) -> Result<(), SignalingError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SignalingError::RelayUnreachable(
                "simulated relay outage".into(),
            ));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>, SignalingError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SignalingError::RelayUnreachable(
                "simulated relay outage".into(),
            ));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.hub
            .state
            .lock()
            .unwrap()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(RelaySubscriber {
                peer_id: self.peer_id.clone(),
                sender,
            });
        Ok(receiver)
    }

    async fn publish(
        &self,
        topic: &str,
        envelope: SignalEnvelope,
        to: Option<&PeerId>,
    ) -> Result<(), SignalingError> {
        self.hub.publish(topic, envelope, &self.peer_id, to);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.hub.state.lock().unwrap();
        for subscribers in state.topics.values_mut() {
            subscribers.retain(|subscriber| subscriber.peer_id != self.peer_id);
        }
    }
}

// ----------------------------------------------------------------------------
// Memory Endpoint
// ----------------------------------------------------------------------------

/// Loopback peer endpoint whose events are injected by the test or by the
/// joining side of a local session.
pub struct MemoryEndpoint {
    peer_id: PeerId,
    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EndpointEvent>>>,
    candidates: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MemoryEndpoint {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Inject an endpoint event, as the underlying engine would.
    pub fn emit(&self, event: EndpointEvent) {
        let _ = self.events_tx.send(event);
    }

    /// ICE candidates applied so far.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerEndpoint for MemoryEndpoint {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<String, SignalingError> {
        Ok(format!("answer:{sdp}"))
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), SignalingError> {
        self.candidates.lock().unwrap().push(candidate.to_string());
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EndpointEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory that records every endpoint it creates.
#[derive(Default)]
pub struct MemoryEndpointFactory {
    created: Mutex<Vec<Arc<MemoryEndpoint>>>,
}

impl MemoryEndpointFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<Arc<MemoryEndpoint>> {
        self.created.lock().unwrap().clone()
    }
}

impl EndpointFactory for MemoryEndpointFactory {
    fn create(&self, peer_id: &PeerId) -> Result<Arc<dyn PeerEndpoint>, SignalingError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(MemoryEndpoint {
            peer_id: peer_id.clone(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(endpoint.clone());
        Ok(endpoint)
    }
}

// ----------------------------------------------------------------------------
// Memory Live Sync
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LiveHubState {
    participants: HashMap<PeerId, Value>,
    shared: HashMap<String, Value>,
}

/// Shared live-sync state for every participant of one session.
pub struct MemoryLiveSyncHub {
    state: Mutex<LiveHubState>,
    updates: broadcast::Sender<LiveSyncUpdate>,
}

impl MemoryLiveSyncHub {
    pub fn new() -> Arc<Self> {
        let (updates, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(LiveHubState::default()),
            updates,
        })
    }

    /// Connect one participant.
    pub fn connect(self: &Arc<Self>, peer_id: PeerId) -> Arc<MemoryLiveSync> {
        Arc::new(MemoryLiveSync {
            hub: self.clone(),
            peer_id,
            closed: AtomicBool::new(false),
        })
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().unwrap().participants.len()
    }
}

/// One participant's connection to the live-sync hub.
pub struct MemoryLiveSync {
    hub: Arc<MemoryLiveSyncHub>,
    peer_id: PeerId,
    closed: AtomicBool,
}

#[async_trait]
impl LiveSyncTransport for MemoryLiveSync {
    async fn set_local_state(&self, state: Value) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::LiveSync("transport closed".into()));
        }
        self.hub
            .state
            .lock()
            .unwrap()
            .participants
            .insert(self.peer_id.clone(), state);
        let _ = self.hub.updates.send(LiveSyncUpdate::ParticipantsChanged);
        Ok(())
    }

    async fn shared_put(&self, key: &str, value: Value) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::LiveSync("transport closed".into()));
        }
        self.hub
            .state
            .lock()
            .unwrap()
            .shared
            .insert(key.to_string(), value);
        let _ = self.hub.updates.send(LiveSyncUpdate::SharedChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    fn shared_get(&self, key: &str) -> Option<Value> {
        self.hub.state.lock().unwrap().shared.get(key).cloned()
    }

    fn participant_states(&self) -> Vec<Value> {
        self.hub
            .state
            .lock()
            .unwrap()
            .participants
            .values()
            .cloned()
            .collect()
    }

    fn updates(&self) -> broadcast::Receiver<LiveSyncUpdate> {
        self.hub.updates.subscribe()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub
            .state
            .lock()
            .unwrap()
            .participants
            .remove(&self.peer_id);
        let _ = self.hub.updates.send(LiveSyncUpdate::ParticipantsChanged);
        debug!(peer = %self.peer_id, "live sync participant disconnected");
    }
}

// ----------------------------------------------------------------------------
// Memory Backend
// ----------------------------------------------------------------------------

/// A complete in-process `SessionBackend`: shared hubs, loopback endpoints,
/// and connection descriptors for every transport type.
pub struct MemoryBackend {
    peer_id: PeerId,
    relay_hub: Arc<MemoryRelayHub>,
    live_hub: Arc<MemoryLiveSyncHub>,
    endpoints: Arc<MemoryEndpointFactory>,
}

impl MemoryBackend {
    pub fn new(
        peer_id: PeerId,
        relay_hub: Arc<MemoryRelayHub>,
        live_hub: Arc<MemoryLiveSyncHub>,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            relay_hub,
            live_hub,
            endpoints: MemoryEndpointFactory::new(),
        })
    }

    pub fn endpoints(&self) -> Arc<MemoryEndpointFactory> {
        self.endpoints.clone()
    }

    pub fn live_hub(&self) -> Arc<MemoryLiveSyncHub> {
        self.live_hub.clone()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn connection_info(
        &self,
        transport: scorelink_core::types::TransportType,
        session_id: &scorelink_core::types::SessionId,
    ) -> Result<scorelink_core::payload::ConnectionInfo, SessionError> {
        use scorelink_core::payload::ConnectionInfo;
        use scorelink_core::types::TransportType;
        let info = match transport {
            TransportType::WebRtc => ConnectionInfo::WebRtc {
                signaling_server: "memory://relay".into(),
                room_id: session_id.as_str().to_string(),
                password: None,
            },
            TransportType::Bluetooth => ConnectionInfo::Bluetooth {
                service_uuid: "0000a1b2-0000-1000-8000-00805f9b34fb".into(),
                characteristic_uuid: "0000c3d4-0000-1000-8000-00805f9b34fb".into(),
                device_name: format!("scorelink-{}", self.peer_id),
            },
            TransportType::LocalNetwork => ConnectionInfo::LocalNetwork {
                addresses: vec!["127.0.0.1".into()],
                port: 7411,
                token: session_id.as_str().to_string(),
            },
        };
        Ok(info)
    }

    fn signaling_relay(
        &self,
        _session_id: &scorelink_core::types::SessionId,
    ) -> Arc<dyn SignalingRelay> {
        self.relay_hub.client(self.peer_id.clone())
    }

    fn endpoint_factory(&self) -> Arc<dyn EndpointFactory> {
        self.endpoints.clone()
    }

    async fn connect_live_sync(
        &self,
        _session: &Session,
    ) -> Result<Arc<dyn LiveSyncTransport>, SessionError> {
        Ok(self.live_hub.connect(self.peer_id.clone()))
    }
}
