//! Session manager tests
//!
//! Lifecycle, transport selection, presence, content-on-demand, and the full
//! QR → signaling → bootstrap flow, over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use scorelink_core::chunk;
use scorelink_core::payload::{self, ManifestEntry};
use scorelink_core::types::{DocumentId, PeerId, TransportType};
use scorelink_core::{
    Compression, ScorelinkError, SessionConfig, SessionError, SignalingConfig, TransferConfig,
};
use scorelink_session::memory::{MemoryBackend, MemoryChannel, MemoryLiveSyncHub, MemoryRelayHub};
use scorelink_session::{
    BootstrapOptions, BootstrapReceiver, CreateSessionOptions, EndpointEvent, JoinSessionOptions,
    PlatformCapabilities, SessionEvent, SessionManager, SessionState, SignalEnvelope,
    BOOTSTRAP_CHANNEL_LABEL,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct World {
    relay_hub: Arc<MemoryRelayHub>,
    live_hub: Arc<MemoryLiveSyncHub>,
}

impl World {
    fn new() -> Self {
        Self {
            relay_hub: MemoryRelayHub::new(),
            live_hub: MemoryLiveSyncHub::new(),
        }
    }

    fn manager(&self, peer: &str, capabilities: PlatformCapabilities) -> (SessionManager, Arc<MemoryBackend>) {
        let backend = MemoryBackend::new(
            PeerId::from(peer),
            self.relay_hub.clone(),
            self.live_hub.clone(),
        );
        let manager = SessionManager::new(
            SessionConfig::testing(),
            TransferConfig::testing(),
            SignalingConfig::testing(),
            capabilities,
            backend.clone(),
        );
        (manager, backend)
    }
}

fn online() -> PlatformCapabilities {
    PlatformCapabilities {
        network_reachable: true,
        bluetooth_capable: true,
    }
}

fn manifest() -> Vec<ManifestEntry> {
    vec![ManifestEntry {
        id: DocumentId::from("song-1"),
        title: "Gymnopédie No.1".into(),
        artist: Some("Satie".into()),
        instruments: vec!["piano".into()],
    }]
}

fn documents() -> Vec<(DocumentId, Vec<u8>)> {
    vec![(DocumentId::from("song-1"), vec![0xab; 400])]
}

fn bundle() -> Vec<u8> {
    b"<html>app shell</html>".repeat(50)
}

fn bootstrap_options(host_name: &str) -> CreateSessionOptions {
    let mut options = CreateSessionOptions::new(host_name);
    options.bootstrap = Some(BootstrapOptions {
        app_bundle: bundle(),
        compression: Compression::Gzip,
    });
    options
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn create_session_yields_a_bootstrap_payload_that_round_trips() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    let mut events = manager.events();

    let session_payload = manager
        .create_session(manifest(), documents(), bootstrap_options("Ada"))
        .await
        .unwrap();

    assert_eq!(manager.state().await, SessionState::Hosting);
    assert_eq!(session_payload.transport_type(), TransportType::WebRtc);
    let bootstrap = session_payload.bootstrap.as_ref().unwrap();
    assert_eq!(
        bootstrap.bundle_hash.as_deref(),
        Some(chunk::compute_hash(&bundle()).as_str())
    );
    assert!(bootstrap.song_data_size.is_some());

    // The payload survives its QR encoding.
    let encoded = payload::encode(&session_payload).unwrap();
    assert_eq!(payload::decode(&encoded).unwrap(), session_payload);

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, SessionEvent::Created { .. }));
}

#[tokio::test]
async fn join_of_an_expired_payload_fails_before_any_transport_opens() {
    let world = World::new();
    let (host_manager, _) = world.manager("host-peer", online());
    let mut session_payload = host_manager
        .create_session(manifest(), documents(), {
            let mut options = CreateSessionOptions::new("Ada");
            options.ttl = Some(Duration::from_secs(600));
            options
        })
        .await
        .unwrap();
    host_manager.leave_session().await;
    assert_eq!(world.live_hub.participant_count(), 0);

    // Rewind the expiry into the past.
    session_payload.expires_at = Some(scorelink_core::Timestamp::new(1_000));

    let (joiner, _) = world.manager("joiner-peer", online());
    let error = joiner
        .join_session(session_payload, JoinSessionOptions::new("Grace"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ScorelinkError::Session(SessionError::Expired { .. })
    ));
    assert_eq!(joiner.state().await, SessionState::Idle);
    // No live-sync connection was opened for the failed join.
    assert_eq!(world.live_hub.participant_count(), 0);
}

#[tokio::test]
async fn leave_is_idempotent_and_emits_left_once() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    manager
        .create_session(manifest(), documents(), CreateSessionOptions::new("Ada"))
        .await
        .unwrap();
    let mut events = manager.events();

    manager.leave_session().await;
    manager.leave_session().await;
    assert_eq!(manager.state().await, SessionState::Idle);

    let first = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, SessionEvent::Left { .. }));
    assert!(timeout(Duration::from_millis(100), events.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn creating_a_second_session_tears_down_the_first() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    let first = manager
        .create_session(manifest(), documents(), CreateSessionOptions::new("Ada"))
        .await
        .unwrap();
    let second = manager
        .create_session(manifest(), documents(), CreateSessionOptions::new("Ada"))
        .await
        .unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(manager.state().await, SessionState::Hosting);
    assert_eq!(
        manager.current_session().await.unwrap().session_id,
        second.session_id
    );
    // Only the second session's presence record remains.
    assert_eq!(world.live_hub.participant_count(), 1);
}

// ----------------------------------------------------------------------------
// Transport Selection
// ----------------------------------------------------------------------------

#[tokio::test]
async fn transport_auto_detection_follows_capability_priority() {
    let world = World::new();
    for (capabilities, expected) in [
        (online(), TransportType::WebRtc),
        (
            PlatformCapabilities {
                network_reachable: false,
                bluetooth_capable: true,
            },
            TransportType::Bluetooth,
        ),
        (
            PlatformCapabilities {
                network_reachable: false,
                bluetooth_capable: false,
            },
            TransportType::LocalNetwork,
        ),
    ] {
        let (manager, _) = world.manager("host-peer", capabilities);
        let session_payload = manager
            .create_session(manifest(), documents(), CreateSessionOptions::new("Ada"))
            .await
            .unwrap();
        assert_eq!(session_payload.transport_type(), expected);
        manager.leave_session().await;
    }
}

#[tokio::test]
async fn explicit_unsupported_transport_is_rejected() {
    let world = World::new();
    let (manager, _) = world.manager(
        "host-peer",
        PlatformCapabilities {
            network_reachable: false,
            bluetooth_capable: false,
        },
    );
    let mut options = CreateSessionOptions::new("Ada");
    options.transport = Some(TransportType::WebRtc);
    let error = manager
        .create_session(manifest(), documents(), options)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ScorelinkError::Session(SessionError::TransportUnavailable {
            transport: TransportType::WebRtc
        })
    ));
    assert_eq!(manager.state().await, SessionState::Idle);
}

#[tokio::test]
async fn oversized_manifests_are_rejected_at_creation() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    let huge: Vec<ManifestEntry> = (0..300)
        .map(|index| ManifestEntry {
            id: DocumentId::new(format!("song-{index}")),
            title: format!("An overly descriptive working title number {index}"),
            artist: Some("Various Artists".into()),
            instruments: vec!["piano".into(), "voice".into(), "drums".into()],
        })
        .collect();
    let error = manager
        .create_session(huge, documents(), CreateSessionOptions::new("Ada"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ScorelinkError::Session(SessionError::PayloadTooLarge { .. })
    ));
    assert_eq!(manager.state().await, SessionState::Idle);
    assert_eq!(world.live_hub.participant_count(), 0);
}

// ----------------------------------------------------------------------------
// Presence and Content on Demand
// ----------------------------------------------------------------------------

#[tokio::test]
async fn presence_is_visible_to_both_sides() {
    let world = World::new();
    let (host_manager, _) = world.manager("host-peer", online());
    let session_payload = host_manager
        .create_session(manifest(), documents(), {
            let mut options = CreateSessionOptions::new("Ada");
            options.instruments = vec!["violin".into()];
            options
        })
        .await
        .unwrap();

    let (joiner, _) = world.manager("joiner-peer", online());
    joiner
        .join_session(session_payload, JoinSessionOptions::new("Grace"))
        .await
        .unwrap();

    let host_view = host_manager.participants().await;
    let joiner_view = joiner.participants().await;
    assert_eq!(host_view.len(), 2);
    assert_eq!(joiner_view.len(), 2);
    let host_record = host_view
        .iter()
        .find(|participant| participant.is_host)
        .unwrap();
    assert_eq!(host_record.name, "Ada");
    assert_eq!(host_record.instruments, vec!["violin".to_string()]);

    joiner.leave_session().await;
    assert_eq!(host_manager.participants().await.len(), 1);
}

#[tokio::test]
async fn content_on_demand_returns_known_documents_and_none_for_unknown() {
    let world = World::new();
    let (host_manager, _) = world.manager("host-peer", online());
    let session_payload = host_manager
        .create_session(manifest(), documents(), CreateSessionOptions::new("Ada"))
        .await
        .unwrap();

    let (joiner, _) = world.manager("joiner-peer", online());
    joiner
        .join_session(session_payload, JoinSessionOptions::new("Grace"))
        .await
        .unwrap();

    let known = joiner
        .request_document_content(&DocumentId::from("song-1"))
        .await
        .unwrap();
    assert_eq!(known, Some(vec![0xab; 400]));

    // Unknown ids resolve to None well within the timeout, not an error.
    let unknown = timeout(
        Duration::from_secs(1),
        joiner.request_document_content(&DocumentId::from("song-99")),
    )
    .await
    .expect("unknown content request must resolve")
    .unwrap();
    assert_eq!(unknown, None);
}

#[tokio::test]
async fn content_requests_without_a_session_are_an_error() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    let error = manager
        .request_document_content(&DocumentId::from("song-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ScorelinkError::Session(SessionError::NoActiveSession)
    ));
}

#[tokio::test]
async fn oversized_avatars_are_rejected() {
    let world = World::new();
    let (manager, _) = world.manager("host-peer", online());
    let mut options = CreateSessionOptions::new("Ada");
    options.avatar = Some("x".repeat(64 * 1024));
    let error = manager
        .create_session(manifest(), documents(), options)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ScorelinkError::Session(SessionError::AvatarTooLarge { .. })
    ));
}

// ----------------------------------------------------------------------------
// Full Flow
// ----------------------------------------------------------------------------

#[tokio::test]
async fn full_qr_signaling_bootstrap_flow_delivers_app_and_documents() {
    let world = World::new();
    let (host_manager, backend) = world.manager("host-peer", online());
    let session_payload = host_manager
        .create_session(manifest(), documents(), bootstrap_options("Ada"))
        .await
        .unwrap();

    // The joiner scans the QR string.
    let scanned = payload::decode(&payload::encode(&session_payload).unwrap()).unwrap();
    assert!(!scanned.is_expired(scorelink_core::Timestamp::now()));

    // Signaling: the joining page publishes an offer on the session topic.
    let topic = format!("session/{}", scanned.session_id);
    let joiner_relay = world.relay_hub.client(PeerId::from("joiner-page"));
    let mut joiner_rx = joiner_relay.subscribe(&topic).await.unwrap();
    joiner_relay
        .publish(
            &topic,
            SignalEnvelope::Offer {
                from: PeerId::from("joiner-page"),
                sdp: "joiner-offer".into(),
            },
            None,
        )
        .await
        .unwrap();
    let answer = timeout(Duration::from_secs(5), joiner_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(answer, SignalEnvelope::Answer { .. }));

    // The engine reports an opened bootstrap data channel.
    let endpoint = backend.endpoints().created().remove(0);
    let (host_end, joiner_end) = MemoryChannel::pair(BOOTSTRAP_CHANNEL_LABEL);
    endpoint.emit(EndpointEvent::DataChannel(host_end));

    // The joining page pulls the app bundle, then the documents.
    let mut receiver = BootstrapReceiver::new(joiner_end).unwrap();
    let app = timeout(Duration::from_secs(5), receiver.request_app_bundle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app, bundle());
    let received_documents = timeout(Duration::from_secs(5), receiver.request_documents(None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received_documents, documents());

    host_manager.leave_session().await;
}
