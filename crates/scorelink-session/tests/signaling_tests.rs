//! Signaling bridge tests
//!
//! Offer handling, ICE trickle, channel routing by label, per-peer teardown,
//! relay reconnection, and retry exhaustion, all over the in-memory relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use scorelink_core::types::{PeerId, SessionId};
use scorelink_core::SignalingConfig;
use scorelink_session::memory::{MemoryChannel, MemoryEndpointFactory, MemoryRelay, MemoryRelayHub};
use scorelink_session::{
    ChannelSink, DataChannel, EndpointEvent, EndpointState, SignalEnvelope, SignalingBridge,
    BOOTSTRAP_CHANNEL_LABEL,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

type SinkLog = Arc<Mutex<Vec<(String, PeerId)>>>;

struct Rig {
    bridge: SignalingBridge,
    errors: mpsc::UnboundedReceiver<scorelink_core::SignalingError>,
    hub: Arc<MemoryRelayHub>,
    relay: Arc<MemoryRelay>,
    factory: Arc<MemoryEndpointFactory>,
    sink_log: SinkLog,
    topic: String,
}

fn rig() -> Rig {
    let hub = MemoryRelayHub::new();
    let relay = hub.client(PeerId::from("host"));
    let factory = MemoryEndpointFactory::new();
    let sink_log: SinkLog = Arc::new(Mutex::new(Vec::new()));
    let sink: ChannelSink = {
        let log = sink_log.clone();
        Arc::new(move |channel, peer_id| {
            log.lock()
                .unwrap()
                .push((channel.label().to_string(), peer_id));
        })
    };
    let (bridge, errors) = SignalingBridge::new(
        SessionId::from("s1"),
        PeerId::from("host"),
        SignalingConfig::testing(),
        relay.clone(),
        factory.clone(),
        sink,
    );
    Rig {
        bridge,
        errors,
        hub,
        relay,
        factory,
        sink_log,
        topic: "session/s1".to_string(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ----------------------------------------------------------------------------
// Offer / Answer / ICE
// ----------------------------------------------------------------------------

#[tokio::test]
async fn offer_is_answered_and_bootstrap_channels_reach_the_sink() {
    let rig = rig();
    rig.bridge.connect().await.unwrap();

    let joiner = rig.hub.client(PeerId::from("joiner-1"));
    let mut joiner_rx = joiner.subscribe(&rig.topic).await.unwrap();
    joiner
        .publish(
            &rig.topic,
            SignalEnvelope::Offer {
                from: PeerId::from("joiner-1"),
                sdp: "offer-sdp".into(),
            },
            None,
        )
        .await
        .unwrap();

    let answer = timeout(Duration::from_secs(5), joiner_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        answer,
        SignalEnvelope::Answer {
            from: PeerId::from("host"),
            sdp: "answer:offer-sdp".into(),
        }
    );
    assert_eq!(rig.bridge.peer_count(), 1);

    // Inbound ICE reaches the endpoint.
    joiner
        .publish(
            &rig.topic,
            SignalEnvelope::Ice {
                from: PeerId::from("joiner-1"),
                candidate: "cand-1".into(),
            },
            None,
        )
        .await
        .unwrap();
    settle().await;
    let endpoint = rig.factory.created().remove(0);
    assert_eq!(endpoint.applied_candidates(), vec!["cand-1".to_string()]);

    // Locally gathered candidates trickle back to that peer.
    endpoint.emit(EndpointEvent::IceCandidate("host-cand".into()));
    let trickled = timeout(Duration::from_secs(5), joiner_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        trickled,
        SignalEnvelope::Ice {
            from: PeerId::from("host"),
            candidate: "host-cand".into(),
        }
    );

    // Only bootstrap-labeled channels are forwarded.
    let (bootstrap_channel, _keep_a) = MemoryChannel::pair(BOOTSTRAP_CHANNEL_LABEL);
    let (chat_channel, _keep_b) = MemoryChannel::pair("chat");
    endpoint.emit(EndpointEvent::DataChannel(bootstrap_channel));
    endpoint.emit(EndpointEvent::DataChannel(chat_channel));
    settle().await;
    let seen = rig.sink_log.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(
            BOOTSTRAP_CHANNEL_LABEL.to_string(),
            PeerId::from("joiner-1")
        )]
    );
}

#[tokio::test]
async fn ice_from_unknown_peer_is_ignored() {
    let rig = rig();
    rig.bridge.connect().await.unwrap();

    let stranger = rig.hub.client(PeerId::from("stranger"));
    stranger
        .publish(
            &rig.topic,
            SignalEnvelope::Ice {
                from: PeerId::from("stranger"),
                candidate: "stale".into(),
            },
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(rig.bridge.peer_count(), 0);
    assert!(rig.factory.created().is_empty());
}

#[tokio::test]
async fn failed_endpoint_tears_down_only_that_peer() {
    let rig = rig();
    rig.bridge.connect().await.unwrap();

    for name in ["joiner-1", "joiner-2"] {
        let joiner = rig.hub.client(PeerId::from(name));
        joiner
            .publish(
                &rig.topic,
                SignalEnvelope::Offer {
                    from: PeerId::from(name),
                    sdp: format!("offer-{name}"),
                },
                None,
            )
            .await
            .unwrap();
    }
    settle().await;
    assert_eq!(rig.bridge.peer_count(), 2);

    let endpoints = rig.factory.created();
    let failing = endpoints
        .iter()
        .find(|endpoint| endpoint.peer_id() == &PeerId::from("joiner-1"))
        .unwrap();
    failing.emit(EndpointEvent::StateChanged(EndpointState::Failed));
    settle().await;

    assert_eq!(rig.bridge.peer_count(), 1);
    assert!(failing.is_closed());
    let survivor = endpoints
        .iter()
        .find(|endpoint| endpoint.peer_id() == &PeerId::from("joiner-2"))
        .unwrap();
    assert!(!survivor.is_closed());
}

// ----------------------------------------------------------------------------
// Relay Loss and Destroy
// ----------------------------------------------------------------------------

#[tokio::test]
async fn relay_loss_is_survived_by_reconnecting() {
    let rig = rig();
    rig.bridge.connect().await.unwrap();

    // Sever every subscription; the bridge's dispatch stream ends and it
    // resubscribes with backoff.
    rig.hub.drop_topic(&rig.topic);
    settle().await;

    let joiner = rig.hub.client(PeerId::from("joiner-1"));
    joiner
        .publish(
            &rig.topic,
            SignalEnvelope::Offer {
                from: PeerId::from("joiner-1"),
                sdp: "offer-after-reconnect".into(),
            },
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(rig.bridge.peer_count(), 1);
}

#[tokio::test]
async fn reconnect_exhaustion_surfaces_a_bridge_error() {
    let mut rig = rig();
    rig.bridge.connect().await.unwrap();

    rig.relay.set_fail_connect(true);
    rig.hub.drop_topic(&rig.topic);

    let error = timeout(Duration::from_secs(5), rig.errors.recv())
        .await
        .expect("bridge error should surface")
        .unwrap();
    assert!(matches!(
        error,
        scorelink_core::SignalingError::RetriesExhausted { attempts: 2 }
    ));
}

#[tokio::test]
async fn destroy_is_idempotent_and_stops_offer_handling() {
    let rig = rig();
    rig.bridge.connect().await.unwrap();

    let joiner = rig.hub.client(PeerId::from("joiner-1"));
    joiner
        .publish(
            &rig.topic,
            SignalEnvelope::Offer {
                from: PeerId::from("joiner-1"),
                sdp: "offer".into(),
            },
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(rig.bridge.peer_count(), 1);
    let endpoint = rig.factory.created().remove(0);

    rig.bridge.destroy().await;
    rig.bridge.destroy().await;
    assert_eq!(rig.bridge.peer_count(), 0);
    assert!(endpoint.is_closed());

    // Offers after destroy never create endpoints.
    joiner
        .publish(
            &rig.topic,
            SignalEnvelope::Offer {
                from: PeerId::from("joiner-2"),
                sdp: "late-offer".into(),
            },
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(rig.factory.created().len(), 1);
}
