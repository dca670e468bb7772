//! Scorelink session layer
//!
//! The stateful half of the P2P bootstrap protocol: the bootstrap host that
//! serves chunked, flow-controlled transfers; its joiner-side receiver; the
//! signaling bridge that turns relay offer/answer/ICE exchange into data
//! channels; the live-sync layer for presence and content-on-demand; and the
//! session manager that orchestrates all of it. The pure codecs live in
//! `scorelink-core`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod events;
pub mod host;
pub mod livesync;
pub mod manager;
pub mod memory;
pub mod receiver;
pub mod signaling;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{ChannelError, ChannelEvent, DataChannel, BOOTSTRAP_CHANNEL_LABEL};
pub use events::{EventBus, SessionEvent};
pub use host::BootstrapHost;
pub use livesync::{ContentProvider, LiveSyncTransport, LiveSyncUpdate, ParticipantState};
pub use manager::{
    BootstrapOptions, CreateSessionOptions, JoinSessionOptions, PlatformCapabilities, Session,
    SessionBackend, SessionManager, SessionState,
};
pub use receiver::{BootstrapReceiver, ReceivePhase};
pub use signaling::{
    ChannelSink, EndpointEvent, EndpointFactory, EndpointState, PeerEndpoint, SignalEnvelope,
    SignalingBridge, SignalingRelay,
};
