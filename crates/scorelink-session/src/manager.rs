//! Session manager
//!
//! Top-level orchestration: creates and joins ephemeral sharing sessions,
//! selects a transport, wires the bootstrap host into a signaling bridge,
//! connects the live-sync transport, and tears everything down on leave.
//! At most one non-idle session per manager instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scorelink_core::compress::Compression;
use scorelink_core::config::{SessionConfig, SignalingConfig, TransferConfig};
use scorelink_core::errors::{ScorelinkError, SessionError};
use scorelink_core::payload::{self, ConnectionInfo, ManifestEntry, SessionPayload};
use scorelink_core::types::{
    DocumentId, LibraryScope, PeerId, SessionId, Timestamp, TransportType,
};

use crate::events::{EventBus, SessionEvent};
use crate::host::BootstrapHost;
use crate::livesync::{
    self, ContentProvider, LiveSyncTransport, LiveSyncUpdate, ParticipantState,
};
use crate::signaling::{ChannelSink, EndpointFactory, SignalingBridge, SignalingRelay};

// ----------------------------------------------------------------------------
// Platform Capabilities
// ----------------------------------------------------------------------------

/// What the current platform can do, probed once by the embedding
/// application and passed in rather than sniffed at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub network_reachable: bool,
    pub bluetooth_capable: bool,
}

impl PlatformCapabilities {
    /// Transport priority: network → WebRTC, else Bluetooth, else the
    /// local-network fallback.
    pub fn detect_transport(&self) -> TransportType {
        if self.network_reachable {
            TransportType::WebRtc
        } else if self.bluetooth_capable {
            TransportType::Bluetooth
        } else {
            TransportType::LocalNetwork
        }
    }

    pub fn supports(&self, transport: TransportType) -> bool {
        match transport {
            TransportType::WebRtc => self.network_reachable,
            TransportType::Bluetooth => self.bluetooth_capable,
            TransportType::LocalNetwork => true,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Backend Seam
// ----------------------------------------------------------------------------

/// Platform services the manager composes: relay and endpoint engines for
/// signaling, connection descriptors, and the live-sync transport.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Transport-specific connection info to advertise for a new session.
    fn connection_info(
        &self,
        transport: TransportType,
        session_id: &SessionId,
    ) -> Result<ConnectionInfo, SessionError>;

    fn signaling_relay(&self, session_id: &SessionId) -> Arc<dyn SignalingRelay>;

    fn endpoint_factory(&self) -> Arc<dyn EndpointFactory>;

    async fn connect_live_sync(
        &self,
        session: &Session,
    ) -> Result<Arc<dyn LiveSyncTransport>, SessionError>;
}

// ----------------------------------------------------------------------------
// Session Model
// ----------------------------------------------------------------------------

/// Metadata for one sharing session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub host_id: PeerId,
    pub host_name: String,
    pub transport: TransportType,
    pub connection: ConnectionInfo,
    pub library_scope: LibraryScope,
    pub document_ids: Vec<DocumentId>,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

/// Manager role within the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Hosting,
    Joined,
}

// ----------------------------------------------------------------------------
// Options
// ----------------------------------------------------------------------------

/// Bootstrap material for a new session.
pub struct BootstrapOptions {
    /// Raw (uncompressed) app bundle bytes.
    pub app_bundle: Vec<u8>,
    /// How the bundle travels; the advertised hash always covers the raw
    /// bytes.
    pub compression: Compression,
}

/// Options for `create_session`.
pub struct CreateSessionOptions {
    pub host_name: String,
    /// Explicit transport; auto-detected from capabilities when absent.
    pub transport: Option<TransportType>,
    /// Explicit connection info; asked from the backend when absent.
    pub connection: Option<ConnectionInfo>,
    pub library_scope: LibraryScope,
    pub ttl: Option<std::time::Duration>,
    pub bootstrap: Option<BootstrapOptions>,
    pub instruments: Vec<String>,
    pub avatar: Option<String>,
}

impl CreateSessionOptions {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            transport: None,
            connection: None,
            library_scope: LibraryScope::Full,
            ttl: None,
            bootstrap: None,
            instruments: Vec::new(),
            avatar: None,
        }
    }
}

/// Options for `join_session`.
pub struct JoinSessionOptions {
    pub display_name: String,
    pub instruments: Vec<String>,
    pub avatar: Option<String>,
}

impl JoinSessionOptions {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            instruments: Vec::new(),
            avatar: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

struct ActiveSession {
    session: Session,
    state: SessionState,
    host: Option<Arc<BootstrapHost>>,
    bridge: Option<SignalingBridge>,
    live_sync: Option<Arc<dyn LiveSyncTransport>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Orchestrates sessions: `idle → hosting | joining → active → idle`.
pub struct SessionManager {
    config: SessionConfig,
    transfer_config: TransferConfig,
    signaling_config: SignalingConfig,
    capabilities: PlatformCapabilities,
    backend: Arc<dyn SessionBackend>,
    events: EventBus,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        transfer_config: TransferConfig,
        signaling_config: SignalingConfig,
        capabilities: PlatformCapabilities,
        backend: Arc<dyn SessionBackend>,
    ) -> Self {
        Self {
            config,
            transfer_config,
            signaling_config,
            capabilities,
            backend,
            events: EventBus::default(),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.state)
            .unwrap_or(SessionState::Idle)
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Create and start hosting a session. Any existing session is torn
    /// down first. Returns the QR-ready payload.
    pub async fn create_session(
        &self,
        manifest: Vec<ManifestEntry>,
        documents: Vec<(DocumentId, Vec<u8>)>,
        options: CreateSessionOptions,
    ) -> Result<SessionPayload, ScorelinkError> {
        self.leave_session().await;

        let presence = ParticipantState {
            name: options.host_name.clone(),
            avatar: options.avatar.clone(),
            instruments: options.instruments.clone(),
            is_host: true,
            joined_at: Timestamp::now(),
        };
        presence.validate(self.config.avatar_max_bytes)?;

        let transport = match options.transport {
            Some(explicit) => {
                if !self.capabilities.supports(explicit) {
                    return Err(SessionError::TransportUnavailable {
                        transport: explicit,
                    }
                    .into());
                }
                explicit
            }
            None => self.capabilities.detect_transport(),
        };

        let session_id = SessionId::random();
        let created_at = Timestamp::now();
        let expires_at = options
            .ttl
            .or(self.config.default_ttl)
            .map(|ttl| created_at.add(ttl));
        let connection = match options.connection {
            Some(connection) => connection,
            None => self.backend.connection_info(transport, &session_id)?,
        };
        if connection.transport_type() != transport {
            return Err(SessionError::Configuration(format!(
                "connection info is for {}, session transport is {}",
                connection.transport_type(),
                transport
            ))
            .into());
        }

        let session = Session {
            session_id: session_id.clone(),
            host_id: self.backend.local_peer_id(),
            host_name: options.host_name.clone(),
            transport,
            connection: connection.clone(),
            library_scope: options.library_scope,
            document_ids: documents.iter().map(|(id, _)| id.clone()).collect(),
            created_at,
            expires_at,
        };

        // Build the bootstrap host before opening anything so the payload
        // can be sized (and rejected) without half-opened transports.
        let host = match &options.bootstrap {
            Some(bootstrap) => {
                let host = Arc::new(BootstrapHost::new(self.transfer_config.clone()));
                host.set_app_bundle(&bootstrap.app_bundle, bootstrap.compression)?;
                host.set_documents(documents.clone());
                Some(host)
            }
            None => None,
        };

        let session_payload = SessionPayload {
            session_id: session_id.clone(),
            host_id: session.host_id.clone(),
            host_name: session.host_name.clone(),
            connection,
            manifest,
            created_at,
            expires_at,
            bootstrap: host.as_ref().map(|host| host.bootstrap_info()),
        };
        let size = payload::estimate_size(&session_payload, self.config.qr_capacity_bytes)?;
        if size.too_large {
            return Err(SessionError::PayloadTooLarge {
                bytes: size.bytes,
                limit: self.config.qr_capacity_bytes,
            }
            .into());
        }

        let mut tasks = Vec::new();

        // Signaling bridge hands bootstrap channels straight to the host.
        let bridge = match &host {
            Some(host) => {
                let sink_host = host.clone();
                let sink: ChannelSink = Arc::new(move |channel, peer_id| {
                    sink_host.handle_data_channel(channel, peer_id);
                });
                let (bridge, mut bridge_errors) = SignalingBridge::new(
                    session_id.clone(),
                    session.host_id.clone(),
                    self.signaling_config.clone(),
                    self.backend.signaling_relay(&session_id),
                    self.backend.endpoint_factory(),
                    sink,
                );
                bridge.connect().await?;
                let bus = self.events.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(error) = bridge_errors.recv().await {
                        bus.emit(SessionEvent::BridgeError {
                            message: error.to_string(),
                        });
                    }
                }));
                Some(bridge)
            }
            None => None,
        };

        let connected = async {
            let live_sync = self.backend.connect_live_sync(&session).await?;
            Self::publish_presence(live_sync.as_ref(), &presence).await?;
            Ok::<_, SessionError>(live_sync)
        }
        .await;
        let live_sync = match connected {
            Ok(live_sync) => live_sync,
            Err(error) => {
                // Roll back the half-built session before surfacing the error.
                for task in tasks {
                    task.abort();
                }
                if let Some(bridge) = &bridge {
                    bridge.destroy().await;
                }
                if let Some(host) = &host {
                    host.destroy().await;
                }
                return Err(error.into());
            }
        };
        tasks.push(self.spawn_participant_watcher(live_sync.clone()));
        let snapshot: HashMap<DocumentId, Vec<u8>> = documents.into_iter().collect();
        let provider: ContentProvider = Arc::new(move |id: &DocumentId| snapshot.get(id).cloned());
        tasks.push(livesync::spawn_content_responder(live_sync.clone(), provider));

        *self.active.lock().await = Some(ActiveSession {
            session,
            state: SessionState::Hosting,
            host,
            bridge,
            live_sync: Some(live_sync),
            tasks,
        });
        info!(session = %session_id, %transport, "session created");
        self.events.emit(SessionEvent::Created { session_id });
        Ok(session_payload)
    }

    /// Join a session from a scanned payload. Expiry is rejected before any
    /// transport is opened.
    pub async fn join_session(
        &self,
        session_payload: SessionPayload,
        options: JoinSessionOptions,
    ) -> Result<(), ScorelinkError> {
        if session_payload.is_expired(Timestamp::now()) {
            return Err(SessionError::Expired {
                expired_at: session_payload.expires_at.unwrap_or(Timestamp::now()),
            }
            .into());
        }
        self.leave_session().await;

        let presence = ParticipantState {
            name: options.display_name.clone(),
            avatar: options.avatar.clone(),
            instruments: options.instruments.clone(),
            is_host: false,
            joined_at: Timestamp::now(),
        };
        presence.validate(self.config.avatar_max_bytes)?;

        let session = Session {
            session_id: session_payload.session_id.clone(),
            host_id: session_payload.host_id.clone(),
            host_name: session_payload.host_name.clone(),
            transport: session_payload.transport_type(),
            connection: session_payload.connection.clone(),
            library_scope: LibraryScope::Selected,
            document_ids: session_payload
                .manifest
                .iter()
                .map(|entry| entry.id.clone())
                .collect(),
            created_at: session_payload.created_at,
            expires_at: session_payload.expires_at,
        };

        let live_sync = self.backend.connect_live_sync(&session).await?;
        if let Err(error) = Self::publish_presence(live_sync.as_ref(), &presence).await {
            live_sync.close().await;
            return Err(error.into());
        }
        let tasks = vec![self.spawn_participant_watcher(live_sync.clone())];

        let session_id = session.session_id.clone();
        *self.active.lock().await = Some(ActiveSession {
            session,
            state: SessionState::Joined,
            host: None,
            bridge: None,
            live_sync: Some(live_sync),
            tasks,
        });
        info!(session = %session_id, "session joined");
        self.events.emit(SessionEvent::Joined { session_id });
        Ok(())
    }

    /// Tear down whatever is active. Idempotent; emits `Left` only when a
    /// session was actually active. Teardown is best-effort per resource.
    pub async fn leave_session(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        let session_id = active.session.session_id.clone();
        for task in active.tasks {
            task.abort();
        }
        if let Some(host) = active.host {
            host.destroy().await;
        }
        if let Some(bridge) = active.bridge {
            bridge.destroy().await;
        }
        if let Some(live_sync) = active.live_sync {
            live_sync.close().await;
        }
        info!(session = %session_id, "session left");
        self.events.emit(SessionEvent::Left { session_id });
    }

    /// Alias for teardown when the manager itself goes away.
    pub async fn destroy(&self) {
        self.leave_session().await;
    }

    /// Ask the session for one document's content, bounded by the
    /// configured timeout. `None` means "not currently available".
    pub async fn request_document_content(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Vec<u8>>, ScorelinkError> {
        let live_sync = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .and_then(|active| active.live_sync.clone())
                .ok_or(SessionError::NoActiveSession)?
        };
        Ok(livesync::request_content(
            &live_sync,
            document_id,
            self.config.content_request_timeout,
        )
        .await?)
    }

    /// Current participant list derived from live-sync state records.
    pub async fn participants(&self) -> Vec<ParticipantState> {
        let active = self.active.lock().await;
        match active.as_ref().and_then(|active| active.live_sync.as_ref()) {
            Some(live_sync) => livesync::participants(live_sync.as_ref()),
            None => Vec::new(),
        }
    }

    async fn publish_presence(
        live_sync: &dyn LiveSyncTransport,
        state: &ParticipantState,
    ) -> Result<(), SessionError> {
        let value = serde_json::to_value(state)
            .map_err(|e| SessionError::LiveSync(format!("presence encoding failed: {e}")))?;
        live_sync.set_local_state(value).await
    }

    fn spawn_participant_watcher(&self, live_sync: Arc<dyn LiveSyncTransport>) -> JoinHandle<()> {
        let bus = self.events.clone();
        let mut updates = live_sync.updates();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(LiveSyncUpdate::ParticipantsChanged) => {
                        bus.emit(SessionEvent::ParticipantsChanged);
                    }
                    Ok(LiveSyncUpdate::SharedChanged { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "participant watcher lagged");
                        bus.emit(SessionEvent::ParticipantsChanged);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(active) = self.active.try_lock() {
            if active.is_some() {
                warn!("session manager dropped with an active session; call destroy() first");
            }
        }
    }
}
