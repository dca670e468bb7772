//! QR/session payload codec
//!
//! A session payload is the compact descriptor a joiner scans before any data
//! moves: session identity, transport-specific connection info, a
//! denormalized library manifest for display, and (for bootstrap-capable
//! sessions) the app bundle hash and size estimates. The codec maps the
//! verbose shape to short keys, compacts the connection info by its tagged
//! union variant, and base64-encodes the JSON purely to minimize QR density.
//!
//! The compact form is a durable wire format shared with the joining page.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CodecError;
use crate::types::{DocumentId, PeerId, SessionId, Timestamp, TransportType};

/// Conservative practical capacity of one QR code after compact encoding.
pub const QR_PRACTICAL_CAPACITY: usize = 2000;

// ----------------------------------------------------------------------------
// Verbose Payload Model
// ----------------------------------------------------------------------------

/// One manifest row, shown to the joiner before any transfer happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: DocumentId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub instruments: Vec<String>,
}

/// Transport-specific connection info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConnectionInfo {
    #[serde(rename_all = "camelCase")]
    WebRtc {
        signaling_server: String,
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Bluetooth {
        service_uuid: String,
        characteristic_uuid: String,
        device_name: String,
    },
    #[serde(rename_all = "camelCase")]
    LocalNetwork {
        addresses: Vec<String>,
        port: u16,
        token: String,
    },
}

impl ConnectionInfo {
    pub fn transport_type(&self) -> TransportType {
        match self {
            ConnectionInfo::WebRtc { .. } => TransportType::WebRtc,
            ConnectionInfo::Bluetooth { .. } => TransportType::Bluetooth,
            ConnectionInfo::LocalNetwork { .. } => TransportType::LocalNetwork,
        }
    }
}

/// Bootstrap advertisement carried by bootstrap-capable payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapInfo {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_data_size: Option<u64>,
}

/// The full session descriptor exchanged via QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: SessionId,
    pub host_id: PeerId,
    pub host_name: String,
    pub connection: ConnectionInfo,
    pub manifest: Vec<ManifestEntry>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapInfo>,
}

impl SessionPayload {
    pub fn transport_type(&self) -> TransportType {
        self.connection.transport_type()
    }

    /// Whether the session's expiry has passed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Result of sizing a payload against the practical QR capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSize {
    pub bytes: usize,
    pub too_large: bool,
}

// ----------------------------------------------------------------------------
// Compact Wire Shapes
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct CompactPayload {
    s: String,
    t: String,
    h: String,
    n: String,
    c: Value,
    m: Vec<CompactManifestEntry>,
    ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ex: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bv: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ss: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct CompactManifestEntry {
    i: String,
    t: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<String>,
    n: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CompactWebRtc {
    s: String,
    r: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CompactBluetooth {
    u: String,
    c: String,
    d: String,
}

#[derive(Serialize, Deserialize)]
struct CompactLocalNetwork {
    a: Vec<String>,
    p: u16,
    t: String,
}

fn compact_connection(connection: &ConnectionInfo) -> Result<Value, CodecError> {
    let value = match connection {
        ConnectionInfo::WebRtc {
            signaling_server,
            room_id,
            password,
        } => serde_json::to_value(CompactWebRtc {
            s: signaling_server.clone(),
            r: room_id.clone(),
            p: password.clone(),
        })?,
        ConnectionInfo::Bluetooth {
            service_uuid,
            characteristic_uuid,
            device_name,
        } => serde_json::to_value(CompactBluetooth {
            u: service_uuid.clone(),
            c: characteristic_uuid.clone(),
            d: device_name.clone(),
        })?,
        ConnectionInfo::LocalNetwork {
            addresses,
            port,
            token,
        } => serde_json::to_value(CompactLocalNetwork {
            a: addresses.clone(),
            p: *port,
            t: token.clone(),
        })?,
    };
    Ok(value)
}

/// Re-read the transport discriminant before interpreting variant fields.
fn expand_connection(transport: TransportType, value: Value) -> Result<ConnectionInfo, CodecError> {
    let connection = match transport {
        TransportType::WebRtc => {
            let c: CompactWebRtc = serde_json::from_value(value)?;
            ConnectionInfo::WebRtc {
                signaling_server: c.s,
                room_id: c.r,
                password: c.p,
            }
        }
        TransportType::Bluetooth => {
            let c: CompactBluetooth = serde_json::from_value(value)?;
            ConnectionInfo::Bluetooth {
                service_uuid: c.u,
                characteristic_uuid: c.c,
                device_name: c.d,
            }
        }
        TransportType::LocalNetwork => {
            let c: CompactLocalNetwork = serde_json::from_value(value)?;
            ConnectionInfo::LocalNetwork {
                addresses: c.a,
                port: c.p,
                token: c.t,
            }
        }
    };
    Ok(connection)
}

// ----------------------------------------------------------------------------
// Encode / Decode
// ----------------------------------------------------------------------------

/// Encode a payload to the compact base64 string carried in a QR code.
pub fn encode(payload: &SessionPayload) -> Result<String, CodecError> {
    let compact = CompactPayload {
        s: payload.session_id.as_str().to_string(),
        t: payload.transport_type().as_str().to_string(),
        h: payload.host_id.as_str().to_string(),
        n: payload.host_name.clone(),
        c: compact_connection(&payload.connection)?,
        m: payload
            .manifest
            .iter()
            .map(|entry| CompactManifestEntry {
                i: entry.id.as_str().to_string(),
                t: entry.title.clone(),
                a: entry.artist.clone(),
                n: entry.instruments.clone(),
            })
            .collect(),
        ts: payload.created_at.as_millis(),
        ex: payload.expires_at.map(|ts| ts.as_millis()),
        bv: payload.bootstrap.as_ref().map(|b| b.version),
        bh: payload.bootstrap.as_ref().and_then(|b| b.bundle_hash.clone()),
        bs: payload.bootstrap.as_ref().and_then(|b| b.bundle_size),
        ss: payload.bootstrap.as_ref().and_then(|b| b.song_data_size),
    };
    let json = serde_json::to_string(&compact)?;
    Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
}

/// Exact inverse of `encode`.
pub fn decode(compact_string: &str) -> Result<SessionPayload, CodecError> {
    let json = URL_SAFE_NO_PAD.decode(compact_string.trim())?;
    let compact: CompactPayload = serde_json::from_slice(&json)?;
    let transport =
        TransportType::parse(&compact.t).ok_or(CodecError::UnknownTransport(compact.t.clone()))?;
    let connection = expand_connection(transport, compact.c)?;
    Ok(SessionPayload {
        session_id: SessionId::new(compact.s),
        host_id: PeerId::new(compact.h),
        host_name: compact.n,
        connection,
        manifest: compact
            .m
            .into_iter()
            .map(|entry| ManifestEntry {
                id: DocumentId::new(entry.i),
                title: entry.t,
                artist: entry.a,
                instruments: entry.n,
            })
            .collect(),
        created_at: Timestamp::new(compact.ts),
        expires_at: compact.ex.map(Timestamp::new),
        bootstrap: compact.bv.map(|version| BootstrapInfo {
            version,
            bundle_hash: compact.bh,
            bundle_size: compact.bs,
            song_data_size: compact.ss,
        }),
    })
}

/// Encode and measure a payload against a QR capacity.
pub fn estimate_size(payload: &SessionPayload, capacity: usize) -> Result<PayloadSize, CodecError> {
    let bytes = encode(payload)?.len();
    Ok(PayloadSize {
        bytes,
        too_large: bytes > capacity,
    })
}

// ----------------------------------------------------------------------------
// Join URL
// ----------------------------------------------------------------------------

/// Append the encoded payload as a URL fragment for the join page.
pub fn join_url(payload: &SessionPayload, base: &str) -> Result<String, CodecError> {
    Ok(format!("{}#{}", base.trim_end_matches('#'), encode(payload)?))
}

/// Recover a payload from a join URL's fragment.
pub fn payload_from_url(url: &str) -> Result<SessionPayload, CodecError> {
    let fragment = url
        .split_once('#')
        .map(|(_, fragment)| fragment)
        .ok_or_else(|| CodecError::InvalidPayload("join URL has no fragment".into()))?;
    decode(fragment)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
