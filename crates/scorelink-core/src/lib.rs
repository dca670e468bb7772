//! Scorelink core protocol
//!
//! Codecs and the shared contract for the P2P bootstrap and session-transfer
//! protocol: chunking and content hashing, the document batch format, the
//! control-message taxonomy, compression variants, and the QR session
//! payload codec. Everything here is pure data transformation; the stateful
//! host, signaling, and session layers live in `scorelink-session`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod batch;
pub mod chunk;
pub mod compress;
pub mod config;
pub mod errors;
pub mod payload;
pub mod protocol;
#[cfg(feature = "qr-generation")]
pub mod qr;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use compress::Compression;
pub use config::{SessionConfig, SignalingConfig, TransferConfig};
pub use errors::{
    CodecError, Result, ScorelinkError, SessionError, SignalingError, TransferError,
};
pub use payload::{
    BootstrapInfo, ConnectionInfo, ManifestEntry, PayloadSize, SessionPayload,
    QR_PRACTICAL_CAPACITY,
};
pub use protocol::{ContentType, ControlMessage, ErrorCode, PROTOCOL_VERSION};
pub use types::{
    DocumentId, LibraryScope, PeerId, SessionId, Timestamp, TransferId, TransportType,
};
