//! Core types for the scorelink bootstrap protocol
//!
//! This module defines the fundamental identifiers used throughout the
//! protocol, using newtype patterns for semantic validation and type safety.

use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Peer Identifier
// ----------------------------------------------------------------------------

/// Identity of a peer as assigned during signaling.
///
/// Peer ids originate outside this subsystem (the joining page picks one
/// before it has any application code), so they are free-form strings rather
/// than fixed-width binary ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random peer id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Unique identifier for a sharing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ----------------------------------------------------------------------------
// Document Identifier
// ----------------------------------------------------------------------------

/// Identifier of a shareable document (a song's CRDT snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Transfer Identifier
// ----------------------------------------------------------------------------

/// Unique identifier for one chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Duration since another timestamp (zero if `other` is later).
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Transport Type
// ----------------------------------------------------------------------------

/// Transport carrying a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    WebRtc,
    Bluetooth,
    LocalNetwork,
}

impl TransportType {
    /// Wire tag used by the compact QR payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::WebRtc => "webrtc",
            TransportType::Bluetooth => "bluetooth",
            TransportType::LocalNetwork => "local-network",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "webrtc" => Some(TransportType::WebRtc),
            "bluetooth" => Some(TransportType::Bluetooth),
            "local-network" => Some(TransportType::LocalNetwork),
            _ => None,
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Library Scope
// ----------------------------------------------------------------------------

/// Which part of the host's library a session shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibraryScope {
    Full,
    Selected,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_tags_round_trip() {
        for transport in [
            TransportType::WebRtc,
            TransportType::Bluetooth,
            TransportType::LocalNetwork,
        ] {
            assert_eq!(TransportType::parse(transport.as_str()), Some(transport));
        }
        assert_eq!(TransportType::parse("carrier-pigeon"), None);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let base = Timestamp::new(1_000);
        let later = base.add(Duration::from_secs(2));
        assert_eq!(later.as_millis(), 3_000);
        assert_eq!(later.duration_since(base), Duration::from_secs(2));
        assert_eq!(base.duration_since(later), Duration::ZERO);
    }

    #[test]
    fn test_random_ids_are_unique() {
        assert_ne!(PeerId::random(), PeerId::random());
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
