//! Live-sync layer
//!
//! Post-bootstrap conveniences carried over the ordinary collaboration
//! transport: per-participant presence records and a best-effort
//! content-on-demand exchange over a shared key/value map. Delivery is not
//! guaranteed; a timed-out request means "not currently available", never a
//! hard error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use scorelink_core::errors::SessionError;
use scorelink_core::types::{DocumentId, Timestamp};

// ----------------------------------------------------------------------------
// Live Sync Transport Seam
// ----------------------------------------------------------------------------

/// Change notifications from the live-sync transport.
#[derive(Debug, Clone)]
pub enum LiveSyncUpdate {
    /// A participant joined, left, or changed its state record.
    ParticipantsChanged,
    /// A shared-map key changed.
    SharedChanged { key: String },
}

/// A connected shared-state transport (the CRDT awareness channel, a GATT
/// provider, or an in-memory hub in tests).
#[async_trait]
pub trait LiveSyncTransport: Send + Sync {
    /// Publish this participant's state record.
    async fn set_local_state(&self, state: Value) -> Result<(), SessionError>;

    /// Write a shared-map entry visible to all participants.
    async fn shared_put(&self, key: &str, value: Value) -> Result<(), SessionError>;

    fn shared_get(&self, key: &str) -> Option<Value>;

    /// All currently-known per-participant state records.
    fn participant_states(&self) -> Vec<Value>;

    /// Subscribe to change notifications.
    fn updates(&self) -> broadcast::Receiver<LiveSyncUpdate>;

    async fn close(&self);
}

// ----------------------------------------------------------------------------
// Presence
// ----------------------------------------------------------------------------

/// Presence record published by each connected participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    pub name: String,
    /// Small thumbnail avatar as a data URL; capped to keep awareness
    /// payloads cheap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub instruments: Vec<String>,
    pub is_host: bool,
    pub joined_at: Timestamp,
}

impl ParticipantState {
    pub fn validate(&self, avatar_max_bytes: usize) -> Result<(), SessionError> {
        if let Some(avatar) = &self.avatar {
            if avatar.len() > avatar_max_bytes {
                return Err(SessionError::AvatarTooLarge {
                    limit: avatar_max_bytes,
                });
            }
        }
        Ok(())
    }
}

/// Read the participant list, skipping records that fail to parse.
pub fn participants(transport: &dyn LiveSyncTransport) -> Vec<ParticipantState> {
    transport
        .participant_states()
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(error) => {
                debug!(error = %error, "skipping malformed participant state");
                None
            }
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Content on Demand
// ----------------------------------------------------------------------------

const CONTENT_REQUEST_PREFIX: &str = "content-request/";
const CONTENT_RESPONSE_PREFIX: &str = "content-response/";

/// Host-side source of document content for live requests.
pub type ContentProvider = Arc<dyn Fn(&DocumentId) -> Option<Vec<u8>> + Send + Sync>;

/// Ask the session for one document's content and wait up to `timeout`.
///
/// Resolves to `None` on timeout or when the host has nothing for the id:
/// "not currently available", not an error.
pub async fn request_content(
    transport: &Arc<dyn LiveSyncTransport>,
    document_id: &DocumentId,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, SessionError> {
    let request_id = Uuid::new_v4();
    let response_key = format!("{CONTENT_RESPONSE_PREFIX}{request_id}");
    let mut updates = transport.updates();
    transport
        .shared_put(
            &format!("{CONTENT_REQUEST_PREFIX}{request_id}"),
            serde_json::json!({ "documentId": document_id }),
        )
        .await?;

    let wait = async {
        loop {
            if let Some(value) = transport.shared_get(&response_key) {
                return decode_content(&value);
            }
            match updates.recv().await {
                Ok(LiveSyncUpdate::SharedChanged { key }) if key == response_key => {
                    if let Some(value) = transport.shared_get(&response_key) {
                        return decode_content(&value);
                    }
                }
                Ok(_) => {}
                // Missed notifications; re-check on the next pass.
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                // Transport torn down: resolve, don't hang.
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(content) => Ok(content),
        Err(_) => {
            debug!(%document_id, "content request timed out");
            Ok(None)
        }
    }
}

fn decode_content(value: &Value) -> Option<Vec<u8>> {
    let text = value.as_str()?;
    BASE64.decode(text).ok()
}

/// Watch the shared map for content requests and answer them from
/// `provider`. Unknown ids are answered with an explicit null so requesters
/// resolve promptly instead of waiting out their timeout.
pub fn spawn_content_responder(
    transport: Arc<dyn LiveSyncTransport>,
    provider: ContentProvider,
) -> JoinHandle<()> {
    let mut updates = transport.updates();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(LiveSyncUpdate::SharedChanged { key }) => {
                    let Some(request_id) = key.strip_prefix(CONTENT_REQUEST_PREFIX) else {
                        continue;
                    };
                    let response_key = format!("{CONTENT_RESPONSE_PREFIX}{request_id}");
                    if transport.shared_get(&response_key).is_some() {
                        continue;
                    }
                    let Some(request) = transport.shared_get(&key) else {
                        continue;
                    };
                    let document_id = request
                        .get("documentId")
                        .and_then(Value::as_str)
                        .map(DocumentId::from);
                    let response = document_id
                        .as_ref()
                        .and_then(|id| provider(id))
                        .map(|bytes| Value::String(BASE64.encode(bytes)))
                        .unwrap_or(Value::Null);
                    if let Err(error) = transport.shared_put(&response_key, response).await {
                        warn!(error = %error, "content response write failed");
                    }
                }
                Ok(LiveSyncUpdate::ParticipantsChanged) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "content responder lagged behind updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
