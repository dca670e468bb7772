//! Configuration for the bootstrap and session layers
//!
//! The chunk size and backpressure threshold are deliberately configuration
//! rather than protocol constants, so they can be tuned without a wire change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Transfer Configuration
// ----------------------------------------------------------------------------

/// Configuration for chunked transfers over a data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum chunk size in bytes. 16 KiB is safe across data-channel
    /// implementations.
    pub chunk_size: usize,
    /// Outbound buffered-amount level at which sending pauses.
    pub backpressure_threshold: usize,
    /// Chunks between informational transfer-progress messages (0 disables).
    pub progress_interval: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            backpressure_threshold: 256 * 1024,
            progress_interval: 8,
        }
    }
}

impl TransferConfig {
    /// Small sizes so tests exercise pause/resume with little data.
    pub fn testing() -> Self {
        Self {
            chunk_size: 32,
            backpressure_threshold: 64,
            progress_interval: 4,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk size cannot be zero".into());
        }
        if self.backpressure_threshold < self.chunk_size {
            return Err("backpressure threshold must be at least one chunk".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Signaling Configuration
// ----------------------------------------------------------------------------

/// Configuration for relay reconnection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Maximum reconnect attempts after an unexpected relay close.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the reconnect delay.
    pub max_backoff: Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl SignalingConfig {
    pub fn testing() -> Self {
        Self {
            max_reconnect_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err("backoff multiplier must be at least 1.0".into());
        }
        if self.initial_backoff > self.max_backoff {
            return Err("initial backoff cannot exceed max backoff".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for session lifecycle and the live-sync layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a content-on-demand request waits before resolving to none.
    pub content_request_timeout: Duration,
    /// Practical capacity of a single QR code after compact encoding.
    pub qr_capacity_bytes: usize,
    /// Largest accepted presence avatar (data-URL string bytes).
    pub avatar_max_bytes: usize,
    /// Default session lifetime when the creator does not choose one.
    pub default_ttl: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            content_request_timeout: Duration::from_secs(10),
            qr_capacity_bytes: 2000,
            avatar_max_bytes: 5 * 1024,
            default_ttl: None,
        }
    }
}

impl SessionConfig {
    pub fn testing() -> Self {
        Self {
            content_request_timeout: Duration::from_millis(200),
            qr_capacity_bytes: 2000,
            avatar_max_bytes: 5 * 1024,
            default_ttl: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.content_request_timeout.is_zero() {
            return Err("content request timeout cannot be zero".into());
        }
        if self.qr_capacity_bytes == 0 {
            return Err("QR capacity cannot be zero".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
