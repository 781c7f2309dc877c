//! Gateway configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::storage::ConfigError;

/// Default keepalive ping interval (15 s)
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 15_000;

/// Time allowed for the remote connect + authentication to reach ready (20 s)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Bytes returned by a preview when the client does not ask for a length
pub const DEFAULT_PREVIEW_LENGTH: usize = 4000;

/// Upload chunk size; one progress event is emitted per chunk
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Consecutive keepalive timeouts before the connection is declared dead
/// 15s × 2 = dead link detected within 30s
pub const DEFAULT_KEEPALIVE_FAILURE_THRESHOLD: u32 = 2;

/// Largest inbound WebSocket message accepted (uploads travel inline as base64)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listen address for the WebSocket server
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared secret clients must send as their first frame (None = open gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Remote connect + authentication deadline (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Keepalive interval used when the client does not send one (0 = disabled)
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Consecutive keepalive timeouts tolerated before teardown
    #[serde(default = "default_keepalive_failure_threshold")]
    pub keepalive_failure_threshold: u32,

    /// Upload chunk size in bytes
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,

    /// Preview length used when the client does not send one
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,

    /// Maximum inbound WebSocket message size in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_keepalive_failure_threshold() -> u32 {
    DEFAULT_KEEPALIVE_FAILURE_THRESHOLD
}

fn default_upload_chunk_size() -> usize {
    DEFAULT_UPLOAD_CHUNK_SIZE
}

fn default_preview_length() -> usize {
    DEFAULT_PREVIEW_LENGTH
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            access_token: None,
            log_level: default_log_level(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            keepalive_failure_threshold: DEFAULT_KEEPALIVE_FAILURE_THRESHOLD,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            preview_length: DEFAULT_PREVIEW_LENGTH,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("bind address is empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connectTimeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.keepalive_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "keepaliveFailureThreshold must be at least 1".to_string(),
            ));
        }
        if self.upload_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "uploadChunkSize must be greater than 0".to_string(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "maxMessageBytes must be greater than 0".to_string(),
            ));
        }
        if matches!(self.access_token.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid("accessToken is empty".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
