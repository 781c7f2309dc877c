//! shellgate - SSH terminal and SFTP gateway for browser clients
//!
//! Every WebSocket link owns one SSH connection. Terminal sessions are
//! multiplexed as separate shell channels on that connection and file
//! transfers run over a second SFTP connection with the same credentials.
//!
//! # Layout
//!
//! ```text
//!  WebSocket link ──► bridge::server ──► bridge::dispatcher (one per link)
//!                                              │
//!                                              ▼
//!                                  gateway::ConnectionManager
//!                        ┌──────────────┬──────┴───────┬──────────────┐
//!                        ▼              ▼              ▼              ▼
//!                SessionRegistry  TransferOrch.  KeepaliveTask   RemoteEndpoint
//!                        │              │                             │
//!                   ssh::shell     sftp::SftpSession          ssh::HandleController
//! ```

pub mod bridge;
pub mod config;
pub mod gateway;
pub mod sftp;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
