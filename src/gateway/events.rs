//! Events flowing out of a link's gateway core
//!
//! `LinkEvent`s are produced by spawned tasks and consumed by the link loop;
//! each carries the generation of the connection that produced it so results
//! from a torn-down connection can be recognised and dropped.
//! `GatewayEvent`s are what the link loop hands to the client.

use std::sync::Arc;

use bytes::Bytes;

use super::error::GatewayError;
use super::remote::RemoteEndpoint;
use crate::sftp::{FileInfo, TransferProgress};
use crate::ssh::{ShellChannel, SshError};

/// Identifies one connect attempt on a link
pub type Generation = u64;

/// Outcome of one transfer-worker step
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// The SFTP backend finished initializing
    Ready,
    Files {
        dir: String,
        entries: Vec<FileInfo>,
    },
    Progress(TransferProgress),
    UploadComplete {
        remote_path: String,
    },
    Downloaded {
        remote_path: String,
        data: Bytes,
    },
    DirCreated {
        dir: String,
    },
    Deleted {
        path: String,
    },
    Renamed {
        from: String,
        to: String,
    },
    Preview {
        remote_path: String,
        content: String,
    },
    /// One operation failed; `error` is a `TransferError` or `NotConnected`
    Failed {
        operation: &'static str,
        path: String,
        error: GatewayError,
    },
}

/// Internal results reported back to the link loop
pub enum LinkEvent {
    /// The background connect finished
    Connected {
        generation: Generation,
        result: Result<Arc<dyn RemoteEndpoint>, SshError>,
    },
    /// The remote endpoint went away on its own
    EndpointClosed { generation: Generation },
    /// Keepalive gave up on the connection
    KeepaliveFailed {
        generation: Generation,
        reason: String,
    },
    /// A shell finished opening
    ShellOpened {
        generation: Generation,
        id: String,
        token: u64,
        result: Result<ShellChannel, SshError>,
    },
    SessionOutput {
        generation: Generation,
        id: String,
        token: u64,
        data: Bytes,
    },
    /// The shell's output stream ended
    SessionEnded {
        generation: Generation,
        id: String,
        token: u64,
    },
    Transfer {
        generation: Generation,
        event: TransferEvent,
    },
}

impl LinkEvent {
    pub fn generation(&self) -> Generation {
        match self {
            LinkEvent::Connected { generation, .. }
            | LinkEvent::EndpointClosed { generation }
            | LinkEvent::KeepaliveFailed { generation, .. }
            | LinkEvent::ShellOpened { generation, .. }
            | LinkEvent::SessionOutput { generation, .. }
            | LinkEvent::SessionEnded { generation, .. }
            | LinkEvent::Transfer { generation, .. } => *generation,
        }
    }
}

/// Client-visible state changes, one per transition
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connecting,
    Ready,
    Disconnected,
    Error(String),
    SessionOpened { id: String },
    SessionData { id: String, data: Bytes },
    SessionClosed { id: String },
    Transfer(TransferEvent),
}
