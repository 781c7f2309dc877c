//! Link Dispatcher
//!
//! One per client link. Decodes inbound frames and applies them to the
//! link's `ConnectionManager` in arrival order; failures the manager reports
//! synchronously go back to the client as `error_message`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::ClientMessage;
use crate::config::GatewayConfig;
use crate::gateway::{
    ConnectionManager, Connector, GatewayError, GatewayEvent, LinkEvent, ManagerSettings,
    TransferRequest,
};

pub struct LinkDispatcher {
    link_id: String,
    manager: ConnectionManager,
    default_keepalive_ms: u64,
    preview_length: usize,
    out: mpsc::UnboundedSender<GatewayEvent>,
}

impl LinkDispatcher {
    /// Build the dispatcher for a new link. Events from the returned receiver
    /// must be passed to [`LinkDispatcher::handle_event`].
    pub fn new(
        link_id: String,
        connector: Arc<dyn Connector>,
        config: &GatewayConfig,
        out: mpsc::UnboundedSender<GatewayEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (manager, events) = ConnectionManager::new(
            link_id.clone(),
            connector,
            ManagerSettings::from(config),
            out.clone(),
        );
        let dispatcher = Self {
            link_id,
            manager,
            default_keepalive_ms: config.keepalive_interval_ms,
            preview_length: config.preview_length,
            out,
        };
        (dispatcher, events)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Decode and apply one text frame; malformed frames are reported and dropped
    pub fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!("[{}] Malformed frame: {}", self.link_id, e);
                self.report(format!("Invalid message: {}", e));
            }
        }
    }

    pub fn handle_message(&mut self, message: ClientMessage) {
        debug!("[{}] <- {}", self.link_id, message_name(&message));
        if let Err(e) = self.apply(message) {
            self.report(e.to_string());
        }
    }

    pub fn handle_event(&mut self, event: LinkEvent) {
        self.manager.handle_event(event);
    }

    /// Disconnect the link's connection; called once the link is going away
    pub fn shutdown(&mut self) {
        self.manager.disconnect();
    }

    /// Tell the client about a problem that is not a state transition
    pub fn report(&self, text: String) {
        let _ = self.out.send(GatewayEvent::Error(text));
    }

    fn apply(&mut self, message: ClientMessage) -> Result<(), GatewayError> {
        match message {
            ClientMessage::Connect(request) => {
                let config = request.into_ssh_config(self.default_keepalive_ms)?;
                self.manager.connect(config)
            }
            ClientMessage::Disconnect => {
                self.manager.disconnect();
                Ok(())
            }
            ClientMessage::OpenSession { id, cols, rows } => {
                self.manager.open_session(id, cols, rows)
            }
            ClientMessage::Input { id, bytes } => {
                self.manager.write(&id, bytes);
                Ok(())
            }
            ClientMessage::Resize { id, cols, rows } => {
                self.manager.resize(&id, cols, rows);
                Ok(())
            }
            ClientMessage::CloseSession { id } => {
                self.manager.close_session(&id);
                Ok(())
            }
            ClientMessage::TransferList { dir } => self.manager.transfer(TransferRequest::List { dir }),
            ClientMessage::TransferMkdir { dir, recursive } => self
                .manager
                .transfer(TransferRequest::Mkdir { dir, recursive }),
            ClientMessage::TransferDelete { path } => {
                self.manager.transfer(TransferRequest::Delete { path })
            }
            ClientMessage::TransferRename { from, to } => {
                self.manager.transfer(TransferRequest::Rename { from, to })
            }
            ClientMessage::TransferUpload { remote_path, bytes } => {
                self.manager.transfer(TransferRequest::Upload {
                    remote_path,
                    data: bytes,
                })
            }
            ClientMessage::TransferDownload { remote_path } => self
                .manager
                .transfer(TransferRequest::Download { remote_path }),
            ClientMessage::TransferPreview {
                remote_path,
                length,
            } => self.manager.transfer(TransferRequest::Preview {
                remote_path,
                length: length.unwrap_or(self.preview_length),
            }),
        }
    }
}

fn message_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Connect(_) => "connect",
        ClientMessage::Disconnect => "disconnect",
        ClientMessage::OpenSession { .. } => "open_session",
        ClientMessage::Input { .. } => "input",
        ClientMessage::Resize { .. } => "resize",
        ClientMessage::CloseSession { .. } => "close_session",
        ClientMessage::TransferList { .. } => "transfer_list",
        ClientMessage::TransferMkdir { .. } => "transfer_mkdir",
        ClientMessage::TransferDelete { .. } => "transfer_delete",
        ClientMessage::TransferRename { .. } => "transfer_rename",
        ClientMessage::TransferUpload { .. } => "transfer_upload",
        ClientMessage::TransferDownload { .. } => "transfer_download",
        ClientMessage::TransferPreview { .. } => "transfer_preview",
    }
}
