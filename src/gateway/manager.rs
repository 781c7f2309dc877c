//! Connection Manager
//!
//! Owns the single remote connection of one client link and everything that
//! hangs off it: the keepalive task, the session registry and the transfer
//! worker. All methods are synchronous and are called from the link's event
//! loop; remote I/O runs in spawned tasks which report back as `LinkEvent`s.
//!
//! Every accepted connect, and every teardown, advances the generation.
//! Events stamped with an older generation belong to a connection that no
//! longer exists and are dropped in `handle_event`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::GatewayError;
use super::events::{Generation, GatewayEvent, LinkEvent, TransferEvent};
use super::keepalive::KeepaliveTask;
use super::registry::SessionRegistry;
use super::remote::{Connector, RemoteEndpoint};
use super::transfer::{BackendInit, TransferOrchestrator, TransferRequest};
use crate::config::GatewayConfig;
use crate::ssh::{ShellChannel, SshConfig, SshError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
}

/// Gateway-wide knobs the manager needs
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub connect_timeout: Duration,
    pub keepalive_failure_threshold: u32,
    pub upload_chunk_size: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for ManagerSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            keepalive_failure_threshold: config.keepalive_failure_threshold,
            upload_chunk_size: config.upload_chunk_size,
        }
    }
}

pub struct ConnectionManager {
    link_id: String,
    connector: Arc<dyn Connector>,
    settings: ManagerSettings,
    status: ConnectionStatus,
    generation: Generation,
    config: Option<SshConfig>,
    endpoint: Option<Arc<dyn RemoteEndpoint>>,
    keepalive: Option<KeepaliveTask>,
    watcher: Option<JoinHandle<()>>,
    sessions: SessionRegistry,
    transfers: TransferOrchestrator,
    events: mpsc::UnboundedSender<LinkEvent>,
    out: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionManager {
    /// Create a manager; the returned receiver must be fed back into `handle_event`
    pub fn new(
        link_id: String,
        connector: Arc<dyn Connector>,
        settings: ManagerSettings,
        out: mpsc::UnboundedSender<GatewayEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transfers = TransferOrchestrator::new(settings.upload_chunk_size);
        let manager = Self {
            link_id,
            connector,
            settings,
            status: ConnectionStatus::Disconnected,
            generation: 0,
            config: None,
            endpoint: None,
            keepalive: None,
            watcher: None,
            sessions: SessionRegistry::new(),
            transfers,
            events,
            out,
        };
        (manager, events_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.out.send(event);
    }

    /// Start connecting in the background
    pub fn connect(&mut self, config: SshConfig) -> Result<(), GatewayError> {
        if self.status != ConnectionStatus::Disconnected {
            warn!("[{}] Connect rejected: already {:?}", self.link_id, self.status);
            return Err(GatewayError::AlreadyConnected);
        }

        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        info!(
            "[{}] Connecting to {} (generation {})",
            self.link_id,
            config.target(),
            self.generation
        );
        self.emit(GatewayEvent::Connecting);

        let generation = self.generation;
        let connector = self.connector.clone();
        let events = self.events.clone();
        let deadline = self.settings.connect_timeout;
        let target = config.clone();
        self.config = Some(config);

        tokio::spawn(async move {
            let result = match tokio::time::timeout(deadline, connector.connect(&target)).await {
                Ok(result) => result,
                Err(_) => Err(SshError::Timeout(format!(
                    "connection not ready after {} ms",
                    deadline.as_millis()
                ))),
            };
            let _ = events.send(LinkEvent::Connected { generation, result });
        });

        Ok(())
    }

    /// Tear the connection down; does nothing when already disconnected
    pub fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Disconnected {
            debug!("[{}] Disconnect ignored: not connected", self.link_id);
            return;
        }
        info!("[{}] Disconnect requested", self.link_id);
        self.teardown();
    }

    /// Open a shell under `id`; the outcome arrives as an event
    pub fn open_session(&mut self, id: String, cols: u32, rows: u32) -> Result<(), GatewayError> {
        if self.status != ConnectionStatus::Ready {
            return Err(GatewayError::NotConnected);
        }
        let endpoint = self.endpoint.clone().ok_or(GatewayError::NotConnected)?;
        let token = self.sessions.begin_open(&id, cols, rows)?;

        debug!("[{}] Opening session {} ({}x{})", self.link_id, id, cols, rows);
        let generation = self.generation;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = endpoint.open_shell(cols, rows).await;
            let _ = events.send(LinkEvent::ShellOpened {
                generation,
                id,
                token,
                result,
            });
        });

        Ok(())
    }

    pub fn write(&mut self, id: &str, data: Bytes) {
        self.sessions.write(id, data);
    }

    pub fn resize(&mut self, id: &str, cols: u32, rows: u32) {
        self.sessions.resize(id, cols, rows);
    }

    pub fn close_session(&mut self, id: &str) {
        if self.sessions.close(id) {
            self.emit(GatewayEvent::SessionClosed { id: id.to_string() });
        }
    }

    /// Queue a file operation on the transfer worker
    pub fn transfer(&self, request: TransferRequest) -> Result<(), GatewayError> {
        if self.status != ConnectionStatus::Ready {
            return Err(GatewayError::NotConnected);
        }
        self.transfers.submit(request)
    }

    /// Apply a result reported by one of the manager's background tasks
    pub fn handle_event(&mut self, event: LinkEvent) {
        if let LinkEvent::Connected { generation, result } = event {
            self.on_connected(generation, result);
            return;
        }

        if event.generation() != self.generation {
            debug!(
                "[{}] Dropping event from generation {} (current {})",
                self.link_id,
                event.generation(),
                self.generation
            );
            return;
        }

        match event {
            LinkEvent::Connected { .. } => {}

            LinkEvent::EndpointClosed { .. } => {
                if self.status == ConnectionStatus::Ready {
                    warn!("[{}] Connection closed by remote host", self.link_id);
                    self.teardown();
                }
            }

            LinkEvent::KeepaliveFailed { reason, .. } => {
                if self.status == ConnectionStatus::Ready {
                    error!("[{}] {}", self.link_id, reason);
                    self.emit(GatewayEvent::Error(reason));
                    self.teardown();
                }
            }

            LinkEvent::ShellOpened {
                generation,
                id,
                token,
                result,
            } => self.on_shell_opened(generation, id, token, result),

            LinkEvent::SessionOutput {
                id, token, data, ..
            } => {
                if self.sessions.is_current(&id, token) {
                    self.emit(GatewayEvent::SessionData { id, data });
                }
            }

            LinkEvent::SessionEnded { id, token, .. } => {
                if self.sessions.remove_ended(&id, token) {
                    self.emit(GatewayEvent::SessionClosed { id });
                }
            }

            LinkEvent::Transfer { event, .. } => {
                self.emit(GatewayEvent::Transfer(event));
            }
        }
    }

    fn on_connected(
        &mut self,
        generation: Generation,
        result: Result<Arc<dyn RemoteEndpoint>, SshError>,
    ) {
        if generation != self.generation || self.status != ConnectionStatus::Connecting {
            if let Ok(endpoint) = result {
                debug!(
                    "[{}] Closing connection from abandoned attempt (generation {})",
                    self.link_id, generation
                );
                spawn_disconnect(endpoint);
            }
            return;
        }

        match result {
            Ok(endpoint) => self.enter_ready(endpoint),
            Err(e) => {
                let err = GatewayError::from(e);
                error!("[{}] Connect failed: {}", self.link_id, err);
                self.status = ConnectionStatus::Disconnected;
                self.config = None;
                self.emit(GatewayEvent::Error(err.to_string()));
                self.emit(GatewayEvent::Disconnected);
            }
        }
    }

    fn enter_ready(&mut self, endpoint: Arc<dyn RemoteEndpoint>) {
        let Some(config) = self.config.clone() else {
            spawn_disconnect(endpoint);
            return;
        };
        let generation = self.generation;

        self.status = ConnectionStatus::Ready;
        self.endpoint = Some(endpoint.clone());
        info!("[{}] Connection ready: {}", self.link_id, config.target());
        self.emit(GatewayEvent::Ready);

        let events = self.events.clone();
        self.keepalive = KeepaliveTask::spawn(
            endpoint.clone(),
            config.keepalive_interval(),
            self.settings.keepalive_failure_threshold,
            format!("{} ({})", self.link_id, config.target()),
            move |reason| {
                let _ = events.send(LinkEvent::KeepaliveFailed { generation, reason });
            },
        );

        let events = self.events.clone();
        self.watcher = Some(tokio::spawn(async move {
            endpoint.closed().await;
            let _ = events.send(LinkEvent::EndpointClosed { generation });
        }));

        let connector = self.connector.clone();
        let init: BackendInit = Box::pin(async move { connector.open_sftp(&config).await });
        self.transfers.start(init, generation, self.events.clone());
    }

    fn on_shell_opened(
        &mut self,
        generation: Generation,
        id: String,
        token: u64,
        result: Result<ShellChannel, SshError>,
    ) {
        match result {
            Ok(shell) => {
                if self
                    .sessions
                    .activate(&id, token, shell, generation, self.events.clone())
                {
                    self.emit(GatewayEvent::SessionOpened { id });
                }
            }
            Err(e) => {
                warn!("[{}] Session {} failed to open: {}", self.link_id, id, e);
                if self.sessions.discard(&id, token) {
                    let err = GatewayError::from(e);
                    self.emit(GatewayEvent::Error(format!(
                        "Failed to open session {}: {}",
                        id, err
                    )));
                    self.emit(GatewayEvent::SessionClosed { id });
                }
            }
        }
    }

    /// Leave ready/connecting: close sessions, stop background work, drop the endpoint
    fn teardown(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.generation += 1;

        for id in self.sessions.close_all() {
            self.emit(GatewayEvent::SessionClosed { id });
        }

        self.keepalive = None;
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.transfers.shutdown();

        if let Some(endpoint) = self.endpoint.take() {
            spawn_disconnect(endpoint);
        }
        self.config = None;

        info!("[{}] Disconnected", self.link_id);
        self.emit(GatewayEvent::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Close an endpoint without waiting; no-op outside a runtime
fn spawn_disconnect(endpoint: Arc<dyn RemoteEndpoint>) {
    if let Ok(runtime) = Handle::try_current() {
        runtime.spawn(async move { endpoint.disconnect().await });
    }
}

/// Display text for a failed transfer step
pub fn transfer_failure_text(event: &TransferEvent) -> Option<String> {
    match event {
        TransferEvent::Failed {
            operation,
            path,
            error,
        } if path.is_empty() => Some(format!("{} failed: {}", operation, error)),
        TransferEvent::Failed {
            operation,
            path,
            error,
        } => Some(format!("{} {} failed: {}", operation, path, error)),
        _ => None,
    }
}
