//! Seams between the gateway core and the remote side
//!
//! The connection manager only sees `Connector` and `RemoteEndpoint`; the
//! russh-backed implementations live here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::sftp::{SftpBackend, SftpError, SftpSession};
use crate::ssh::{
    spawn_handle_owner_task, start_shell, HandleController, PingResult, ShellChannel, SshClient,
    SshConfig, SshError,
};

/// One authenticated remote connection
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Open an interactive shell with a PTY of the given size
    async fn open_shell(&self, cols: u32, rows: u32) -> Result<ShellChannel, SshError>;

    /// Keepalive ping
    async fn ping(&self) -> PingResult;

    /// Resolves once the connection has ended, whoever ended it
    async fn closed(&self);

    async fn disconnect(&self);
}

/// Produces authenticated endpoints and file-transfer backends
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteEndpoint>, SshError>;

    /// Open a file-transfer backend over its own authenticated connection
    async fn open_sftp(&self, config: &SshConfig) -> Result<Arc<dyn SftpBackend>, SftpError>;
}

#[async_trait]
impl RemoteEndpoint for HandleController {
    async fn open_shell(&self, cols: u32, rows: u32) -> Result<ShellChannel, SshError> {
        start_shell(self, cols, rows).await
    }

    async fn ping(&self) -> PingResult {
        HandleController::ping(self).await
    }

    async fn closed(&self) {
        self.wait_closed().await
    }

    async fn disconnect(&self) {
        HandleController::disconnect(self).await
    }
}

/// russh-backed connector
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteEndpoint>, SshError> {
        let handle = SshClient::new(config.clone()).connect().await?;
        let controller = spawn_handle_owner_task(handle, config.target());
        Ok(Arc::new(controller))
    }

    async fn open_sftp(&self, config: &SshConfig) -> Result<Arc<dyn SftpBackend>, SftpError> {
        let handle = SshClient::new(config.clone())
            .connect()
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;
        let controller = spawn_handle_owner_task(handle, format!("{} (sftp)", config.target()));
        info!("Transfer connection established for {}", config.target());

        match SftpSession::open(controller.clone()).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(e) => {
                controller.disconnect().await;
                Err(e)
            }
        }
    }
}
