//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Shells, keepalive pings
//! and disconnect requests reach it through a cloneable `HandleController`
//! which sends commands over an mpsc channel.
//!
//! The owner also watches the handle itself: when the remote end drops the
//! connection, the task exits and every disconnect subscriber is notified.

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Deadline for a single keepalive round trip
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the owner checks whether the transport is still alive
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a keepalive ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingResult {
    /// Connection answered
    Ok,
    /// No answer within the deadline (may be transient)
    Timeout,
    /// Transport is gone
    IoError,
}

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (shell or sftp subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Keepalive ping
    Ping {
        reply_tx: oneshot::Sender<PingResult>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning only copies the sender; every clone has full control of the connection.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    disconnect_tx: broadcast::Sender<()>,
    label: String,
}

impl HandleController {
    /// Subscribe to SSH disconnect notifications.
    ///
    /// Check `is_connected()` after subscribing: the owner closes its command
    /// queue before it broadcasts, so a closed queue means the notice was sent.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    /// Label used in log lines (`user@host:port`)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Ask the owner to close the connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Keepalive ping
    pub async fn ping(&self) -> PingResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(HandleCommand::Ping { reply_tx }).await.is_err() {
            return PingResult::IoError;
        }
        reply_rx.await.unwrap_or(PingResult::IoError)
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Resolves once the connection is gone, for whatever reason
    pub async fn wait_closed(&self) {
        let mut rx = self.subscribe_disconnect();
        if !self.is_connected() {
            return;
        }
        // Lagged or Closed both mean the owner has finished
        let _ = rx.recv().await;
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let notify = disconnect_tx.clone();
    let task_label = label.clone();

    tokio::spawn(async move {
        let mut handle = handle;
        let label = task_label;
        let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);

        info!("Handle owner task started for {}", label);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::Ping { reply_tx }) => {
                        let _ = reply_tx.send(ping_handle(&mut handle, &label).await);
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for {}", label);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for {}", label);
                        break;
                    }
                },

                _ = liveness.tick() => {
                    if handle.is_closed() {
                        info!("SSH transport closed by remote for {}", label);
                        break;
                    }
                }
            }
        }

        // Close the queue before broadcasting so `is_connected()` already
        // reads false for anyone who subscribes after the notice
        drain_pending_commands(&mut cmd_rx);
        let _ = notify.send(());

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", label);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
        label,
    }
}

/// Send `keepalive@openssh.com` with want_reply and classify the outcome
async fn ping_handle(handle: &mut Handle<ClientHandler>, label: &str) -> PingResult {
    debug!("Keepalive ping for {}", label);
    match tokio::time::timeout(PING_TIMEOUT, handle.send_keepalive(true)).await {
        Ok(Ok(())) => PingResult::Ok,
        Ok(Err(e)) => {
            if handle.is_closed() || matches!(e, russh::Error::Disconnect) {
                warn!("Keepalive transport failure for {}: {:?}", label, e);
                PingResult::IoError
            } else {
                warn!("Keepalive error for {} (soft failure): {:?}", label, e);
                PingResult::Timeout
            }
        }
        Err(_) => {
            warn!("Keepalive timeout for {} ({:?})", label, PING_TIMEOUT);
            PingResult::Timeout
        }
    }
}

/// Close the command queue and answer everything still in it
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Ping { reply_tx } => {
                let _ = reply_tx.send(PingResult::IoError);
            }
            HandleCommand::Disconnect => {}
        }
    }
}
