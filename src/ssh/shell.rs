//! Interactive shell channels
//!
//! Each shell is a PTY session channel driven by its own pump task. The
//! caller talks to the pump through a `ShellChannel`: commands go in over an
//! unbounded queue, terminal output comes back as `Bytes` chunks. The output
//! receiver yields `None` once the remote side has ended the shell.

use bytes::Bytes;
use russh::ChannelMsg;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::error::SshError;
use super::handle_owner::HandleController;

/// Terminal type requested for every PTY
pub const TERM: &str = "xterm-256color";

/// Output chunks buffered between the pump and its consumer
const OUTPUT_BUFFER: usize = 1024;

/// Commands for a running shell
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    /// Bytes for the shell's stdin
    Data(Bytes),
    /// New terminal size (cols, rows)
    Resize(u32, u32),
    /// Send EOF and stop the pump
    Close,
}

/// Both directions of an open shell
#[derive(Debug)]
pub struct ShellChannel {
    pub input: mpsc::UnboundedSender<ShellCommand>,
    pub output: mpsc::Receiver<Bytes>,
}

impl ShellChannel {
    /// Pair a channel with the pump ends it talks to (used by in-process backends)
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ShellCommand>, mpsc::Sender<Bytes>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::channel(OUTPUT_BUFFER);
        (Self { input, output }, input_rx, output_tx)
    }
}

/// Open a session channel, allocate a PTY, start a shell and spawn its pump
pub async fn start_shell(
    controller: &HandleController,
    cols: u32,
    rows: u32,
) -> Result<ShellChannel, SshError> {
    let mut channel = controller.open_session_channel().await?;

    debug!("Channel opened, requesting PTY {}x{}", cols, rows);

    channel
        .request_pty(false, TERM, cols, rows, 0, 0, &[])
        .await
        .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

    channel
        .request_shell(false)
        .await
        .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

    info!("Interactive shell started on {}", controller.label());

    let (shell, mut cmd_rx, output_tx) = ShellChannel::pair();
    let label = controller.label().to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ShellCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to SSH channel: {}", e);
                            break;
                        }
                    }
                    Some(ShellCommand::Resize(cols, rows)) => {
                        // A failed resize leaves the shell usable
                        if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                            error!("Failed to resize PTY: {}", e);
                        } else {
                            debug!("PTY resized to {}x{} on {}", cols, rows, label);
                        }
                    }
                    Some(ShellCommand::Close) | None => {
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break;
                    }
                },

                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if output_tx.send(Bytes::copy_from_slice(&data)).await.is_err() {
                            break;
                        }
                    }
                    // stderr is merged into the terminal stream
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                        if output_tx.send(Bytes::copy_from_slice(&data)).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("SSH channel EOF on {}", label);
                    }
                    Some(ChannelMsg::Close) | None => {
                        info!("SSH channel closed on {}", label);
                        break;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Shell exited with status {} on {}", exit_status, label);
                    }
                    Some(_) => {}
                },
            }
        }

        debug!("Shell pump terminated on {}", label);
    });

    Ok(shell)
}
