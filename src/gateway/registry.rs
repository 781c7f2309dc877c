//! Session Registry
//!
//! Tracks the interactive shells multiplexed over one connection, keyed by
//! the caller-supplied session id. The registry never touches the network:
//! shells are opened by the connection manager in a spawned task and handed
//! over through `activate`.
//!
//! Each accepted open is stamped with a token. Events from a shell carry
//! that token, so output or closure from an earlier session that reused the
//! same id is never attributed to the current one.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::GatewayError;
use super::events::{Generation, LinkEvent};
use crate::ssh::{ShellChannel, ShellCommand};

struct SessionEntry {
    token: u64,
    cols: u32,
    rows: u32,
    state: SessionState,
}

enum SessionState {
    /// Channel requested, not yet open. Input and resizes arriving meanwhile
    /// are held and replayed once the shell is attached.
    Opening { resized: bool, pending: Vec<Bytes> },
    Open {
        input: mpsc::UnboundedSender<ShellCommand>,
        forwarder: JoinHandle<()>,
    },
}

impl SessionEntry {
    /// End the shell and stop forwarding its output
    fn shutdown(self) {
        if let SessionState::Open { input, forwarder } = self.state {
            let _ = input.send(ShellCommand::Close);
            forwarder.abort();
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: HashMap<String, SessionEntry>,
    next_token: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether `token` still identifies the live session registered under `id`
    pub fn is_current(&self, id: &str, token: u64) -> bool {
        self.entries.get(id).is_some_and(|e| e.token == token)
    }

    /// Current terminal size of a session
    #[cfg(test)]
    pub fn dimensions(&self, id: &str) -> Option<(u32, u32)> {
        self.entries.get(id).map(|e| (e.cols, e.rows))
    }

    /// Register `id` as opening. A registered id (opening or open) is rejected.
    pub fn begin_open(&mut self, id: &str, cols: u32, rows: u32) -> Result<u64, GatewayError> {
        if self.entries.contains_key(id) {
            warn!("Rejecting open for session {}: id already in use", id);
            return Err(GatewayError::ChannelError(format!(
                "Session {} already exists",
                id
            )));
        }

        self.next_token += 1;
        let token = self.next_token;
        self.entries.insert(
            id.to_string(),
            SessionEntry {
                token,
                cols,
                rows,
                state: SessionState::Opening {
                    resized: false,
                    pending: Vec::new(),
                },
            },
        );
        debug!("Session {} opening ({}x{})", id, cols, rows);
        Ok(token)
    }

    /// Attach an opened shell to its entry and start forwarding its output.
    ///
    /// Returns false when the entry was closed while the shell was opening;
    /// the shell is then ended immediately.
    pub fn activate(
        &mut self,
        id: &str,
        token: u64,
        shell: ShellChannel,
        generation: Generation,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> bool {
        let ShellChannel { input, mut output } = shell;

        let entry = match self.entries.get_mut(id) {
            Some(entry) if entry.token == token => entry,
            _ => {
                debug!("Session {} closed before its shell opened", id);
                let _ = input.send(ShellCommand::Close);
                return false;
            }
        };

        if let SessionState::Opening { resized, pending } = &mut entry.state {
            if *resized {
                let _ = input.send(ShellCommand::Resize(entry.cols, entry.rows));
            }
            for data in pending.drain(..) {
                let _ = input.send(ShellCommand::Data(data));
            }
        }

        let session_id = id.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(data) = output.recv().await {
                let event = LinkEvent::SessionOutput {
                    generation,
                    id: session_id.clone(),
                    token,
                    data,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            let _ = events.send(LinkEvent::SessionEnded {
                generation,
                id: session_id,
                token,
            });
        });

        entry.state = SessionState::Open { input, forwarder };
        info!("Session {} open", id);
        true
    }

    /// Drop an entry whose shell failed to open. Returns whether it was still registered.
    pub fn discard(&mut self, id: &str, token: u64) -> bool {
        if self.is_current(id, token) {
            self.entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Forward input bytes; held until the shell opens, ignored for unknown ids
    pub fn write(&mut self, id: &str, data: Bytes) {
        match self.entries.get_mut(id).map(|e| &mut e.state) {
            Some(SessionState::Open { input, .. }) => {
                let _ = input.send(ShellCommand::Data(data));
            }
            Some(SessionState::Opening { pending, .. }) => {
                debug!("Holding {} bytes for session {} (still opening)", data.len(), id);
                pending.push(data);
            }
            None => {}
        }
    }

    /// Record and forward a new terminal size; unknown ids are ignored
    pub fn resize(&mut self, id: &str, cols: u32, rows: u32) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.cols = cols;
        entry.rows = rows;

        match &mut entry.state {
            SessionState::Open { input, .. } => {
                let _ = input.send(ShellCommand::Resize(cols, rows));
            }
            SessionState::Opening { resized, .. } => *resized = true,
        }
    }

    /// End a session. Returns false for unknown ids.
    pub fn close(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                info!("Closing session {}", id);
                entry.shutdown();
                true
            }
            None => false,
        }
    }

    /// Forget a session whose output stream ended. Returns false if it was already gone.
    pub fn remove_ended(&mut self, id: &str, token: u64) -> bool {
        if !self.is_current(id, token) {
            return false;
        }
        if let Some(entry) = self.entries.remove(id) {
            info!("Session {} closed by remote", id);
            entry.shutdown();
        }
        true
    }

    /// End every session and clear the registry, returning the ids that were registered
    pub fn close_all(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();

        for (_, entry) in self.entries.drain() {
            entry.shutdown();
        }

        if !ids.is_empty() {
            info!("Closed {} sessions", ids.len());
        }
        ids
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
