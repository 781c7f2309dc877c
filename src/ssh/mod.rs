//! SSH module - connections, the handle owner task and interactive shells
//!
//! This module provides the core SSH functionality using russh library.

mod client;
mod config;
mod error;
mod handle_owner;
mod shell;

pub use client::{fingerprint, ClientHandler, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;
pub use handle_owner::{
    spawn_handle_owner_task, HandleCommand, HandleController, PingResult, PING_TIMEOUT,
};
pub use shell::{start_shell, ShellChannel, ShellCommand, TERM};
