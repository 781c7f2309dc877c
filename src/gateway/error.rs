//! Gateway error taxonomy
//!
//! Every error that reaches a client link is one of these, rendered as text.

use thiserror::Error;

use crate::sftp::SftpError;
use crate::ssh::SshError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),
}

impl From<SshError> for GatewayError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(msg) => GatewayError::AuthenticationFailure(msg),
            SshError::KeyError(msg) => GatewayError::AuthenticationFailure(msg),
            SshError::ChannelError(msg) => GatewayError::ChannelError(msg),
            SshError::Disconnected => GatewayError::NotConnected,
            other => GatewayError::ConnectionError(other.to_string()),
        }
    }
}

impl From<SftpError> for GatewayError {
    fn from(err: SftpError) -> Self {
        GatewayError::TransferError(err.to_string())
    }
}

impl serde::Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
