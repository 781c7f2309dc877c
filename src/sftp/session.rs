//! SFTP Session
//!
//! russh-sftp client over a session channel of a dedicated SSH connection.

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::backend::{RemoteWriter, SftpBackend};
use super::error::SftpError;
use super::path_utils::{file_name, join_remote_path};
use super::types::{FileInfo, FileType};
use crate::ssh::HandleController;

/// SFTP Session wrapper
pub struct SftpSession {
    sftp: RusshSftpSession,
    /// Keeps the owning SSH connection alive for as long as the session exists
    controller: HandleController,
}

impl SftpSession {
    /// Open the `sftp` subsystem on a new session channel
    pub async fn open(controller: HandleController) -> Result<Self, SftpError> {
        let channel = controller
            .open_session_channel()
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::SubsystemNotAvailable(e.to_string()))?;

        info!("SFTP subsystem opened on {}", controller.label());

        Ok(Self { sftp, controller })
    }
}

#[async_trait]
impl SftpBackend for SftpSession {
    async fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        let canonical_path = self
            .sftp
            .canonicalize(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        debug!("Listing directory: {}", canonical_path);

        let read_dir = self
            .sftp
            .read_dir(&canonical_path)
            .await
            .map_err(|e| map_sftp_error(e, &canonical_path))?;

        let entries: Vec<FileInfo> = read_dir
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| {
                let name = entry.file_name();
                let full_path = join_remote_path(&canonical_path, &name);
                file_info(name, full_path, &entry.metadata())
            })
            .collect();

        debug!("Listed {} entries in {}", entries.len(), canonical_path);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError> {
        let metadata = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;

        Ok(file_info(
            file_name(path).to_string(),
            path.to_string(),
            &metadata,
        ))
    }

    async fn lstat(&self, path: &str) -> Result<FileInfo, SftpError> {
        let metadata = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;

        Ok(file_info(
            file_name(path).to_string(),
            path.to_string(),
            &metadata,
        ))
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        info!("Creating directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        info!("Deleting file: {}", path);
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        info!("Deleting directory: {}", path);
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        info!("Renaming {} to {}", from, to);
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| map_sftp_error(e, from))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>, SftpError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;

        let mut buf = Vec::with_capacity(len.min(64 * 1024));
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read_all(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.sftp.read(path).await.map_err(|e| map_sftp_error(e, path))
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close on {}: {}", self.controller.label(), e);
        }
        self.controller.disconnect().await;
    }
}

fn file_info(name: String, path: String, metadata: &FileAttributes) -> FileInfo {
    let kind = if metadata.is_dir() {
        FileType::Directory
    } else if metadata.is_symlink() {
        FileType::Symlink
    } else if metadata.is_regular() {
        FileType::File
    } else {
        FileType::Other
    };

    let permissions = metadata
        .permissions
        .map(|p| format!("{:o}", p & 0o777))
        .unwrap_or_else(|| "000".to_string());

    FileInfo {
        name,
        path,
        kind,
        size: metadata.size.unwrap_or(0),
        modified: metadata.mtime.map(|t| t as i64).unwrap_or(0),
        permissions,
    }
}

/// Map SFTP errors to our error type
fn map_sftp_error(err: SftpErrorInner, path: &str) -> SftpError {
    let err_str = err.to_string();
    if err_str.contains("No such file") || err_str.contains("not found") {
        SftpError::FileNotFound(path.to_string())
    } else if err_str.contains("Permission denied") {
        SftpError::PermissionDenied(path.to_string())
    } else {
        SftpError::ProtocolError(err_str)
    }
}
