//! File-operation backend used by the transfer worker

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::error::SftpError;
use super::types::FileInfo;

/// Writable handle to a freshly created (or truncated) remote file.
/// The contents are only durable after `shutdown()` succeeds.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote filesystem operations
///
/// Implemented over russh-sftp in production and in memory by tests.
#[async_trait]
pub trait SftpBackend: Send + Sync {
    /// Directory entries, without `.` and `..`
    async fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError>;

    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError>;

    /// Like `stat`, but a symlink describes the link itself
    async fn lstat(&self, path: &str) -> Result<FileInfo, SftpError>;

    async fn create_dir(&self, path: &str) -> Result<(), SftpError>;

    async fn remove_file(&self, path: &str) -> Result<(), SftpError>;

    /// Removes an empty directory
    async fn remove_dir(&self, path: &str) -> Result<(), SftpError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError>;

    /// Create or truncate `path` for writing
    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError>;

    /// At most `len` bytes from the start of the file
    async fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>, SftpError>;

    /// The whole file
    async fn read_all(&self, path: &str) -> Result<Vec<u8>, SftpError>;

    /// Release the backend; later calls may fail
    async fn close(&self);
}
