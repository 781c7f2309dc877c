//! SFTP file management module
//!
//! Remote file browsing, upload, download and preview over russh-sftp.

pub mod backend;
pub mod error;
pub mod path_utils;
pub mod session;
pub mod types;

pub use backend::{RemoteWriter, SftpBackend};
pub use error::SftpError;
pub use session::SftpSession;
pub use types::*;
