//! In-memory stand-ins for the remote side, used by unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch, AcquireError, Notify, OwnedSemaphorePermit, Semaphore};

use super::remote::{Connector, RemoteEndpoint};
use crate::sftp::path_utils::{file_name, join_remote_path};
use crate::sftp::{FileInfo, FileType, RemoteWriter, SftpBackend, SftpError};
use crate::ssh::{PingResult, ShellChannel, ShellCommand, SshConfig, SshError};

/// The far ends of a shell handed out by `FakeEndpoint`
pub struct FakeShell {
    pub cols: u32,
    pub rows: u32,
    pub input: mpsc::UnboundedReceiver<ShellCommand>,
    pub output: mpsc::Sender<Bytes>,
}

pub struct FakeEndpoint {
    pings: AtomicUsize,
    ping_result: Mutex<PingResult>,
    closed: watch::Sender<bool>,
    shells: Mutex<Vec<FakeShell>>,
    shells_opened: AtomicUsize,
    fail_shell: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            pings: AtomicUsize::new(0),
            ping_result: Mutex::new(PingResult::Ok),
            closed,
            shells: Mutex::new(Vec::new()),
            shells_opened: AtomicUsize::new(0),
            fail_shell: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn set_ping_result(&self, result: PingResult) {
        *self.ping_result.lock() = result;
    }

    pub fn fail_shells(&self) {
        self.fail_shell.store(true, Ordering::SeqCst);
    }

    pub fn shells_opened(&self) -> usize {
        self.shells_opened.load(Ordering::SeqCst)
    }

    /// Oldest shell not yet taken
    pub fn take_shell(&self) -> Option<FakeShell> {
        let mut shells = self.shells.lock();
        if shells.is_empty() {
            None
        } else {
            Some(shells.remove(0))
        }
    }

    /// Simulate the server dropping the connection
    pub fn close_remote(&self) {
        self.closed.send_replace(true);
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteEndpoint for FakeEndpoint {
    async fn open_shell(&self, cols: u32, rows: u32) -> Result<ShellChannel, SshError> {
        if self.fail_shell.load(Ordering::SeqCst) {
            return Err(SshError::ChannelError("shell request refused".into()));
        }
        let (channel, input, output) = ShellChannel::pair();
        self.shells.lock().push(FakeShell {
            cols,
            rows,
            input,
            output,
        });
        self.shells_opened.fetch_add(1, Ordering::SeqCst);
        Ok(channel)
    }

    async fn ping(&self) -> PingResult {
        self.pings.fetch_add(1, Ordering::SeqCst);
        *self.ping_result.lock()
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

pub struct FakeConnector {
    endpoints: Mutex<Vec<Arc<FakeEndpoint>>>,
    connects: AtomicUsize,
    gate: Option<Arc<Notify>>,
    connect_error: Mutex<Option<String>>,
    sftp: Arc<MemorySftp>,
    fail_sftp: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            gate: None,
            connect_error: Mutex::new(None),
            sftp: Arc::new(MemorySftp::new()),
            fail_sftp: AtomicBool::new(false),
        }
    }

    /// Connects block until `gate` is notified
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn fail_connect(&self, message: &str) {
        *self.connect_error.lock() = Some(message.to_string());
    }

    pub fn succeed_connect(&self) {
        *self.connect_error.lock() = None;
    }

    pub fn fail_sftp(&self) {
        self.fail_sftp.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Endpoint handed out by the most recent successful connect
    pub fn last_endpoint(&self) -> Option<Arc<FakeEndpoint>> {
        self.endpoints.lock().last().cloned()
    }

    pub fn sftp(&self) -> Arc<MemorySftp> {
        self.sftp.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _config: &SshConfig) -> Result<Arc<dyn RemoteEndpoint>, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = self.connect_error.lock().clone() {
            return Err(SshError::AuthenticationFailed(message));
        }
        let endpoint = Arc::new(FakeEndpoint::new());
        self.endpoints.lock().push(endpoint.clone());
        Ok(endpoint)
    }

    async fn open_sftp(&self, _config: &SshConfig) -> Result<Arc<dyn SftpBackend>, SftpError> {
        if self.fail_sftp.load(Ordering::SeqCst) {
            return Err(SftpError::SubsystemNotAvailable("sftp disabled".into()));
        }
        Ok(self.sftp.clone())
    }
}

type FileMap = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Filesystem held in memory; `/` always exists and `.` means `/`
pub struct MemorySftp {
    files: FileMap,
    dirs: Mutex<BTreeSet<String>>,
    links: Mutex<BTreeMap<String, String>>,
    write_gate: Mutex<Option<Arc<Semaphore>>>,
    bytes_read: AtomicUsize,
    closed: AtomicBool,
}

impl MemorySftp {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            files: Arc::new(Mutex::new(BTreeMap::new())),
            dirs: Mutex::new(dirs),
            links: Mutex::new(BTreeMap::new()),
            write_gate: Mutex::new(None),
            bytes_read: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a file, creating its parent directories
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let path = normalize(path);
        self.add_dir(&parent(&path));
        self.files.lock().insert(path, contents.to_vec());
    }

    /// Add a directory and its ancestors
    pub fn add_dir(&self, path: &str) {
        let mut current = normalize(path);
        let mut dirs = self.dirs.lock();
        while current != "/" {
            dirs.insert(current.clone());
            current = parent(&current);
        }
    }

    /// Add a symlink; `target` need not exist
    pub fn add_symlink(&self, path: &str, target: &str) {
        let path = normalize(path);
        self.add_dir(&parent(&path));
        self.links.lock().insert(path, normalize(target));
    }

    pub fn has_symlink(&self, path: &str) -> bool {
        self.links.lock().contains_key(&normalize(path))
    }

    /// From now on each write to a created file takes one permit from the
    /// returned semaphore, blocking until one is available
    pub fn gate_writes(&self, permits: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(permits));
        *self.write_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(&normalize(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().contains(&normalize(path))
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn has_children(&self, dir: &str) -> bool {
        let files = self.files.lock();
        let dirs = self.dirs.lock();
        let links = self.links.lock();
        files
            .keys()
            .chain(dirs.iter())
            .chain(links.keys())
            .any(|p| p != dir && parent(p) == dir)
    }

    /// Follow one level of symlink
    fn resolve(&self, path: String) -> String {
        self.links.lock().get(&path).cloned().unwrap_or(path)
    }

    fn file_contents(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.files
            .lock()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| SftpError::FileNotFound(path.to_string()))
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

#[async_trait]
impl SftpBackend for MemorySftp {
    async fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        let dir = normalize(path);
        if !self.has_dir(&dir) {
            return Err(SftpError::FileNotFound(path.to_string()));
        }

        let mut entries = Vec::new();
        for d in self.dirs.lock().iter() {
            if d != &dir && parent(d) == dir {
                entries.push(info(d, FileType::Directory, 0));
            }
        }
        for (f, contents) in self.files.lock().iter() {
            if parent(f) == dir {
                entries.push(info(f, FileType::File, contents.len() as u64));
            }
        }
        for (l, target) in self.links.lock().iter() {
            if parent(l) == dir {
                entries.push(info(l, FileType::Symlink, target.len() as u64));
            }
        }
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError> {
        let p = self.resolve(normalize(path));
        if self.has_dir(&p) {
            return Ok(info(&p, FileType::Directory, 0));
        }
        let size = self.file_contents(&p)?.len() as u64;
        Ok(info(&p, FileType::File, size))
    }

    async fn lstat(&self, path: &str) -> Result<FileInfo, SftpError> {
        let p = normalize(path);
        let target = self.links.lock().get(&p).cloned();
        match target {
            Some(target) => Ok(info(&p, FileType::Symlink, target.len() as u64)),
            None => self.stat(&p).await,
        }
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        let p = normalize(path);
        if self.has_dir(&p) || self.files.lock().contains_key(&p) {
            return Err(SftpError::ProtocolError(format!("{} already exists", path)));
        }
        if !self.has_dir(&parent(&p)) {
            return Err(SftpError::FileNotFound(parent(&p)));
        }
        self.dirs.lock().insert(p);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        let p = normalize(path);
        if self.links.lock().remove(&p).is_some() {
            return Ok(());
        }
        self.files
            .lock()
            .remove(&p)
            .map(|_| ())
            .ok_or_else(|| SftpError::FileNotFound(path.to_string()))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        let p = normalize(path);
        if !self.has_dir(&p) {
            return Err(SftpError::FileNotFound(path.to_string()));
        }
        if self.has_children(&p) {
            return Err(SftpError::ProtocolError("Directory not empty".into()));
        }
        self.dirs.lock().remove(&p);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let (from, to) = (normalize(from), normalize(to));
        let moved = self.files.lock().remove(&from);
        if let Some(contents) = moved {
            self.files.lock().insert(to, contents);
            return Ok(());
        }

        let mut dirs = self.dirs.lock();
        if dirs.remove(&from) {
            dirs.insert(to);
            Ok(())
        } else {
            Err(SftpError::FileNotFound(from))
        }
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError> {
        let p = normalize(path);
        if !self.has_dir(&parent(&p)) {
            return Err(SftpError::FileNotFound(parent(&p)));
        }
        Ok(Box::new(MemoryWriter {
            path: p,
            buffer: Vec::new(),
            files: self.files.clone(),
            gate: self.write_gate.lock().clone(),
            waiting: None,
        }))
    }

    async fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>, SftpError> {
        let mut contents = self.file_contents(path)?;
        contents.truncate(len);
        self.bytes_read.fetch_add(contents.len(), Ordering::SeqCst);
        Ok(contents)
    }

    async fn read_all(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        let contents = self.file_contents(path)?;
        self.bytes_read.fetch_add(contents.len(), Ordering::SeqCst);
        Ok(contents)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn info(path: &str, kind: FileType, size: u64) -> FileInfo {
    FileInfo {
        name: file_name(path).to_string(),
        path: join_remote_path(&parent(path), file_name(path)),
        kind,
        size,
        modified: 0,
        permissions: if kind == FileType::Directory { "755" } else { "644" }.to_string(),
    }
}

type Acquire = Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

/// Buffers writes and publishes the file on shutdown
struct MemoryWriter {
    path: String,
    buffer: Vec<u8>,
    files: FileMap,
    gate: Option<Arc<Semaphore>>,
    waiting: Option<Acquire>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(gate) = &this.gate {
            let acquire = this
                .waiting
                .get_or_insert_with(|| Box::pin(gate.clone().acquire_owned()));
            let acquired = match acquire.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(acquired) => acquired,
            };
            this.waiting = None;
            match acquired {
                Ok(permit) => permit.forget(),
                Err(_) => return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            }
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.files
            .lock()
            .insert(this.path.clone(), std::mem::take(&mut this.buffer));
        Poll::Ready(Ok(()))
    }
}
