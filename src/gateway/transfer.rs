//! Transfer Orchestrator
//!
//! One worker task per ready connection executes file operations strictly
//! one at a time, in the order they were submitted. The worker first waits
//! for its SFTP backend to come up; requests submitted meanwhile are queued.
//! If the backend cannot be opened, everything queued fails with
//! `NotConnected` and later submissions are refused.
//!
//! Shutting the worker down stops it from picking up new requests. An
//! operation already running is allowed to finish; its events carry the old
//! generation and are dropped by the connection manager.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::GatewayError;
use super::events::{Generation, LinkEvent, TransferEvent};
use crate::sftp::path_utils::component_prefixes;
use crate::sftp::{
    sort_entries, SftpBackend, SftpError, TransferDirection, TransferProgress,
};

/// Resolves to an initialized backend for the worker
pub type BackendInit = BoxFuture<'static, Result<Arc<dyn SftpBackend>, SftpError>>;

/// A queued file operation
#[derive(Debug, Clone, PartialEq)]
pub enum TransferRequest {
    List { dir: String },
    Mkdir { dir: String, recursive: bool },
    Delete { path: String },
    Rename { from: String, to: String },
    Upload { remote_path: String, data: Bytes },
    Download { remote_path: String },
    Preview { remote_path: String, length: usize },
}

impl TransferRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            TransferRequest::List { .. } => "list",
            TransferRequest::Mkdir { .. } => "mkdir",
            TransferRequest::Delete { .. } => "delete",
            TransferRequest::Rename { .. } => "rename",
            TransferRequest::Upload { .. } => "upload",
            TransferRequest::Download { .. } => "download",
            TransferRequest::Preview { .. } => "preview",
        }
    }

    /// Path the operation is about (the source, for renames)
    pub fn path(&self) -> &str {
        match self {
            TransferRequest::List { dir } | TransferRequest::Mkdir { dir, .. } => dir,
            TransferRequest::Delete { path } => path,
            TransferRequest::Rename { from, .. } => from,
            TransferRequest::Upload { remote_path, .. }
            | TransferRequest::Download { remote_path }
            | TransferRequest::Preview { remote_path, .. } => remote_path,
        }
    }

    fn failed(&self, error: GatewayError) -> TransferEvent {
        TransferEvent::Failed {
            operation: self.operation(),
            path: self.path().to_string(),
            error,
        }
    }
}

struct TransferWorker {
    queue: mpsc::UnboundedSender<TransferRequest>,
    cancel: CancellationToken,
}

pub struct TransferOrchestrator {
    worker: Option<TransferWorker>,
    chunk_size: usize,
}

impl TransferOrchestrator {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            worker: None,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Start a worker that waits for `init`, then serves the queue
    pub fn start(
        &mut self,
        init: BackendInit,
        generation: Generation,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) {
        self.shutdown();

        let (queue, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let emitter = Emitter { generation, events };

        tokio::spawn(run_worker(
            init,
            queue_rx,
            cancel.clone(),
            self.chunk_size,
            emitter,
        ));

        self.worker = Some(TransferWorker { queue, cancel });
    }

    /// Queue an operation for the current worker
    pub fn submit(&self, request: TransferRequest) -> Result<(), GatewayError> {
        let worker = self.worker.as_ref().ok_or(GatewayError::NotConnected)?;
        worker
            .queue
            .send(request)
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Stop the worker; queued requests are abandoned
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

impl Drop for TransferOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
struct Emitter {
    generation: Generation,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Emitter {
    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(LinkEvent::Transfer {
            generation: self.generation,
            event,
        });
    }
}

async fn run_worker(
    init: BackendInit,
    mut queue: mpsc::UnboundedReceiver<TransferRequest>,
    cancel: CancellationToken,
    chunk_size: usize,
    emitter: Emitter,
) {
    let backend = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Transfer worker cancelled during initialization");
            return;
        }
        result = init => result,
    };

    let backend = match backend {
        Ok(backend) => backend,
        Err(e) => {
            warn!("Transfer backend unavailable: {}", e);
            // Refuse new submissions before reporting, then fail what is already queued
            queue.close();
            emitter.emit(TransferEvent::Failed {
                operation: "sftp",
                path: String::new(),
                error: GatewayError::from(e),
            });
            while let Ok(request) = queue.try_recv() {
                emitter.emit(request.failed(GatewayError::NotConnected));
            }
            return;
        }
    };

    info!("Transfer worker ready");
    emitter.emit(TransferEvent::Ready);

    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        debug!("Transfer {} {}", request.operation(), request.path());
        if let Err(e) = execute(backend.as_ref(), &request, chunk_size, &emitter).await {
            warn!("Transfer {} {} failed: {}", request.operation(), request.path(), e);
            emitter.emit(request.failed(GatewayError::from(e)));
        }
    }

    backend.close().await;
    debug!("Transfer worker stopped");
}

async fn execute(
    backend: &dyn SftpBackend,
    request: &TransferRequest,
    chunk_size: usize,
    emitter: &Emitter,
) -> Result<(), SftpError> {
    match request {
        TransferRequest::List { dir } => {
            let mut entries = backend.list_dir(dir).await?;
            sort_entries(&mut entries);
            emitter.emit(TransferEvent::Files {
                dir: dir.clone(),
                entries,
            });
        }

        TransferRequest::Mkdir { dir, recursive } => {
            if *recursive {
                for prefix in component_prefixes(dir) {
                    match backend.stat(&prefix).await {
                        Ok(info) if info.is_dir() => {}
                        Ok(_) => return Err(SftpError::NotADirectory(prefix)),
                        Err(_) => backend.create_dir(&prefix).await?,
                    }
                }
            } else {
                backend.create_dir(dir).await?;
            }
            emitter.emit(TransferEvent::DirCreated { dir: dir.clone() });
        }

        TransferRequest::Delete { path } => {
            // A link is removed itself, whatever it points at
            if backend.lstat(path).await?.is_dir() {
                backend.remove_dir(path).await?;
            } else {
                backend.remove_file(path).await?;
            }
            emitter.emit(TransferEvent::Deleted { path: path.clone() });
        }

        TransferRequest::Rename { from, to } => {
            backend.rename(from, to).await?;
            emitter.emit(TransferEvent::Renamed {
                from: from.clone(),
                to: to.clone(),
            });
        }

        TransferRequest::Upload { remote_path, data } => {
            upload(backend, remote_path, data, chunk_size, emitter).await?;
            emitter.emit(TransferEvent::UploadComplete {
                remote_path: remote_path.clone(),
            });
        }

        TransferRequest::Download { remote_path } => {
            let data = backend.read_all(remote_path).await?;
            info!("Downloaded {} bytes from {}", data.len(), remote_path);
            emitter.emit(TransferEvent::Downloaded {
                remote_path: remote_path.clone(),
                data: Bytes::from(data),
            });
        }

        TransferRequest::Preview {
            remote_path,
            length,
        } => {
            let head = backend.read_head(remote_path, *length).await?;
            emitter.emit(TransferEvent::Preview {
                remote_path: remote_path.clone(),
                content: String::from_utf8_lossy(&head).into_owned(),
            });
        }
    }

    Ok(())
}

/// Write `data` chunk by chunk, reporting progress after each chunk
async fn upload(
    backend: &dyn SftpBackend,
    remote_path: &str,
    data: &Bytes,
    chunk_size: usize,
    emitter: &Emitter,
) -> Result<(), SftpError> {
    let total = data.len() as u64;
    let progress = |transferred: u64| {
        TransferEvent::Progress(TransferProgress {
            direction: TransferDirection::Upload,
            remote_path: remote_path.to_string(),
            transferred,
            total,
        })
    };

    let mut writer = backend.create(remote_path).await?;

    if data.is_empty() {
        emitter.emit(progress(0));
    }

    let mut transferred = 0u64;
    for chunk in data.chunks(chunk_size) {
        writer
            .write_all(chunk)
            .await
            .map_err(|e| SftpError::WriteError(e.to_string()))?;
        transferred += chunk.len() as u64;
        emitter.emit(progress(transferred));
    }

    writer
        .shutdown()
        .await
        .map_err(|e| SftpError::WriteError(e.to_string()))?;

    info!("Uploaded {} bytes to {}", total, remote_path);
    Ok(())
}
