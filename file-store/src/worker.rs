use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, write::GzEncoder};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::locks::UserLocks;
use crate::registry::{CompressionJobRegistry, JobStatus, JobTicket};

pub const ARTIFACT_SUFFIX: &str = ".gz";

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_READ: u8 = 10;
const PROGRESS_COMPRESSED: u8 = 90;

#[derive(Debug, thiserror::Error)]
enum CompressionError {
    #[error("failed to read source: {0}")]
    Read(#[source] io::Error),

    #[error("failed to compress: {0}")]
    Compress(#[source] io::Error),

    #[error("failed to write artifact: {0}")]
    Write(#[source] io::Error),

    #[error("compression task aborted: {0}")]
    Aborted(#[from] JoinError),
}

/// Runs compression jobs in the background and keeps the registry current.
#[derive(Debug, Clone)]
pub struct CompressionWorker {
    registry: CompressionJobRegistry,
    locks: UserLocks,
}

impl CompressionWorker {
    pub fn new(registry: CompressionJobRegistry, locks: UserLocks) -> Self {
        CompressionWorker { registry, locks }
    }

    /// Registers a job for `username` and starts it on a detached task.
    ///
    /// The registry shows `InProgress` before this returns. Jobs of the same user
    /// queue behind each other; the handle is only useful for tests, callers drop it.
    /// Callers that just wrote `source` should still hold the user's lock here, so
    /// an earlier job of the same file cannot pick up the new bytes unregistered.
    pub async fn dispatch(&self, username: &str, source: PathBuf) -> JoinHandle<()> {
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ticket = self.registry.begin(username, &file_name).await;
        tracing::info!(user = username, path = %source.display(), "Compression job queued");

        let worker = self.clone();
        tokio::spawn(async move { worker.run(ticket, source).await })
    }

    async fn run(&self, ticket: JobTicket, source: PathBuf) {
        let _guard = self.locks.lock(&ticket.username).await;
        if self.registry.is_superseded(&ticket).await {
            tracing::info!(user = %ticket.username, path = %source.display(), "Newer upload queued, skipping compression");
        } else {
            self.process(&ticket, &source).await;
        }
        self.registry.finish(&ticket).await;
    }

    async fn process(&self, ticket: &JobTicket, source: &Path) {
        tracing::info!(user = %ticket.username, path = %source.display(), "Starting compression");
        self.report(ticket, JobStatus::InProgress, 0).await;

        match self.compress(ticket, source).await {
            Ok(artifact) => {
                // the original goes before Complete is published; a failed delete is not a failed job
                if let Err(err) = tokio::fs::remove_file(source).await {
                    tracing::warn!(path = %source.display(), "Error deleting original file: {}", err);
                }
                self.report(ticket, JobStatus::Complete, 100).await;
                tracing::info!(user = %ticket.username, path = %artifact.display(), "Compression complete");
            }
            Err(err) => {
                tracing::error!(user = %ticket.username, path = %source.display(), "Compression error: {}", err);
                self.report(ticket, JobStatus::Error, 100).await;
            }
        }
    }

    async fn compress(&self, ticket: &JobTicket, source: &Path) -> Result<PathBuf, CompressionError> {
        let data = tokio::fs::read(source).await.map_err(CompressionError::Read)?;
        self.report(ticket, JobStatus::InProgress, PROGRESS_READ).await;

        let (progress_tx, mut progress_rx) = watch::channel(PROGRESS_READ);
        let mut task = tokio::task::spawn_blocking(move || {
            gzip(&data, |progress| {
                let _ = progress_tx.send(progress);
            })
        });

        let compressed = loop {
            tokio::select! {
                joined = &mut task => break joined?.map_err(CompressionError::Compress)?,
                Ok(()) = progress_rx.changed() => {
                    let progress = *progress_rx.borrow_and_update();
                    self.report(ticket, JobStatus::InProgress, progress).await;
                }
            }
        };

        let artifact = artifact_path(source);
        if let Err(err) = tokio::fs::write(&artifact, &compressed).await {
            let _ = tokio::fs::remove_file(&artifact).await;
            return Err(CompressionError::Write(err));
        }
        Ok(artifact)
    }

    async fn report(&self, ticket: &JobTicket, status: JobStatus, progress: u8) {
        if !self.registry.report(ticket, status, progress).await {
            tracing::debug!(user = %ticket.username, file = %ticket.file_name, "Job superseded, status not recorded");
        }
    }
}

/// `<source>.gz`, beside the source.
pub fn artifact_path(source: &Path) -> PathBuf {
    let mut name: OsString = source.as_os_str().to_owned();
    name.push(ARTIFACT_SUFFIX);
    PathBuf::from(name)
}

/// Gzip at maximum level, calling `on_progress` with a value in
/// `PROGRESS_READ..=PROGRESS_COMPRESSED` after each chunk.
pub fn gzip(data: &[u8], mut on_progress: impl FnMut(u8)) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::best());
    let total = data.len().max(1);
    let span = (PROGRESS_COMPRESSED - PROGRESS_READ) as usize;
    let mut done = 0;

    for chunk in data.chunks(CHUNK_SIZE) {
        encoder.write_all(chunk)?;
        done += chunk.len();
        on_progress(PROGRESS_READ + (done * span / total) as u8);
    }

    encoder.finish()
}
