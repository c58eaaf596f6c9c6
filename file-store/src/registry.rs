use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// Latest compression job of one user, as seen by pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionJob {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CompressionJob {
    pub fn new(status: JobStatus, progress: u8, file_name: Option<String>) -> Self {
        CompressionJob {
            status,
            progress: progress.min(100),
            file_name,
            updated_at: Some(Utc::now()),
        }
    }
}

impl Default for CompressionJob {
    fn default() -> Self {
        CompressionJob {
            status: JobStatus::NotStarted,
            progress: 0,
            file_name: None,
            updated_at: None,
        }
    }
}

/// Claim on a user's job slot, handed to the worker that owns the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub username: String,
    pub file_name: String,
    id: u64,
}

#[derive(Debug)]
struct Slot {
    ticket: u64,
    job: CompressionJob,
}

#[derive(Debug, Default)]
struct Jobs {
    slots: HashMap<String, Slot>,
    queued: HashMap<(String, String), Queued>,
}

// Newest ticket per (username, file name) and how many jobs for it are unfinished.
#[derive(Debug)]
struct Queued {
    latest: u64,
    pending: usize,
}

/// Process-wide map from username to the latest compression job.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct CompressionJobRegistry {
    jobs: Arc<RwLock<Jobs>>,
    next_ticket: Arc<AtomicU64>,
}

impl CompressionJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, username: &str) -> CompressionJob {
        self.jobs
            .read()
            .await
            .slots
            .get(username)
            .map(|slot| slot.job.clone())
            .unwrap_or_default()
    }

    /// Unconditional overwrite of the user's slot.
    pub async fn set(&self, username: &str, job: CompressionJob) {
        let ticket = self.allocate();
        self.jobs
            .write()
            .await
            .slots
            .insert(username.to_string(), Slot { ticket, job });
    }

    /// Starts a new job for `username`, replacing whatever the slot held.
    ///
    /// The slot reads `InProgress` at 0 from this point on, even if the worker
    /// has to wait behind an earlier job of the same user.
    pub async fn begin(&self, username: &str, file_name: &str) -> JobTicket {
        let id = self.allocate();
        let job = CompressionJob::new(JobStatus::InProgress, 0, Some(file_name.to_string()));
        let mut jobs = self.jobs.write().await;
        jobs.slots.insert(username.to_string(), Slot { ticket: id, job });
        let queued = jobs
            .queued
            .entry((username.to_string(), file_name.to_string()))
            .or_insert(Queued { latest: id, pending: 0 });
        queued.latest = id;
        queued.pending += 1;

        JobTicket {
            username: username.to_string(),
            file_name: file_name.to_string(),
            id,
        }
    }

    /// Records progress for the ticket's job. Returns `false` and changes nothing
    /// when a newer job has taken over the slot.
    pub async fn report(&self, ticket: &JobTicket, status: JobStatus, progress: u8) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.slots.get_mut(&ticket.username) {
            Some(slot) if slot.ticket == ticket.id => {
                slot.job = CompressionJob::new(status, progress, Some(ticket.file_name.clone()));
                true
            }
            _ => false,
        }
    }

    /// Whether a later upload of the same file was queued after this ticket.
    ///
    /// The later job compresses whatever is on disk, so this one has nothing to do.
    pub async fn is_superseded(&self, ticket: &JobTicket) -> bool {
        self.jobs
            .read()
            .await
            .queued
            .get(&(ticket.username.clone(), ticket.file_name.clone()))
            .is_some_and(|queued| queued.latest != ticket.id)
    }

    /// Marks the ticket's job as done, whether it ran or was skipped.
    pub async fn finish(&self, ticket: &JobTicket) {
        let key = (ticket.username.clone(), ticket.file_name.clone());
        let mut jobs = self.jobs.write().await;
        if let Some(queued) = jobs.queued.get_mut(&key) {
            queued.pending = queued.pending.saturating_sub(1);
            if queued.pending == 0 {
                jobs.queued.remove(&key);
            }
        }
    }

    fn allocate(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1
    }
}
