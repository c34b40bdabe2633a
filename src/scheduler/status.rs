//! Live and terminal job statuses.
//!
//! The [`StatusBoard`] is the only owner of [`ScanStatus`] values. Every
//! read and write takes the single board lock for a short critical section;
//! readers get clones, so a caller iterating a snapshot never races a worker
//! bumping counters.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{JobId, ScanJob, ScanType};
use crate::error::ErrorKind;
use crate::registry::{Protocol, RootId};

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    /// Admitted, waiting for a worker
    Queued,
    /// A worker is running it
    Scanning,
    /// Finished normally
    Completed,
    /// Aborted by a fatal error
    Failed,
    /// Stopped by cancellation, root removal, deadline or shutdown
    Cancelled,
}

impl ScanState {
    /// Whether the job will never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scanning => "scanning",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    /// Job identifier
    pub job_id: JobId,
    /// Scanned root
    pub root_id: RootId,
    /// Root name at submission
    pub root_name: String,
    /// Root protocol at submission
    pub protocol: Protocol,
    /// Full or incremental
    pub scan_type: ScanType,
    /// Catalog path the walk starts from
    pub path: String,
    /// Lifecycle state
    pub state: ScanState,
    /// Files discovered so far
    pub files_found: u64,
    /// Files applied to the catalog so far, successfully or not
    pub files_processed: u64,
    /// Records inserted or rewritten
    pub files_updated: u64,
    /// Records soft-deleted by the sweep
    pub files_deleted: u64,
    /// Per-entry failures
    pub error_count: u64,
    /// Directory currently being listed
    pub current_path: Option<String>,
    /// Category of the error that ended the job
    pub error_kind: Option<ErrorKind>,
    /// Message of the error that ended the job
    pub last_error: Option<String>,
    /// Admission time
    pub queued_at: DateTime<Utc>,
    /// When a worker picked the job up
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanStatus {
    /// Initial `queued` status for an admitted job.
    #[must_use]
    pub fn queued(job: &ScanJob) -> Self {
        Self {
            job_id: job.id.clone(),
            root_id: job.root.id,
            root_name: job.root.name.clone(),
            protocol: job.root.protocol,
            scan_type: job.scan_type,
            path: job.path.clone(),
            state: ScanState::Queued,
            files_found: 0,
            files_processed: 0,
            files_updated: 0,
            files_deleted: 0,
            error_count: 0,
            current_path: None,
            error_kind: None,
            last_error: None,
            queued_at: job.submitted_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall time from start to finish (or to now while running).
    #[must_use]
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Terminal state
    pub state: ScanState,
    /// Error category, for failures
    pub kind: Option<ErrorKind>,
    /// Error or cancellation reason
    pub message: Option<String>,
}

impl Termination {
    /// Normal completion.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            state: ScanState::Completed,
            kind: None,
            message: None,
        }
    }

    /// Cancellation with a reason.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            state: ScanState::Cancelled,
            kind: None,
            message: Some(reason.into()),
        }
    }

    /// Failure.
    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            state: ScanState::Failed,
            kind: Some(kind),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Default)]
struct Board {
    statuses: HashMap<JobId, ScanStatus>,
    active_by_root: HashMap<RootId, JobId>,
    finished: VecDeque<JobId>,
}

/// Owner of every job status.
#[derive(Debug)]
pub struct StatusBoard {
    board: Mutex<Board>,
    changed: Condvar,
    retained: usize,
}

impl StatusBoard {
    /// A board keeping at most `retained` terminal statuses.
    #[must_use]
    pub fn new(retained: usize) -> Self {
        Self {
            board: Mutex::new(Board::default()),
            changed: Condvar::new(),
            retained,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a queued status unless its root already has an active job.
    ///
    /// # Errors
    ///
    /// Returns the ID of the job holding the root.
    pub fn admit(&self, status: ScanStatus) -> Result<(), JobId> {
        let mut board = self.lock();
        if let Some(existing) = board.active_by_root.get(&status.root_id) {
            return Err(existing.clone());
        }
        board
            .active_by_root
            .insert(status.root_id, status.job_id.clone());
        board.statuses.insert(status.job_id.clone(), status);
        drop(board);
        self.changed.notify_all();
        Ok(())
    }

    /// Move a queued job to `scanning`. Returns false if it is no longer
    /// queued (it was cancelled while waiting).
    pub fn start(&self, job: &JobId) -> bool {
        let mut board = self.lock();
        let Some(status) = board.statuses.get_mut(job) else {
            return false;
        };
        if status.state != ScanState::Queued {
            return false;
        }
        status.state = ScanState::Scanning;
        status.started_at = Some(Utc::now());
        drop(board);
        self.changed.notify_all();
        true
    }

    /// Mutate a running job's status. Terminal statuses are frozen.
    pub fn update(&self, job: &JobId, f: impl FnOnce(&mut ScanStatus)) {
        let mut board = self.lock();
        if let Some(status) = board.statuses.get_mut(job) {
            if !status.state.is_terminal() {
                f(status);
            }
        }
    }

    /// Move a job to a terminal state, releasing its root.
    ///
    /// Returns false if the job was unknown or already terminal.
    pub fn finish(&self, job: &JobId, end: Termination) -> bool {
        let mut board = self.lock();
        let Some(status) = board.statuses.get_mut(job) else {
            return false;
        };
        if status.state.is_terminal() {
            return false;
        }
        status.state = end.state;
        status.error_kind = end.kind;
        status.last_error = end.message;
        status.current_path = None;
        status.finished_at = Some(Utc::now());
        let root = status.root_id;

        if board.active_by_root.get(&root) == Some(job) {
            board.active_by_root.remove(&root);
        }
        board.finished.push_back(job.clone());
        while board.finished.len() > self.retained {
            if let Some(evicted) = board.finished.pop_front() {
                board.statuses.remove(&evicted);
            }
        }
        drop(board);
        self.changed.notify_all();
        true
    }

    /// Finish a job only if it has not started yet.
    pub fn finish_if_queued(&self, job: &JobId, end: Termination) -> bool {
        let queued = self
            .lock()
            .statuses
            .get(job)
            .is_some_and(|s| s.state == ScanState::Queued);
        // A worker may start the job between the check and the finish; the
        // running job then observes its cancelled token.
        queued && self.finish(job, end)
    }

    /// Copy of one job's status.
    #[must_use]
    pub fn get(&self, job: &JobId) -> Option<ScanStatus> {
        self.lock().statuses.get(job).cloned()
    }

    /// Copy of every retained status.
    #[must_use]
    pub fn all(&self) -> HashMap<JobId, ScanStatus> {
        self.lock().statuses.clone()
    }

    /// The queued or scanning job of a root.
    #[must_use]
    pub fn active_job(&self, root: RootId) -> Option<JobId> {
        self.lock().active_by_root.get(&root).cloned()
    }

    /// IDs of every queued or scanning job.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.lock().active_by_root.values().cloned().collect()
    }

    /// Block until the job is terminal or `timeout` passes, then return its
    /// status. `None` if the job is unknown.
    pub fn wait_for(&self, job: &JobId, timeout: Option<Duration>) -> Option<ScanStatus> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut board = self.lock();
        loop {
            let status = board.statuses.get(job)?;
            if status.state.is_terminal() {
                return Some(status.clone());
            }
            board = match deadline {
                None => self
                    .changed
                    .wait(board)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Some(status.clone());
                    }
                    self.changed
                        .wait_timeout(board, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
