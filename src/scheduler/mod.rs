//! Scan job scheduler: admission control, worker pool and live status.
//!
//! # Overview
//!
//! [`ScanScheduler::queue_scan`] resolves the root, admits the job on the
//! [`StatusBoard`] (at most one queued or scanning job per root) and pushes
//! it onto a FIFO channel. A fixed pool of worker threads pulls jobs off the
//! channel and runs them to a terminal state:
//!
//! ```text
//! queued -> scanning -> completed | failed | cancelled
//! ```
//!
//! A running job connects through the root's protocol connector, walks the
//! tree and feeds every entry to a [`CatalogWriter`]. Submission never blocks
//! on a scan; execution-time errors are only visible through the job status.

mod cancel;
mod job;
mod status;

pub use cancel::CancelToken;
pub use job::{JobId, ScanJob, ScanRequest, ScanType};
pub use status::{ScanState, ScanStatus, StatusBoard, Termination};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};

use crate::catalog::{
    CatalogError, CatalogStore, CatalogWriter, ChangeObserver, EntryOutcome, ReconcileSummary,
};
use crate::error::ScanError;
use crate::registry::{Protocol, RootId, RootRegistry};
use crate::walker::path_utils;
use crate::walker::{
    walk, Connector, ConnectorSet, DiscoveredEntry, EntrySink, RetryPolicy, Session,
    TraversalPlan, WalkError, WalkFailure, WalkOutcome,
};

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Number of worker threads
    pub workers: usize,
    /// Terminal statuses kept for polling
    pub retained_statuses: usize,
    /// Backoff for transient walker errors
    pub retry: RetryPolicy,
    /// Deadline applied to jobs that do not carry their own
    pub job_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            retained_statuses: 256,
            retry: RetryPolicy::default(),
            job_timeout: None,
        }
    }
}

#[derive(Debug)]
struct JobHandle {
    cancel: CancelToken,
    reason: Option<String>,
}

struct Shared {
    registry: RootRegistry,
    catalog: Arc<dyn CatalogStore>,
    observer: Arc<dyn ChangeObserver>,
    connectors: RwLock<ConnectorSet>,
    board: StatusBoard,
    handles: Mutex<HashMap<JobId, JobHandle>>,
    retry: RetryPolicy,
    job_timeout: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs scan jobs on a bounded pool of worker threads.
pub struct ScanScheduler {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<ScanJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("workers", &lock(&self.workers).len())
            .field("accepting", &lock(&self.sender).is_some())
            .finish()
    }
}

impl ScanScheduler {
    /// Start the worker pool.
    ///
    /// # Errors
    ///
    /// Fails if a worker thread cannot be spawned.
    pub fn start(
        registry: RootRegistry,
        catalog: Arc<dyn CatalogStore>,
        observer: Arc<dyn ChangeObserver>,
        connectors: ConnectorSet,
        options: SchedulerOptions,
    ) -> Result<Self, ScanError> {
        let shared = Arc::new(Shared {
            registry,
            catalog,
            observer,
            connectors: RwLock::new(connectors),
            board: StatusBoard::new(options.retained_statuses),
            handles: Mutex::new(HashMap::new()),
            retry: options.retry,
            job_timeout: options.job_timeout,
        });

        let (sender, receiver) = crossbeam_channel::unbounded::<ScanJob>();
        let count = options.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let shared = Arc::clone(&shared);
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("scan-worker-{index}"))
                .spawn(move || worker_loop(index, &shared, &receiver))?;
            workers.push(handle);
        }
        log::debug!("Started {count} scan workers");

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Admit a scan request and return its job ID without waiting for it.
    ///
    /// # Errors
    ///
    /// - [`ScanError::RootNotFound`]: unknown root; no status is created
    /// - [`ScanError::InvalidConfiguration`]: disabled root or bad sub-path
    /// - [`ScanError::AlreadyScanning`]: the root has a queued or running job
    /// - [`ScanError::ShuttingDown`]: the pool is stopping
    pub fn queue_scan(&self, request: ScanRequest) -> Result<JobId, ScanError> {
        let Some(sender) = lock(&self.sender).clone() else {
            return Err(ScanError::ShuttingDown);
        };

        let root = self
            .shared
            .registry
            .find(&request.root)?
            .ok_or_else(|| ScanError::RootNotFound(request.root.clone()))?;
        if !root.enabled {
            return Err(ScanError::InvalidConfiguration(format!(
                "storage root '{}' is disabled",
                root.name
            )));
        }

        let path = match request.path.as_deref() {
            None => path_utils::ROOT_PATH.to_string(),
            Some(p) if p.split('/').any(|segment| segment == "..") => {
                return Err(ScanError::InvalidConfiguration(format!(
                    "scan path '{p}' must not contain '..'"
                )));
            }
            Some(p) => path_utils::canonicalize(p),
        };

        let job = ScanJob {
            id: JobId::generate(),
            max_depth: request.max_depth.unwrap_or(root.max_depth),
            root,
            scan_type: request.scan_type,
            path,
            timeout: request.timeout.or(self.shared.job_timeout),
            submitted_at: Utc::now(),
            cancel: CancelToken::new(),
        };

        if let Err(holder) = self.shared.board.admit(ScanStatus::queued(&job)) {
            log::info!(
                "Rejected scan of '{}': job {holder} is still active",
                job.root.name
            );
            return Err(ScanError::AlreadyScanning {
                root: job.root.name,
                job_id: holder,
            });
        }
        lock(&self.shared.handles).insert(
            job.id.clone(),
            JobHandle {
                cancel: job.cancel.clone(),
                reason: None,
            },
        );

        let id = job.id.clone();
        log::info!(
            "Queued {} scan {id} of '{}' ({}) from {} to depth {}",
            job.scan_type,
            job.root.name,
            job.root.protocol,
            job.path,
            job.max_depth
        );
        if sender.send(job).is_err() {
            lock(&self.shared.handles).remove(&id);
            self.shared
                .board
                .finish(&id, Termination::cancelled("scheduler shut down"));
            return Err(ScanError::ShuttingDown);
        }
        Ok(id)
    }

    /// Copy of one job's status; `None` if it never existed or was evicted.
    #[must_use]
    pub fn get_active_scan_status(&self, job: &JobId) -> Option<ScanStatus> {
        self.shared.board.get(job)
    }

    /// Copies of every retained status, running and terminal.
    #[must_use]
    pub fn get_all_active_scan_statuses(&self) -> HashMap<JobId, ScanStatus> {
        self.shared.board.all()
    }

    /// The queued or running job of a root.
    #[must_use]
    pub fn active_job(&self, root: RootId) -> Option<JobId> {
        self.shared.board.active_job(root)
    }

    /// Request cancellation of a job. Queued jobs end immediately; running
    /// jobs stop at their next cancellation check.
    ///
    /// Returns false when the job had already finished.
    ///
    /// # Errors
    ///
    /// [`ScanError::JobNotFound`] when no status is retained for the job.
    pub fn cancel_job(&self, job: &JobId) -> Result<bool, ScanError> {
        self.cancel_with_reason(job, "cancelled by request")
    }

    fn cancel_with_reason(&self, job: &JobId, reason: &str) -> Result<bool, ScanError> {
        let status = self
            .shared
            .board
            .get(job)
            .ok_or_else(|| ScanError::JobNotFound(job.clone()))?;
        if status.state.is_terminal() {
            return Ok(false);
        }

        if let Some(handle) = lock(&self.shared.handles).get_mut(job) {
            handle.reason.get_or_insert_with(|| reason.to_string());
            handle.cancel.cancel();
        }
        if self
            .shared
            .board
            .finish_if_queued(job, Termination::cancelled(reason))
        {
            lock(&self.shared.handles).remove(job);
        }
        log::info!("Cancelling scan {job}: {reason}");
        Ok(true)
    }

    /// Cancel whatever job holds `root`. Returns the job's ID, if any.
    pub fn cancel_root(&self, root: RootId, reason: &str) -> Option<JobId> {
        let job = self.shared.board.active_job(root)?;
        match self.cancel_with_reason(&job, reason) {
            Ok(_) => Some(job),
            Err(_) => None,
        }
    }

    /// Block until a job is terminal or `timeout` passes.
    #[must_use]
    pub fn wait_for(&self, job: &JobId, timeout: Option<Duration>) -> Option<ScanStatus> {
        self.shared.board.wait_for(job, timeout)
    }

    /// Plug in (or replace) the connector for a protocol. Jobs dispatched
    /// afterwards use it.
    pub fn register_connector(&self, protocol: Protocol, connector: Arc<dyn Connector>) {
        self.shared
            .connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(protocol, connector);
        log::debug!("Registered connector for {protocol}");
    }

    /// Protocols that currently have a connector.
    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        self.shared
            .connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .protocols()
    }

    /// Stop accepting jobs, cancel everything in flight and join the workers.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };
        for (job, handle) in lock(&self.shared.handles).iter_mut() {
            log::debug!("Cancelling scan {job} for shutdown");
            handle.reason.get_or_insert_with(|| "scheduler shut down".to_string());
            handle.cancel.cancel();
        }
        drop(sender);

        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                log::error!("A scan worker panicked");
            }
        }
        log::debug!("Scan workers stopped");
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: &Shared, receiver: &Receiver<ScanJob>) {
    log::trace!("scan-worker-{index} ready");
    for job in receiver.iter() {
        shared.run(job);
    }
    log::trace!("scan-worker-{index} exiting");
}

/// Outcome of a job that did not fail.
enum JobEnd {
    Completed,
    Cancelled,
}

impl Shared {
    fn run(&self, job: ScanJob) {
        if job.cancel.is_cancelled() || !self.board.start(&job.id) {
            let reason = self.take_reason(&job.id);
            self.board.finish(
                &job.id,
                Termination::cancelled(reason.unwrap_or_else(|| "cancelled".to_string())),
            );
            log::debug!("Skipped scan {}: cancelled while queued", job.id);
            return;
        }

        let cancel = match job.timeout {
            Some(timeout) => job.cancel.expiring_after(timeout),
            None => job.cancel.clone(),
        };
        log::info!("Scanning '{}' as job {}", job.root.name, job.id);
        let result = self.execute(&job, &cancel);

        // A job that committed its sweep is completed, whatever the token
        // says by now; the cancel reason only explains an unswept stop.
        let reason = self.take_reason(&job.id);
        let end = match result {
            Ok(JobEnd::Completed) => Termination::completed(),
            Ok(JobEnd::Cancelled) | Err(_) if cancel.was_requested() => {
                Termination::cancelled(reason.unwrap_or_else(|| "cancelled".to_string()))
            }
            Ok(JobEnd::Cancelled) | Err(_) if cancel.timed_out() => Termination::cancelled(
                format!("deadline of {:?} exceeded", job.timeout.unwrap_or_default()),
            ),
            Ok(JobEnd::Cancelled) => Termination::cancelled("cancelled"),
            Err(e) => Termination::failed(e.kind(), e.to_string()),
        };

        match end.state {
            ScanState::Failed => log::error!(
                "Scan {} of '{}' failed: {}",
                job.id,
                job.root.name,
                end.message.as_deref().unwrap_or_default()
            ),
            state => log::info!("Scan {} of '{}' {state}", job.id, job.root.name),
        }
        self.board.finish(&job.id, end);
    }

    fn take_reason(&self, job: &JobId) -> Option<String> {
        lock(&self.handles).remove(job).and_then(|h| h.reason)
    }

    fn execute(&self, job: &ScanJob, cancel: &CancelToken) -> Result<JobEnd, ScanError> {
        let connector = self
            .connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job.root.protocol)
            .ok_or(WalkError::Unsupported(job.root.protocol))?;

        let endpoint = job.root.endpoint();
        let mut session = self
            .retry
            .run(cancel, &format!("connect {endpoint}"), || {
                connector.connect(&job.root)
            })?;
        log::debug!("Connected to {endpoint}");

        let result = self.reconcile(job, cancel, session.as_mut());
        session.close();
        result
    }

    fn reconcile(
        &self,
        job: &ScanJob,
        cancel: &CancelToken,
        session: &mut dyn Session,
    ) -> Result<JobEnd, ScanError> {
        let plan = TraversalPlan::new(&job.path, job.max_depth)
            .with_retry(self.retry)
            .with_excludes(&job.root.exclude_patterns)?;

        let writer = CatalogWriter::begin(
            self.catalog.as_ref(),
            self.observer.as_ref(),
            job.root.id,
            job.scan_type,
            &plan.start,
        )?;
        let mut sink = StatusSink {
            writer,
            board: &self.board,
            job: &job.id,
        };

        let outcome = walk(session, &plan, cancel, &mut sink);
        let StatusSink { writer, .. } = sink;
        let (directories, failed_subtrees) = match outcome {
            Ok(WalkOutcome::Completed {
                directories,
                failed_subtrees,
            }) => (directories, failed_subtrees),
            Ok(WalkOutcome::Cancelled) => {
                self.publish(&job.id, &writer.abandon());
                return Ok(JobEnd::Cancelled);
            }
            Err(WalkFailure::Walk(e)) => {
                self.publish(&job.id, &writer.abandon());
                return Err(e.into());
            }
            Err(WalkFailure::Sink(e)) => {
                self.publish(&job.id, &writer.abandon());
                return Err(e.into());
            }
        };

        let summary = writer.finish()?;
        self.publish(&job.id, &summary);
        log::debug!(
            "Job {}: listed {directories} directories, {} failed subtrees",
            job.id,
            failed_subtrees.len()
        );
        if let Err(e) = self.registry.mark_scanned(job.root.id, Utc::now()) {
            log::warn!("Cannot stamp last scan time of '{}': {e}", job.root.name);
        }
        Ok(JobEnd::Completed)
    }

    /// Copy a reconciliation's final counters onto the job status.
    fn publish(&self, job: &JobId, summary: &ReconcileSummary) {
        self.board.update(job, |s| {
            s.files_updated = summary.inserted + summary.updated;
            s.files_deleted = summary.deleted;
            s.error_count = summary.error_count();
        });
    }
}

/// Feeds the catalog writer and mirrors its progress onto the job status.
struct StatusSink<'a> {
    writer: CatalogWriter<'a>,
    board: &'a StatusBoard,
    job: &'a JobId,
}

impl EntrySink for StatusSink<'_> {
    type Error = CatalogError;

    fn entry(
        &mut self,
        entry: &DiscoveredEntry,
        session: &mut dyn Session,
    ) -> Result<(), CatalogError> {
        let is_file = !entry.is_dir;
        if is_file {
            self.board.update(self.job, |s| s.files_found += 1);
        }
        let outcome = self.writer.apply(entry, session)?;

        let summary = self.writer.summary();
        let updated = summary.inserted + summary.updated;
        let errors = summary.error_count();
        self.board.update(self.job, |s| {
            if is_file {
                s.files_processed += 1;
            }
            s.files_updated = updated;
            s.error_count = errors;
        });
        if outcome == EntryOutcome::Failed {
            log::debug!("Job {}: could not record {}", self.job, entry.path);
        }
        Ok(())
    }

    fn directory(&mut self, path: &str) {
        self.board
            .update(self.job, |s| s.current_path = Some(path.to_string()));
    }

    fn subtree_failed(&mut self, path: &str, error: &WalkError) {
        self.writer.subtree_failed(path, error);
        let errors = self.writer.summary().error_count();
        self.board.update(self.job, |s| s.error_count = errors);
    }

    fn entry_failed(&mut self, path: &str, error: &WalkError) {
        self.writer.entry_failed(path, error);
        let errors = self.writer.summary().error_count();
        self.board.update(self.job, |s| s.error_count = errors);
    }
}
