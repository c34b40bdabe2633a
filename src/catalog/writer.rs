//! Mark-and-sweep reconciliation of one scan against the catalog.
//!
//! # Overview
//!
//! A [`CatalogWriter`] is created per scan with a fresh generation number.
//! Every entry the walker emits is applied immediately:
//!
//! - no live record at the path: insert, computing the content signature
//! - size or mtime changed, or a `full` scan: rewrite and re-sign
//! - unchanged under `incremental`: only stamp the generation
//!
//! [`CatalogWriter::finish`] then soft-deletes every live record beneath the
//! scan scope that was not observed this generation. Readers querying the
//! catalog during the stream phase see the previous state plus whatever has
//! been applied so far, never an empty catalog.
//!
//! Subtrees that could not be listed and entries that could not be stat'ed
//! are counted as failures and shielded from the sweep: not seeing them is
//! not evidence that they are gone.
//!
//! Failures to write one record are counted and the stream continues. A
//! store-wide failure ([`CatalogError::is_fatal`]) is returned to the caller,
//! which abandons the scan; rows committed before it stay valid.

use serde::Serialize;

use super::{CatalogChange, CatalogError, CatalogStore, ChangeObserver, FileRecord, Signature};
use crate::registry::RootId;
use crate::scheduler::ScanType;
use crate::walker::path_utils::{self, ROOT_PATH};
use crate::walker::{DiscoveredEntry, EntrySink, Session, WalkError};

/// What happened to one applied entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// A new live record was written.
    Inserted,
    /// The live record was rewritten with different content.
    Updated,
    /// The record only had its generation stamped (or was rewritten
    /// identically by a full scan).
    Unchanged,
    /// The record could not be written.
    Failed,
}

/// Counters for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Scan generation
    pub generation: u64,
    /// New records
    pub inserted: u64,
    /// Rewritten records
    pub updated: u64,
    /// Records confirmed unchanged
    pub unchanged: u64,
    /// Records soft-deleted by the sweep
    pub deleted: u64,
    /// Entries or subtrees that could not be processed
    pub failed: u64,
    /// Files written without a signature because reading them failed
    pub signature_failures: u64,
    /// Most recent per-entry failure message
    pub last_failure: Option<String>,
}

impl ReconcileSummary {
    /// Per-entry problems of any kind.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.failed + self.signature_failures
    }
}

/// Applies one scan's entries to the catalog.
pub struct CatalogWriter<'a> {
    store: &'a dyn CatalogStore,
    observer: &'a dyn ChangeObserver,
    root: RootId,
    scan_type: ScanType,
    scope: String,
    failed_subtrees: Vec<String>,
    failed_entries: Vec<String>,
    summary: ReconcileSummary,
}

impl<'a> CatalogWriter<'a> {
    /// Start reconciling `scope` (a catalog path) of `root`, allocating the
    /// next generation.
    ///
    /// # Errors
    ///
    /// Fails when the generation cannot be allocated.
    pub fn begin(
        store: &'a dyn CatalogStore,
        observer: &'a dyn ChangeObserver,
        root: RootId,
        scan_type: ScanType,
        scope: &str,
    ) -> Result<Self, CatalogError> {
        let generation = store.next_generation(root)?;
        log::debug!("Reconciling root #{root} scope {scope} as generation {generation}");
        Ok(Self {
            store,
            observer,
            root,
            scan_type,
            scope: path_utils::canonicalize(scope),
            failed_subtrees: Vec::new(),
            failed_entries: Vec::new(),
            summary: ReconcileSummary {
                generation,
                ..ReconcileSummary::default()
            },
        })
    }

    /// This scan's generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.summary.generation
    }

    /// Counters so far.
    #[must_use]
    pub fn summary(&self) -> &ReconcileSummary {
        &self.summary
    }

    fn record_failure(&mut self, message: String) -> EntryOutcome {
        log::warn!("{message}");
        self.summary.failed += 1;
        self.summary.last_failure = Some(message);
        EntryOutcome::Failed
    }

    /// Compute a file's signature, falling back to `previous` when the read
    /// fails but the file looks unchanged.
    fn sign(
        &mut self,
        entry: &DiscoveredEntry,
        session: &mut dyn Session,
        previous: Option<&FileRecord>,
    ) -> Option<Signature> {
        if entry.is_dir {
            return None;
        }
        match session.signature(&entry.path) {
            Ok(signature) => Some(signature),
            Err(e) => {
                let message = format!("Cannot read {}: {e}", entry.path);
                log::warn!("{message}");
                self.summary.signature_failures += 1;
                self.summary.last_failure = Some(message);
                previous
                    .filter(|r| r.matches(entry))
                    .and_then(|r| r.signature.clone())
            }
        }
    }

    /// Apply one discovered entry.
    ///
    /// # Errors
    ///
    /// Only fatal store errors; per-record failures are counted and reported
    /// as [`EntryOutcome::Failed`].
    pub fn apply(
        &mut self,
        entry: &DiscoveredEntry,
        session: &mut dyn Session,
    ) -> Result<EntryOutcome, CatalogError> {
        let generation = self.summary.generation;
        let existing = match self.store.find_live(self.root, &entry.path) {
            Ok(existing) => existing,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.record_failure(e.to_string())),
        };

        let outcome = match existing {
            None => {
                let signature = self.sign(entry, session, None);
                match self
                    .store
                    .insert(self.root, entry, signature.as_ref(), generation)
                {
                    Ok(record) => {
                        self.observer
                            .record_changed(&CatalogChange::Inserted(record));
                        self.summary.inserted += 1;
                        EntryOutcome::Inserted
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => self.record_failure(e.to_string()),
                }
            }
            Some(before) => {
                let unchanged = before.matches(entry);
                let signed = before.is_dir || before.signature.is_some();
                if unchanged && signed && self.scan_type == ScanType::Incremental {
                    match self.store.touch(before.id, generation) {
                        Ok(()) => {
                            self.summary.unchanged += 1;
                            EntryOutcome::Unchanged
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => self.record_failure(e.to_string()),
                    }
                } else {
                    let signature = self.sign(entry, session, Some(&before));
                    match self
                        .store
                        .update(&before, entry, signature.as_ref(), generation)
                    {
                        Ok(after) => {
                            let changed = before.size != after.size
                                || before.is_dir != after.is_dir
                                || before.signature != after.signature;
                            if changed || before.modified != after.modified {
                                self.summary.updated += 1;
                                if changed {
                                    self.observer.record_changed(&CatalogChange::Updated {
                                        before,
                                        after,
                                    });
                                }
                                EntryOutcome::Updated
                            } else {
                                self.summary.unchanged += 1;
                                EntryOutcome::Unchanged
                            }
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => self.record_failure(e.to_string()),
                    }
                }
            }
        };
        log::trace!("{} -> {outcome:?}", entry.path);
        Ok(outcome)
    }

    /// Note a subtree whose listing failed; its records survive the sweep.
    pub fn subtree_failed(&mut self, path: &str, error: &WalkError) {
        self.failed_subtrees.push(path.to_string());
        self.record_failure(format!("Cannot list {path}: {error}"));
    }

    /// Note a listed entry that could not be described. Its record, and
    /// anything beneath it, survives the sweep.
    pub fn entry_failed(&mut self, path: &str, error: &WalkError) {
        self.failed_entries.push(path.to_string());
        self.record_failure(format!("Cannot stat {path}: {error}"));
    }

    fn protected(&self, path: &str) -> bool {
        self.failed_subtrees
            .iter()
            .any(|dir| path != dir && path_utils::is_within(path, dir))
            || self
                .failed_entries
                .iter()
                .any(|entry| path_utils::is_within(path, entry))
    }

    /// Sweep records not observed this generation and return the summary.
    ///
    /// # Errors
    ///
    /// Fatal store errors. Records deleted before the failure stay deleted.
    pub fn finish(mut self) -> Result<ReconcileSummary, CatalogError> {
        let stale = self
            .store
            .stale_records(self.root, self.summary.generation, &self.scope)?;
        for record in stale {
            if self.protected(&record.path) {
                continue;
            }
            match self.store.soft_delete(record.id) {
                Ok(Some(deleted)) => {
                    log::trace!("{} -> Deleted", deleted.path);
                    self.observer
                        .record_changed(&CatalogChange::Deleted(deleted));
                    self.summary.deleted += 1;
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.record_failure(e.to_string());
                }
            }
        }

        let s = &self.summary;
        log::debug!(
            "Root #{} generation {}: {} inserted, {} updated, {} unchanged, {} deleted, {} failed",
            self.root,
            s.generation,
            s.inserted,
            s.updated,
            s.unchanged,
            s.deleted,
            s.error_count()
        );
        Ok(self.summary)
    }

    /// Stop without sweeping; everything applied so far stays.
    #[must_use]
    pub fn abandon(self) -> ReconcileSummary {
        log::debug!(
            "Abandoned reconciliation of root #{} generation {} without sweep",
            self.root,
            self.summary.generation
        );
        self.summary
    }

    /// Whether the scope covers the whole root.
    #[must_use]
    pub fn is_full_root(&self) -> bool {
        self.scope == ROOT_PATH
    }
}

impl EntrySink for CatalogWriter<'_> {
    type Error = CatalogError;

    fn entry(
        &mut self,
        entry: &DiscoveredEntry,
        session: &mut dyn Session,
    ) -> Result<(), CatalogError> {
        self.apply(entry, session).map(|_| ())
    }

    fn subtree_failed(&mut self, path: &str, error: &WalkError) {
        CatalogWriter::subtree_failed(self, path, error);
    }

    fn entry_failed(&mut self, path: &str, error: &WalkError) {
        CatalogWriter::entry_failed(self, path, error);
    }
}
