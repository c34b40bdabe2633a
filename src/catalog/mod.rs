//! The file catalog: persisted records and their reconciliation.
//!
//! # Overview
//!
//! One [`FileRecord`] per discovered path under a root. Records are never
//! physically removed by a scan; a path that disappears is soft-deleted and
//! stays retrievable through [`CatalogStore::lookup_path`]. At most one live
//! (non-deleted) record exists per `(root, path)`, enforced by a partial
//! unique index.
//!
//! - [`database`]: the shared SQLite connection and schema
//! - [`store`]: [`SqliteCatalog`], the [`CatalogStore`] implementation
//! - [`signature`]: BLAKE3 content signatures
//! - [`writer`]: mark-and-sweep reconciliation of one scan

pub mod database;
pub mod signature;
pub mod store;
pub mod writer;

use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use serde::Serialize;

use crate::registry::RootId;
use crate::walker::DiscoveredEntry;

pub use signature::Signature;
pub use store::SqliteCatalog;
pub use writer::{CatalogWriter, EntryOutcome, ReconcileSummary};

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Row ID
    pub id: i64,
    /// Owning storage root
    pub root_id: RootId,
    /// Root-relative catalog path
    pub path: String,
    /// Parent directory path
    pub parent: String,
    /// Final path segment
    pub name: String,
    /// Directory flag
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time, Unix seconds
    pub modified: i64,
    /// Content signature, absent for directories and until computed
    pub signature: Option<Signature>,
    /// Soft-delete flag
    pub deleted: bool,
    /// Scan generation that last observed this record
    pub generation: u64,
    /// When the record was soft-deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Whether the stored size and modification time still match `entry`.
    #[must_use]
    pub fn matches(&self, entry: &DiscoveredEntry) -> bool {
        self.size == entry.size && self.modified == entry.modified && self.is_dir == entry.is_dir
    }
}

/// Signature-equal live files under one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Shared content signature
    pub signature: Signature,
    /// Size of each copy
    pub size: u64,
    /// Paths of the copies, sorted
    pub paths: Vec<String>,
}

impl DuplicateGroup {
    /// Bytes that would be freed by keeping a single copy.
    #[must_use]
    pub fn wasted_bytes(&self) -> u64 {
        self.size
            .saturating_mul(self.paths.len().saturating_sub(1) as u64)
    }
}

/// Errors raised by the catalog store.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// The store cannot be used at all.
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),

    /// A single record could not be written.
    #[error("cannot write record {path}: {message}")]
    Record {
        /// Record path
        path: String,
        /// Reason
        message: String,
    },

    /// SQLite failure.
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CatalogError {
    /// Whether the failure affects the store as a whole rather than one
    /// record. Fatal errors abort reconciliation.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Record { .. } => false,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::DiskFull
                    | ErrorCode::CannotOpen
                    | ErrorCode::ReadOnly
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::OutOfMemory
                    | ErrorCode::PermissionDenied
                    | ErrorCode::FileLockingProtocolFailed
            ),
            Self::Database(_) => false,
        }
    }
}

/// A committed change to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    /// A new live record.
    Inserted(FileRecord),
    /// A live record was rewritten.
    Updated {
        /// State before the write
        before: FileRecord,
        /// State after the write
        after: FileRecord,
    },
    /// A live record was soft-deleted; carries its last live state.
    Deleted(FileRecord),
}

/// Receives every committed catalog change, in commit order.
pub trait ChangeObserver: Send + Sync {
    /// Called after the change is durable.
    fn record_changed(&self, change: &CatalogChange);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ChangeObserver for NoopObserver {
    fn record_changed(&self, _change: &CatalogChange) {}
}

/// Persistence operations the engine needs from the catalog.
pub trait CatalogStore: Send + Sync {
    /// Allocate the next scan generation for a root (starting at 1).
    fn next_generation(&self, root: RootId) -> Result<u64, CatalogError>;

    /// The live record at `path`, if any.
    fn find_live(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError>;

    /// Insert a live record for a newly observed entry.
    fn insert(
        &self,
        root: RootId,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError>;

    /// Rewrite a live record from a fresh observation.
    fn update(
        &self,
        existing: &FileRecord,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError>;

    /// Stamp a live record as observed in `generation` without other changes.
    fn touch(&self, id: i64, generation: u64) -> Result<(), CatalogError>;

    /// Soft-delete a live record, returning the deleted row.
    fn soft_delete(&self, id: i64) -> Result<Option<FileRecord>, CatalogError>;

    /// Live records strictly beneath `scope` not observed in `generation`.
    fn stale_records(
        &self,
        root: RootId,
        generation: u64,
        scope: &str,
    ) -> Result<Vec<FileRecord>, CatalogError>;

    /// Every live record of a root, ordered by path.
    fn live_records(&self, root: RootId) -> Result<Vec<FileRecord>, CatalogError>;

    /// The live record at `path`, or else the most recently deleted one.
    fn lookup_path(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError>;

    /// Live children of a directory, ordered by name.
    fn list_children(&self, root: RootId, dir: &str) -> Result<Vec<FileRecord>, CatalogError>;

    /// Live files sharing a signature with at least one other live file.
    fn duplicate_groups(&self, root: RootId) -> Result<Vec<DuplicateGroup>, CatalogError>;
}
