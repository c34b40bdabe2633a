//! Aggregation engine: per-directory size and duplicate rollups.
//!
//! Aggregates are derived, in-memory state. They are rebuilt from the
//! catalog when the engine starts and then kept current by applying every
//! committed [`CatalogChange`]. Each root has its own table behind its own
//! lock, so scans of different roots never contend here.

pub mod table;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::catalog::{CatalogChange, ChangeObserver, FileRecord};
use crate::registry::RootId;

pub use table::{DirStats, RootAggregates};

/// Aggregate row for one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryAggregate {
    /// Owning root
    pub root_id: RootId,
    /// Directory catalog path
    pub path: String,
    /// Recursive byte total
    pub total_size: u64,
    /// Recursive duplicate-file count
    pub duplicate_files: u64,
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds one aggregate table per root.
#[derive(Debug, Default)]
pub struct AggregationEngine {
    roots: Mutex<HashMap<RootId, Shared<RootAggregates>>>,
}

impl AggregationEngine {
    /// An engine with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, root: RootId) -> Shared<RootAggregates> {
        let mut roots = lock(&self.roots);
        Arc::clone(roots.entry(root).or_default())
    }

    fn existing(&self, root: RootId) -> Option<Shared<RootAggregates>> {
        lock(&self.roots).get(&root).cloned()
    }

    /// Apply one committed catalog change.
    pub fn apply(&self, change: &CatalogChange) {
        let root = match change {
            CatalogChange::Inserted(r) | CatalogChange::Deleted(r) => r.root_id,
            CatalogChange::Updated { after, .. } => after.root_id,
        };
        let table = self.table(root);
        let mut table = lock(&table);
        match change {
            CatalogChange::Inserted(record) => table.insert(record),
            CatalogChange::Updated { before, after } => table.update(before, after),
            CatalogChange::Deleted(record) => table.remove(record),
        }
    }

    /// Replace a root's table with a full recomputation from `records`.
    pub fn rebuild(&self, root: RootId, records: &[FileRecord]) {
        let fresh = RootAggregates::recompute(records);
        log::debug!("Rebuilt aggregates for root #{root}: {} directories", fresh.len());
        let table = self.table(root);
        *lock(&table) = fresh;
    }

    /// Copy of a root's current table.
    #[must_use]
    pub fn snapshot(&self, root: RootId) -> RootAggregates {
        self.existing(root)
            .map(|t| lock(&t).clone())
            .unwrap_or_default()
    }

    /// Forget a root's table.
    pub fn drop_root(&self, root: RootId) {
        lock(&self.roots).remove(&root);
    }

    /// Totals of one directory.
    #[must_use]
    pub fn directory(&self, root: RootId, path: &str) -> Option<DirectoryAggregate> {
        let table = self.existing(root)?;
        let stats = lock(&table).get(path)?;
        Some(DirectoryAggregate {
            root_id: root,
            path: path.to_string(),
            total_size: stats.total_size,
            duplicate_files: stats.duplicate_files,
        })
    }

    fn sorted_by(
        &self,
        root: RootId,
        ascending: bool,
        key: impl Fn(&DirStats) -> u64,
    ) -> Vec<DirectoryAggregate> {
        let Some(table) = self.existing(root) else {
            return Vec::new();
        };
        let table = lock(&table);
        let mut rows: Vec<(u64, DirectoryAggregate)> = table
            .directories()
            .map(|(path, stats)| {
                (
                    key(stats),
                    DirectoryAggregate {
                        root_id: root,
                        path: path.to_string(),
                        total_size: stats.total_size,
                        duplicate_files: stats.duplicate_files,
                    },
                )
            })
            .collect();
        drop(table);

        rows.sort_by(|(a, ra), (b, rb)| {
            let by_key = if ascending { a.cmp(b) } else { b.cmp(a) };
            match by_key {
                Ordering::Equal => ra.path.cmp(&rb.path),
                other => other,
            }
        });
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Directories ordered by recursive size; ties by path.
    #[must_use]
    pub fn sorted_by_size(&self, root: RootId, ascending: bool) -> Vec<DirectoryAggregate> {
        self.sorted_by(root, ascending, |s| s.total_size)
    }

    /// Directories ordered by recursive duplicate count; ties by path.
    #[must_use]
    pub fn sorted_by_duplicates(&self, root: RootId, ascending: bool) -> Vec<DirectoryAggregate> {
        self.sorted_by(root, ascending, |s| s.duplicate_files)
    }
}

impl ChangeObserver for AggregationEngine {
    fn record_changed(&self, change: &CatalogChange) {
        self.apply(change);
    }
}
