//! Per-root directory aggregate table.
//!
//! Each live record contributes to every ancestor directory: files add their
//! size, and a file whose signature is shared by at least one other live
//! file of the root counts as one duplicate. Applying a record costs
//! O(depth), plus one extra ancestor walk when a signature group grows from
//! one to two members (or shrinks back), since that flips the other member.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::catalog::{FileRecord, Signature};
use crate::walker::path_utils::{ancestors, self_and_ancestors};

/// Recursive totals for one directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirStats {
    /// Bytes in all live files beneath the directory
    pub total_size: u64,
    /// Live files beneath the directory whose content is duplicated
    pub duplicate_files: u64,
    /// Live records at or beneath the directory; the row goes away at zero
    #[serde(skip)]
    entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileFacts {
    size: u64,
    signature: Option<Signature>,
}

/// Aggregates of one storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootAggregates {
    dirs: BTreeMap<String, DirStats>,
    files: HashMap<String, FileFacts>,
    dir_records: BTreeSet<String>,
    groups: HashMap<Signature, BTreeSet<String>>,
}

impl RootAggregates {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory paths with their totals, ordered by path.
    pub fn directories(&self) -> impl Iterator<Item = (&str, &DirStats)> {
        self.dirs.iter().map(|(path, stats)| (path.as_str(), stats))
    }

    /// Totals of one directory.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<DirStats> {
        self.dirs.get(path).copied()
    }

    /// Number of directories tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether no directory is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    fn adjust<'a>(&mut self, paths: impl Iterator<Item = &'a str>, f: impl Fn(&mut DirStats)) {
        for path in paths {
            let stats = self.dirs.entry(path.to_string()).or_default();
            f(stats);
            if stats.entries == 0 {
                self.dirs.remove(path);
            }
        }
    }

    fn adjust_duplicates(&mut self, file: &str, add: bool) {
        let file = file.to_string();
        self.adjust(ancestors(&file), |s| {
            if add {
                s.duplicate_files += 1;
            } else {
                s.duplicate_files = s.duplicate_files.saturating_sub(1);
            }
        });
    }

    /// Account for a newly live record.
    pub fn insert(&mut self, record: &FileRecord) {
        if record.is_dir {
            if self.dir_records.insert(record.path.clone()) {
                self.adjust(self_and_ancestors(&record.path), |s| s.entries += 1);
            }
            return;
        }
        if self.files.contains_key(&record.path) {
            self.remove_path(&record.path.clone());
        }

        let size = record.size;
        self.adjust(ancestors(&record.path), |s| {
            s.entries += 1;
            s.total_size += size;
        });

        if let Some(signature) = &record.signature {
            let group = self.groups.entry(signature.clone()).or_default();
            group.insert(record.path.clone());
            match group.len() {
                2 => {
                    let other = group.iter().find(|p| **p != record.path).cloned();
                    if let Some(other) = other {
                        self.adjust_duplicates(&other, true);
                    }
                    self.adjust_duplicates(&record.path, true);
                }
                n if n > 2 => self.adjust_duplicates(&record.path, true),
                _ => {}
            }
        }

        self.files.insert(
            record.path.clone(),
            FileFacts {
                size,
                signature: record.signature.clone(),
            },
        );
    }

    /// Account for a record that is no longer live.
    pub fn remove(&mut self, record: &FileRecord) {
        if self.dir_records.remove(&record.path) {
            self.adjust(self_and_ancestors(&record.path), |s| {
                s.entries = s.entries.saturating_sub(1);
            });
            return;
        }
        self.remove_path(&record.path);
    }

    fn remove_path(&mut self, path: &str) {
        let Some(facts) = self.files.remove(path) else {
            return;
        };

        if let Some(signature) = &facts.signature {
            let mut remaining = None;
            let mut was_duplicate = false;
            if let Some(group) = self.groups.get_mut(signature) {
                was_duplicate = group.len() >= 2;
                group.remove(path);
                if group.len() == 1 {
                    remaining = group.iter().next().cloned();
                }
                if group.is_empty() {
                    self.groups.remove(signature);
                }
            }
            if was_duplicate {
                self.adjust_duplicates(path, false);
            }
            if let Some(other) = remaining {
                self.adjust_duplicates(&other, false);
            }
        }

        let size = facts.size;
        self.adjust(ancestors(path), |s| {
            s.entries = s.entries.saturating_sub(1);
            s.total_size = s.total_size.saturating_sub(size);
        });
    }

    /// Account for a rewritten record.
    pub fn update(&mut self, before: &FileRecord, after: &FileRecord) {
        self.remove(before);
        self.insert(after);
    }

    /// Build the table from scratch out of live records.
    ///
    /// Independent of the incremental path: counts signature occurrences
    /// first, then adds every record to its ancestors once.
    #[must_use]
    pub fn recompute<'a>(records: impl IntoIterator<Item = &'a FileRecord>) -> Self {
        let live: Vec<&FileRecord> = records.into_iter().filter(|r| !r.deleted).collect();

        let mut table = Self::new();
        for record in &live {
            if let (false, Some(signature)) = (record.is_dir, &record.signature) {
                table
                    .groups
                    .entry(signature.clone())
                    .or_default()
                    .insert(record.path.clone());
            }
        }

        for record in &live {
            if record.is_dir {
                if !table.dir_records.insert(record.path.clone()) {
                    continue;
                }
                for path in self_and_ancestors(&record.path) {
                    table.dirs.entry(path.to_string()).or_default().entries += 1;
                }
                continue;
            }

            let duplicated = record
                .signature
                .as_ref()
                .and_then(|s| table.groups.get(s))
                .is_some_and(|g| g.len() >= 2);
            for path in ancestors(&record.path) {
                let stats = table.dirs.entry(path.to_string()).or_default();
                stats.entries += 1;
                stats.total_size += record.size;
                if duplicated {
                    stats.duplicate_files += 1;
                }
            }
            table.files.insert(
                record.path.clone(),
                FileFacts {
                    size: record.size,
                    signature: record.signature.clone(),
                },
            );
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: i64, path: &str, size: u64, content: Option<&[u8]>) -> FileRecord {
        FileRecord {
            id,
            root_id: 1,
            path: path.to_string(),
            parent: crate::walker::path_utils::parent(path).to_string(),
            name: crate::walker::path_utils::file_name(path).to_string(),
            is_dir: false,
            size,
            modified: 0,
            signature: content.map(Signature::of_bytes),
            deleted: false,
            generation: 1,
            deleted_at: None,
        }
    }

    fn dir(id: i64, path: &str) -> FileRecord {
        FileRecord {
            is_dir: true,
            size: 0,
            signature: None,
            ..file(id, path, 0, None)
        }
    }

    #[test]
    fn test_sizes_roll_up() {
        let mut table = RootAggregates::new();
        table.insert(&dir(1, "/a"));
        table.insert(&file(2, "/a/x", 10, None));
        table.insert(&file(3, "/a/b/y", 5, None));

        assert_eq!(table.get("/").unwrap().total_size, 15);
        assert_eq!(table.get("/a").unwrap().total_size, 15);
        assert_eq!(table.get("/a/b").unwrap().total_size, 5);
        assert_eq!(table.get("/a/b").unwrap().duplicate_files, 0);
    }

    #[test]
    fn test_duplicates_count_up_the_chain() {
        let mut table = RootAggregates::new();
        table.insert(&file(1, "/a/b/one", 3, Some(b"dup")));
        assert_eq!(table.get("/a/b").unwrap().duplicate_files, 0);

        table.insert(&file(2, "/a/b/two", 3, Some(b"dup")));
        for path in ["/a/b", "/a", "/"] {
            assert_eq!(table.get(path).unwrap().duplicate_files, 2, "{path}");
        }

        table.insert(&file(3, "/c/three", 3, Some(b"dup")));
        assert_eq!(table.get("/").unwrap().duplicate_files, 3);
        assert_eq!(table.get("/c").unwrap().duplicate_files, 1);
    }

    #[test]
    fn test_removing_a_copy_clears_the_other() {
        let mut table = RootAggregates::new();
        let one = file(1, "/a/one", 3, Some(b"dup"));
        let two = file(2, "/b/two", 3, Some(b"dup"));
        table.insert(&one);
        table.insert(&two);
        table.remove(&two);

        assert_eq!(table.get("/a").unwrap().duplicate_files, 0);
        assert_eq!(table.get("/").unwrap().duplicate_files, 0);
        assert!(table.get("/b").is_none());
        assert_eq!(table, RootAggregates::recompute([&one]));
    }

    #[test]
    fn test_update_changes_group() {
        let mut table = RootAggregates::new();
        let one = file(1, "/one", 3, Some(b"dup"));
        let two = file(2, "/two", 3, Some(b"dup"));
        table.insert(&one);
        table.insert(&two);

        let edited = file(2, "/two", 4, Some(b"edited"));
        table.update(&two, &edited);
        assert_eq!(table.get("/").unwrap().duplicate_files, 0);
        assert_eq!(table.get("/").unwrap().total_size, 7);
        assert_eq!(table, RootAggregates::recompute([&one, &edited]));
    }

    #[test]
    fn test_unsigned_files_are_not_duplicates() {
        let mut table = RootAggregates::new();
        table.insert(&file(1, "/a", 3, None));
        table.insert(&file(2, "/b", 3, None));
        assert_eq!(table.get("/").unwrap().duplicate_files, 0);
    }

    #[test]
    fn test_empty_directories_are_listed() {
        let mut table = RootAggregates::new();
        let empty = dir(1, "/empty");
        table.insert(&empty);
        assert_eq!(table.get("/empty").unwrap().total_size, 0);
        table.remove(&empty);
        assert!(table.is_empty());
    }

    #[test]
    fn test_recompute_skips_deleted() {
        let mut gone = file(1, "/gone", 9, Some(b"x"));
        gone.deleted = true;
        let kept = file(2, "/kept", 1, Some(b"x"));
        let table = RootAggregates::recompute([&gone, &kept]);
        assert_eq!(table.get("/").unwrap().total_size, 1);
        assert_eq!(table.get("/").unwrap().duplicate_files, 0);
    }
}
