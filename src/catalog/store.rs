//! SQLite implementation of [`CatalogStore`].

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::database::{format_timestamp, parse_timestamp, Database};
use super::{CatalogError, CatalogStore, DuplicateGroup, FileRecord, Signature};
use crate::registry::RootId;
use crate::walker::path_utils::{self, ROOT_PATH};
use crate::walker::DiscoveredEntry;

const SELECT_RECORD: &str = "SELECT id, root_id, path, parent, name, is_dir, size, modified, \
     signature, deleted, generation, deleted_at FROM file_records";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let signature: Option<String> = row.get(8)?;
    let deleted_at: Option<String> = row.get(11)?;
    Ok(FileRecord {
        id: row.get(0)?,
        root_id: row.get(1)?,
        path: row.get(2)?,
        parent: row.get(3)?,
        name: row.get(4)?,
        is_dir: row.get(5)?,
        size: row.get::<_, i64>(6)?.max(0) as u64,
        modified: row.get(7)?,
        signature: signature.map(Signature::from_hex),
        deleted: row.get(9)?,
        generation: row.get::<_, i64>(10)?.max(0) as u64,
        deleted_at: deleted_at.map(|t| parse_timestamp(11, &t)).transpose()?,
    })
}

/// Catalog store backed by the shared SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: Arc<Database>,
}

impl SqliteCatalog {
    /// Catalog over `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn record_by_id(&self, id: i64) -> Result<Option<FileRecord>, CatalogError> {
        Ok(self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                [id],
                record_from_row,
            )
            .optional()
        })?)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<FileRecord>, CatalogError> {
        Ok(self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, record_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?)
    }
}

/// Map a per-row SQLite failure to a record error unless it is fatal.
fn classify(path: &str, error: rusqlite::Error) -> CatalogError {
    let error = CatalogError::Database(error);
    if error.is_fatal() {
        error
    } else {
        CatalogError::Record {
            path: path.to_string(),
            message: error.to_string(),
        }
    }
}

impl CatalogStore for SqliteCatalog {
    fn next_generation(&self, root: RootId) -> Result<u64, CatalogError> {
        let generation: i64 = self.db.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO scan_generations (root_id, generation) VALUES (?1, 1) \
                 ON CONFLICT(root_id) DO UPDATE SET generation = generation + 1 \
                 RETURNING generation",
                [root],
                |row| row.get(0),
            )
        })?;
        Ok(generation as u64)
    }

    fn find_live(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError> {
        Ok(self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_RECORD} WHERE root_id = ?1 AND path = ?2 AND deleted = 0"),
                params![root, path],
                record_from_row,
            )
            .optional()
        })?)
    }

    fn insert(
        &self,
        root: RootId,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError> {
        let id: i64 = self
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "INSERT INTO file_records (root_id, path, parent, name, is_dir, size, \
                     modified, signature, deleted, generation) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9) RETURNING id",
                    params![
                        root,
                        entry.path,
                        path_utils::parent(&entry.path),
                        path_utils::file_name(&entry.path),
                        entry.is_dir,
                        entry.size as i64,
                        entry.modified,
                        signature.map(Signature::as_str),
                        generation as i64,
                    ],
                    |row| row.get(0),
                )
            })
            .map_err(|e| classify(&entry.path, e))?;

        self.record_by_id(id)?
            .ok_or_else(|| CatalogError::Unavailable(format!("inserted row {id} vanished")))
    }

    fn update(
        &self,
        existing: &FileRecord,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError> {
        let changed = self
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE file_records SET is_dir = ?1, size = ?2, modified = ?3, \
                     signature = ?4, generation = ?5 WHERE id = ?6 AND deleted = 0",
                    params![
                        entry.is_dir,
                        entry.size as i64,
                        entry.modified,
                        signature.map(Signature::as_str),
                        generation as i64,
                        existing.id,
                    ],
                )
            })
            .map_err(|e| classify(&entry.path, e))?;
        if changed == 0 {
            return Err(CatalogError::Record {
                path: entry.path.clone(),
                message: "record is no longer live".to_string(),
            });
        }

        self.record_by_id(existing.id)?
            .ok_or_else(|| CatalogError::Unavailable(format!("updated row {} vanished", existing.id)))
    }

    fn touch(&self, id: i64, generation: u64) -> Result<(), CatalogError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE file_records SET generation = ?1 WHERE id = ?2 AND deleted = 0",
                params![generation as i64, id],
            )
        })?;
        Ok(())
    }

    fn soft_delete(&self, id: i64) -> Result<Option<FileRecord>, CatalogError> {
        let before = match self.record_by_id(id)? {
            Some(record) if !record.deleted => record,
            _ => return Ok(None),
        };
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE file_records SET deleted = 1, deleted_at = ?1 \
                     WHERE id = ?2 AND deleted = 0",
                    params![format_timestamp(Utc::now()), id],
                )
            })
            .map_err(|e| classify(&before.path, e))?;
        Ok(Some(before))
    }

    fn stale_records(
        &self,
        root: RootId,
        generation: u64,
        scope: &str,
    ) -> Result<Vec<FileRecord>, CatalogError> {
        if scope == ROOT_PATH {
            self.query(
                &format!(
                    "{SELECT_RECORD} WHERE root_id = ?1 AND deleted = 0 AND generation < ?2 \
                     ORDER BY path"
                ),
                params![root, generation as i64],
            )
        } else {
            let prefix = format!("{scope}/");
            self.query(
                &format!(
                    "{SELECT_RECORD} WHERE root_id = ?1 AND deleted = 0 AND generation < ?2 \
                     AND substr(path, 1, length(?3)) = ?3 ORDER BY path"
                ),
                params![root, generation as i64, prefix],
            )
        }
    }

    fn live_records(&self, root: RootId) -> Result<Vec<FileRecord>, CatalogError> {
        self.query(
            &format!("{SELECT_RECORD} WHERE root_id = ?1 AND deleted = 0 ORDER BY path"),
            [root],
        )
    }

    fn lookup_path(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError> {
        Ok(self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "{SELECT_RECORD} WHERE root_id = ?1 AND path = ?2 \
                     ORDER BY deleted ASC, id DESC LIMIT 1"
                ),
                params![root, path],
                record_from_row,
            )
            .optional()
        })?)
    }

    fn list_children(&self, root: RootId, dir: &str) -> Result<Vec<FileRecord>, CatalogError> {
        self.query(
            &format!(
                "{SELECT_RECORD} WHERE root_id = ?1 AND parent = ?2 AND deleted = 0 ORDER BY name"
            ),
            params![root, dir],
        )
    }

    fn duplicate_groups(&self, root: RootId) -> Result<Vec<DuplicateGroup>, CatalogError> {
        let records = self.query(
            &format!(
                "{SELECT_RECORD} WHERE root_id = ?1 AND deleted = 0 AND is_dir = 0 \
                 AND signature IN (SELECT signature FROM file_records \
                     WHERE root_id = ?1 AND deleted = 0 AND is_dir = 0 \
                     AND signature IS NOT NULL GROUP BY signature HAVING COUNT(*) > 1) \
                 ORDER BY signature, path"
            ),
            [root],
        )?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for record in records {
            let Some(signature) = record.signature else {
                continue;
            };
            match groups.last_mut() {
                Some(group) if group.signature == signature => group.paths.push(record.path),
                _ => groups.push(DuplicateGroup {
                    signature,
                    size: record.size,
                    paths: vec![record.path],
                }),
            }
        }
        groups.sort_by(|a, b| {
            b.wasted_bytes()
                .cmp(&a.wasted_bytes())
                .then_with(|| a.signature.cmp(&b.signature))
        });
        Ok(groups)
    }
}
