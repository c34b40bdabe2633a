//! Root registry: the configured storage roots.
//!
//! Roots are persisted in the catalog database and upserted by their unique
//! name. Registration validates that the fields the protocol needs are
//! present; resolution accepts either the numeric ID or the name.
//!
//! A running scan works on the copy of the root taken when it was
//! dispatched, so re-registering a root mid-scan only affects later scans.

pub mod root;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::catalog::database::{format_timestamp, parse_timestamp, Database};

pub use root::{Protocol, RootId, RootRef, RootSpec, StorageRoot};

/// Errors raised by the root registry.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// No root matches the reference.
    #[error("storage root {0} not found")]
    NotFound(RootRef),

    /// The root definition is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The registry store failed.
    #[error("registry database error: {0}")]
    Database(#[from] rusqlite::Error),
}

const SELECT_ROOT: &str = "SELECT id, name, protocol, host, port, path, username, password, \
     domain, mount_point, url, exclude_patterns, enabled, max_depth, created_at, updated_at, \
     last_scan_at FROM storage_roots";

fn root_from_row(row: &Row<'_>) -> rusqlite::Result<StorageRoot> {
    let protocol: String = row.get(2)?;
    let protocol = protocol.parse::<Protocol>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let excludes: String = row.get(11)?;
    let exclude_patterns: Vec<String> = serde_json::from_str(&excludes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let last_scan_at: Option<String> = row.get(16)?;

    Ok(StorageRoot {
        id: row.get(0)?,
        name: row.get(1)?,
        protocol,
        host: row.get(3)?,
        port: row.get(4)?,
        path: row.get(5)?,
        username: row.get(6)?,
        password: row.get(7)?,
        domain: row.get(8)?,
        mount_point: row.get(9)?,
        url: row.get(10)?,
        exclude_patterns,
        enabled: row.get(12)?,
        max_depth: row.get(13)?,
        created_at: parse_timestamp(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_timestamp(15, &row.get::<_, String>(15)?)?,
        last_scan_at: last_scan_at
            .map(|t| parse_timestamp(16, &t))
            .transpose()?,
    })
}

/// Persistent set of storage roots.
#[derive(Debug, Clone)]
pub struct RootRegistry {
    db: Arc<Database>,
    default_max_depth: u32,
}

impl RootRegistry {
    /// Registry over `db`; roots registered with depth 0 get
    /// `default_max_depth`.
    #[must_use]
    pub fn new(db: Arc<Database>, default_max_depth: u32) -> Self {
        Self {
            db,
            default_max_depth,
        }
    }

    /// Register a root, or overwrite the root with the same name.
    ///
    /// The ID, creation time and last scan time of an existing root are kept.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidConfiguration`] for an incomplete definition.
    pub fn register(&self, spec: RootSpec) -> Result<StorageRoot, RegistryError> {
        spec.validate()?;
        let root = spec.into_root(0, self.default_max_depth);
        let excludes = serde_json::to_string(&root.exclude_patterns)
            .map_err(|e| RegistryError::InvalidConfiguration(e.to_string()))?;
        let now = format_timestamp(root.updated_at);

        let id: RootId = self.db.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO storage_roots (name, protocol, host, port, path, username, password, \
                 domain, mount_point, url, exclude_patterns, enabled, max_depth, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14) \
                 ON CONFLICT(name) DO UPDATE SET protocol = excluded.protocol, \
                 host = excluded.host, port = excluded.port, path = excluded.path, \
                 username = excluded.username, password = excluded.password, \
                 domain = excluded.domain, mount_point = excluded.mount_point, \
                 url = excluded.url, exclude_patterns = excluded.exclude_patterns, \
                 enabled = excluded.enabled, max_depth = excluded.max_depth, \
                 updated_at = excluded.updated_at \
                 RETURNING id",
                params![
                    root.name,
                    root.protocol.as_str(),
                    root.host,
                    root.port,
                    root.path,
                    root.username,
                    root.password,
                    root.domain,
                    root.mount_point,
                    root.url,
                    excludes,
                    root.enabled,
                    root.max_depth,
                    now,
                ],
                |row| row.get(0),
            )
        })?;

        log::info!(
            "Registered storage root '{}' (#{id}, {})",
            root.name,
            root.protocol
        );
        self.resolve(&RootRef::Id(id))
    }

    /// Look up a root; `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Only store failures.
    pub fn find(&self, root: &RootRef) -> Result<Option<StorageRoot>, RegistryError> {
        let found = self.db.with_conn(|conn| match root {
            RootRef::Id(id) => conn
                .query_row(&format!("{SELECT_ROOT} WHERE id = ?1"), [id], root_from_row)
                .optional(),
            RootRef::Name(name) => conn
                .query_row(
                    &format!("{SELECT_ROOT} WHERE name = ?1"),
                    [name.trim()],
                    root_from_row,
                )
                .optional(),
        })?;
        Ok(found)
    }

    /// Resolve a root by ID or name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no root matches.
    pub fn resolve(&self, root: &RootRef) -> Result<StorageRoot, RegistryError> {
        self.find(root)?
            .ok_or_else(|| RegistryError::NotFound(root.clone()))
    }

    /// All roots, ordered by name.
    ///
    /// # Errors
    ///
    /// Only store failures.
    pub fn list(&self) -> Result<Vec<StorageRoot>, RegistryError> {
        let roots = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_ROOT} ORDER BY name"))?;
            let rows = stmt.query_map([], root_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(roots)
    }

    /// Delete a root together with its catalog records.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no root matches.
    pub fn remove(&self, root: &RootRef) -> Result<StorageRoot, RegistryError> {
        let existing = self.resolve(root)?;
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM storage_roots WHERE id = ?1", [existing.id])
        })?;
        log::info!("Removed storage root '{}' (#{})", existing.name, existing.id);
        Ok(existing)
    }

    /// Enable or disable a root.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no root matches.
    pub fn set_enabled(&self, root: &RootRef, enabled: bool) -> Result<StorageRoot, RegistryError> {
        let existing = self.resolve(root)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE storage_roots SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
                params![enabled, format_timestamp(Utc::now()), existing.id],
            )
        })?;
        self.resolve(&RootRef::Id(existing.id))
    }

    /// Stamp the completion time of a successful scan.
    ///
    /// # Errors
    ///
    /// Only store failures. A root removed in the meantime is ignored.
    pub fn mark_scanned(&self, id: RootId, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE storage_roots SET last_scan_at = ?1 WHERE id = ?2",
                params![format_timestamp(at), id],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RootRegistry {
        RootRegistry::new(Arc::new(Database::open_in_memory().unwrap()), 10)
    }

    fn smb(name: &str, host: &str) -> RootSpec {
        RootSpec::new(name, Protocol::Smb)
            .with_host(host)
            .with_path("share")
            .with_credentials("user", "pass")
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = registry();
        let root = registry.register(smb("Test Share", "nas1")).unwrap();
        assert!(root.id > 0);
        assert_eq!(root.max_depth, 10);

        let by_name = registry.resolve(&RootRef::from("Test Share")).unwrap();
        let by_id = registry.resolve(&RootRef::Id(root.id)).unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(by_id.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_reregister_overwrites() {
        let registry = registry();
        let first = registry.register(smb("media", "nas1")).unwrap();
        let second = registry
            .register(smb("media", "nas2").with_max_depth(3).with_excludes(["*.tmp"]))
            .unwrap();

        assert_eq!(first.id, second.id);
        let roots = registry.list().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].host.as_deref(), Some("nas2"));
        assert_eq!(roots[0].max_depth, 3);
        assert_eq!(roots[0].exclude_patterns, vec!["*.tmp"]);
        assert_eq!(roots[0].created_at, first.created_at);
    }

    #[test]
    fn test_register_invalid_is_rejected() {
        let registry = registry();
        let err = registry
            .register(RootSpec::new("x", Protocol::Ftp))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfiguration(_)));
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_not_found() {
        let registry = registry();
        assert!(registry.find(&RootRef::Id(99)).unwrap().is_none());
        let err = registry.resolve(&RootRef::Id(99)).unwrap_err();
        assert_eq!(err.to_string(), "storage root #99 not found");
    }

    #[test]
    fn test_remove_and_enable() {
        let registry = registry();
        let root = registry.register(smb("a", "nas")).unwrap();
        let disabled = registry.set_enabled(&RootRef::Id(root.id), false).unwrap();
        assert!(!disabled.enabled);

        registry.remove(&RootRef::from("a")).unwrap();
        assert!(registry.list().unwrap().is_empty());
        assert!(matches!(
            registry.remove(&RootRef::from("a")),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_scanned() {
        let registry = registry();
        let root = registry.register(smb("a", "nas")).unwrap();
        assert!(root.last_scan_at.is_none());
        let at = Utc::now();
        registry.mark_scanned(root.id, at).unwrap();
        let root = registry.resolve(&RootRef::Id(root.id)).unwrap();
        assert_eq!(root.last_scan_at, Some(at));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let registry = registry();
        registry.register(smb("zeta", "h")).unwrap();
        registry.register(smb("alpha", "h")).unwrap();
        let names: Vec<_> = registry.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
