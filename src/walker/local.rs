//! Local filesystem adapter.
//!
//! Serves `local` roots from `root.path` and `nfs` roots from their
//! `mount_point`. Listings are single-level `walkdir` reads sorted by file
//! name; symbolic links are skipped so a link cycle can never trap a scan.
//! Children whose metadata cannot be read, or whose names are not UTF-8,
//! are still listed, flagged with an [`EntryFault`](super::EntryFault).

use std::fs::{self, File, Metadata};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{unix_seconds, Connector, RawEntry, Session, WalkError};
use crate::catalog::signature::{sign_reader, Signature};
use crate::registry::{Protocol, StorageRoot};

/// Connector for local volumes and mounted NFS exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

impl LocalConnector {
    fn base_dir(root: &StorageRoot) -> Result<PathBuf, WalkError> {
        let base = match root.protocol {
            Protocol::Nfs => root.mount_point.as_deref(),
            _ => root.path.as_deref(),
        };
        base.filter(|b| !b.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                WalkError::InvalidConfiguration(format!(
                    "root '{}' has no local path to walk",
                    root.name
                ))
            })
    }
}

impl Connector for LocalConnector {
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError> {
        let base = Self::base_dir(root)?;
        let meta = fs::metadata(&base).map_err(|e| WalkError::from_io(base_str(&base), e))?;
        if !meta.is_dir() {
            return Err(WalkError::NotADirectory(base_str(&base)));
        }
        log::debug!("Opened local root '{}' at {}", root.name, base.display());
        Ok(Box::new(LocalSession { base }))
    }
}

fn base_str(path: &Path) -> String {
    path.display().to_string()
}

/// Session rooted at a local directory.
#[derive(Debug)]
pub struct LocalSession {
    base: PathBuf,
}

impl LocalSession {
    /// Session over an existing directory, without going through a root.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            self.base.clone()
        } else {
            self.base.join(relative)
        }
    }
}

fn raw_from_metadata(name: String, meta: &Metadata) -> RawEntry {
    let modified = meta.modified().map(unix_seconds).unwrap_or(0);
    if meta.is_dir() {
        RawEntry::dir(name, modified)
    } else {
        RawEntry::file(name, meta.len(), modified)
    }
}

impl Session for LocalSession {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        let dir = self.resolve(path);
        let meta = fs::metadata(&dir).map_err(|e| WalkError::from_io(path, e))?;
        if !meta.is_dir() {
            return Err(WalkError::NotADirectory(path.to_string()));
        }

        let mut entries = Vec::new();
        for item in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let failed = e
                        .path()
                        .map_or_else(|| path.to_string(), |p| p.display().to_string());
                    let child = e.path().and_then(Path::file_name).map(ToOwned::to_owned);
                    match (e.into_io_error(), child) {
                        (Some(io), _) if failed == dir.display().to_string() => {
                            return Err(WalkError::from_io(path, io));
                        }
                        (Some(io), Some(child)) => {
                            log::debug!("Cannot read entry {failed}: {io}");
                            entries.push(match child.to_str() {
                                Some(name) => RawEntry::unreadable(name),
                                None => RawEntry::invalid_name(child.to_string_lossy()),
                            });
                        }
                        _ => {}
                    }
                    continue;
                }
            };

            if entry.file_type().is_symlink() {
                log::trace!("Skipping symlink: {}", entry.path().display());
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                entries.push(RawEntry::invalid_name(entry.file_name().to_string_lossy()));
                continue;
            };
            match entry.metadata() {
                Ok(meta) if meta.is_dir() || meta.is_file() => {
                    entries.push(raw_from_metadata(name, &meta));
                }
                Ok(_) => log::trace!("Skipping special file: {}", entry.path().display()),
                Err(e) => {
                    log::debug!("Cannot stat {}: {e}", entry.path().display());
                    entries.push(RawEntry::unreadable(name));
                }
            }
        }
        Ok(entries)
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        let target = self.resolve(path);
        let meta = fs::symlink_metadata(&target).map_err(|e| WalkError::from_io(path, e))?;
        let name = super::path_utils::file_name(path).to_string();
        Ok(raw_from_metadata(name, &meta))
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        let target = self.resolve(path);
        let mut file = File::open(&target).map_err(|e| WalkError::from_io(path, e))?;
        sign_reader(&mut file).map_err(|e| WalkError::from_io(path, e))
    }
}
