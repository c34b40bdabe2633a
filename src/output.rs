//! Text and JSON rendering of CLI results.
//!
//! Every writer takes `&mut impl Write` so output can be captured in tests.
//! JSON output is pretty-printed serde_json of the same types the engine
//! returns; text output is a fixed-width table meant for terminals.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::DirectoryAggregate;
use crate::catalog::{DuplicateGroup, FileRecord};
use crate::progress::human_size;
use crate::registry::StorageRoot;

/// Pretty-printed JSON followed by a newline.
///
/// # Errors
///
/// Write failures, or serialization failures surfaced as `InvalidData`.
pub fn write_json<T: Serialize + ?Sized>(w: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *w, value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(w)
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Table of registered roots.
///
/// # Errors
///
/// Write failures.
pub fn write_roots(w: &mut impl Write, roots: &[StorageRoot]) -> io::Result<()> {
    if roots.is_empty() {
        return writeln!(w, "No roots registered.");
    }
    writeln!(
        w,
        "{:>4}  {:<20} {:<7} {:<8} {:>5}  {:<19}  LOCATION",
        "ID", "NAME", "PROTO", "STATE", "DEPTH", "LAST SCAN"
    )?;
    for root in roots {
        writeln!(
            w,
            "{:>4}  {:<20} {:<7} {:<8} {:>5}  {:<19}  {}",
            root.id,
            root.name,
            root.protocol,
            if root.enabled { "enabled" } else { "disabled" },
            root.max_depth,
            when(root.last_scan_at),
            root.endpoint()
        )?;
    }
    Ok(())
}

/// Directory ranking, at most `limit` rows.
///
/// # Errors
///
/// Write failures.
pub fn write_rankings(
    w: &mut impl Write,
    rows: &[DirectoryAggregate],
    limit: usize,
) -> io::Result<()> {
    if rows.is_empty() {
        return writeln!(w, "No directories cataloged.");
    }
    writeln!(w, "{:>12}  {:>10}  PATH", "SIZE", "DUPLICATES")?;
    for row in rows.iter().take(limit) {
        writeln!(
            w,
            "{:>12}  {:>10}  {}",
            human_size(row.total_size),
            row.duplicate_files,
            row.path
        )?;
    }
    if rows.len() > limit {
        writeln!(w, "... {} more", rows.len() - limit)?;
    }
    Ok(())
}

/// Duplicate groups, at most `limit` of them.
///
/// # Errors
///
/// Write failures.
pub fn write_groups(w: &mut impl Write, groups: &[DuplicateGroup], limit: usize) -> io::Result<()> {
    if groups.is_empty() {
        return writeln!(w, "No duplicates found.");
    }
    for group in groups.iter().take(limit) {
        writeln!(
            w,
            "{} x {} ({} wasted)  {}",
            group.paths.len(),
            human_size(group.size),
            human_size(group.wasted_bytes()),
            group.signature
        )?;
        for path in &group.paths {
            writeln!(w, "    {path}")?;
        }
    }
    let wasted: u64 = groups.iter().map(DuplicateGroup::wasted_bytes).sum();
    writeln!(
        w,
        "{} groups, {} reclaimable",
        groups.len(),
        human_size(wasted)
    )
}

/// Directory listing.
///
/// # Errors
///
/// Write failures.
pub fn write_listing(w: &mut impl Write, records: &[FileRecord]) -> io::Result<()> {
    for record in records {
        let size = if record.is_dir {
            "<dir>".to_string()
        } else {
            human_size(record.size)
        };
        let suffix = if record.is_dir { "/" } else { "" };
        writeln!(w, "{size:>12}  {}{suffix}", record.name)?;
    }
    Ok(())
}

/// Full record of one path.
///
/// # Errors
///
/// Write failures.
pub fn write_record(w: &mut impl Write, record: &FileRecord) -> io::Result<()> {
    writeln!(w, "path:       {}", record.path)?;
    writeln!(w, "kind:       {}", if record.is_dir { "directory" } else { "file" })?;
    if !record.is_dir {
        writeln!(w, "size:       {} ({} bytes)", human_size(record.size), record.size)?;
    }
    let modified = DateTime::<Utc>::from_timestamp(record.modified, 0)
        .map_or_else(|| record.modified.to_string(), |t| t.to_rfc3339());
    writeln!(w, "modified:   {modified}")?;
    if let Some(signature) = &record.signature {
        writeln!(w, "signature:  {signature}")?;
    }
    writeln!(w, "generation: {}", record.generation)?;
    if record.deleted {
        let at = record
            .deleted_at
            .map_or_else(|| "yes".to_string(), |t| t.to_rfc3339());
        writeln!(w, "deleted:    {at}")?;
    }
    Ok(())
}
