use std::fs;
use std::path::Path;

use catalog_scan::engine::ScanEngine;
use catalog_scan::registry::{Protocol, RootRef, RootSpec};
use catalog_scan::scheduler::{ScanState, ScanType};
use filetime::{set_file_mtime, FileTime};
use tempfile::{tempdir, TempDir};

use super::common::{memory_config, scan};

const OLD: i64 = 1_600_000_000;

fn write(dir: &Path, rel: &str, content: &[u8]) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(OLD, 0)).unwrap();
}

fn local_engine() -> (ScanEngine, TempDir) {
    let dir = tempdir().unwrap();
    let engine = ScanEngine::open(memory_config(1)).unwrap();
    engine
        .register_root(RootSpec::new("disk", Protocol::Local).with_path(dir.path().to_string_lossy()))
        .unwrap();
    (engine, dir)
}

fn signature_of(engine: &ScanEngine, path: &str) -> Option<String> {
    engine
        .lookup_path(&RootRef::from("disk"), path)
        .unwrap()
        .and_then(|r| r.signature)
        .map(|s| s.to_string())
}

#[test]
fn test_local_scan_catalogs_files_and_directories() {
    let (engine, dir) = local_engine();
    write(dir.path(), "photos/2021/a.jpg", b"jpeg bytes");
    write(dir.path(), "photos/b.jpg", b"jpeg bytes");
    write(dir.path(), "notes.txt", b"hello");

    let status = scan(&engine, "disk", ScanType::Full);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.files_found, 3);

    let root = RootRef::from("disk");
    let record = engine.lookup_path(&root, "/photos/2021/a.jpg").unwrap().unwrap();
    assert_eq!(record.size, 10);
    assert_eq!(record.modified, OLD);
    assert_eq!(record.parent, "/photos/2021");
    assert!(engine.lookup_path(&root, "/photos").unwrap().unwrap().is_dir);

    let groups = engine.duplicate_groups(&root).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].paths, vec!["/photos/2021/a.jpg", "/photos/b.jpg"]);
    assert_eq!(groups[0].wasted_bytes(), 10);
}

#[test]
fn test_incremental_scan_trusts_size_and_mtime() {
    let (engine, dir) = local_engine();
    write(dir.path(), "data.bin", b"AAAA");
    scan(&engine, "disk", ScanType::Full);
    let before = signature_of(&engine, "/data.bin");

    // Same size, same mtime: an incremental scan cannot tell.
    write(dir.path(), "data.bin", b"BBBB");
    scan(&engine, "disk", ScanType::Incremental);
    assert_eq!(signature_of(&engine, "/data.bin"), before);

    // A full scan re-signs everything.
    let status = scan(&engine, "disk", ScanType::Full);
    assert_eq!(status.files_updated, 1);
    assert_ne!(signature_of(&engine, "/data.bin"), before);
}

#[test]
fn test_touched_file_is_resigned_incrementally() {
    let (engine, dir) = local_engine();
    write(dir.path(), "data.bin", b"AAAA");
    scan(&engine, "disk", ScanType::Full);
    let before = signature_of(&engine, "/data.bin");

    let path = dir.path().join("data.bin");
    fs::write(&path, b"CCCC").unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(OLD + 60, 0)).unwrap();

    let status = scan(&engine, "disk", ScanType::Incremental);
    assert_eq!(status.files_updated, 1);
    assert_ne!(signature_of(&engine, "/data.bin"), before);
    let record = engine
        .lookup_path(&RootRef::from("disk"), "/data.bin")
        .unwrap()
        .unwrap();
    assert_eq!(record.modified, OLD + 60);
}

#[test]
fn test_missing_local_directory_fails_as_configuration() {
    let engine = ScanEngine::open(memory_config(1)).unwrap();
    engine
        .register_root(RootSpec::new("ghost", Protocol::Local).with_path("/definitely/not/here"))
        .unwrap();
    let status = scan(&engine, "ghost", ScanType::Full);
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(
        status.error_kind,
        Some(catalog_scan::error::ErrorKind::InvalidConfiguration)
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_names_are_counted_not_mangled() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (engine, dir) = local_engine();
    write(dir.path(), "ok.txt", b"fine");
    // Both would render as "/a\u{FFFD}" if decoded lossily.
    fs::write(dir.path().join(OsStr::from_bytes(b"a\xff")), b"1").unwrap();
    fs::write(dir.path().join(OsStr::from_bytes(b"a\xfe")), b"2").unwrap();

    let status = scan(&engine, "disk", ScanType::Full);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.error_count, 2);
    assert_eq!(status.files_found, 1);
    let live = engine.list_directory(&RootRef::from("disk"), "/").unwrap();
    let names: Vec<_> = live.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["ok.txt"]);
}
