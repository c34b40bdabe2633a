use catalog_scan::registry::RootRef;
use catalog_scan::scheduler::{ScanRequest, ScanState, ScanType};

use super::common::{finish, memory_engine, scan, smb_root};

fn root() -> RootRef {
    RootRef::from("share")
}

#[test]
fn test_vanished_file_is_soft_deleted() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/a/keep.txt", b"keep", 1);
    tree.add_file("/a/gone.txt", b"gone!", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);
    assert_eq!(engine.directory_aggregate(&root(), "/a").unwrap().unwrap().total_size, 9);

    tree.remove("/a/gone.txt");
    let status = scan(&engine, "share", ScanType::Incremental);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.files_deleted, 1);

    let names: Vec<_> = engine
        .list_directory(&root(), "/a")
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["keep.txt"]);

    let deleted = engine.lookup_path(&root(), "/a/gone.txt").unwrap().unwrap();
    assert!(deleted.deleted);
    assert!(deleted.deleted_at.is_some());

    assert_eq!(engine.directory_aggregate(&root(), "/a").unwrap().unwrap().total_size, 4);
    assert_eq!(
        engine.aggregates(&root()).unwrap(),
        engine.recompute_aggregates(&root()).unwrap()
    );
}

#[test]
fn test_reappearing_file_gets_a_live_record() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/f.txt", b"v1", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);
    let original = engine.lookup_path(&root(), "/f.txt").unwrap().unwrap();

    tree.remove("/f.txt");
    scan(&engine, "share", ScanType::Incremental);
    tree.add_file("/f.txt", b"v2", 2);
    scan(&engine, "share", ScanType::Incremental);

    let current = engine.lookup_path(&root(), "/f.txt").unwrap().unwrap();
    assert!(!current.deleted);
    assert_ne!(current.id, original.id);
    assert_ne!(current.signature, original.signature);
}

#[test]
fn test_duplicates_roll_up_the_ancestor_chain() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/p/q/a.bin", b"same bytes", 1);
    tree.add_file("/p/r/b.bin", b"same bytes", 1);
    tree.add_file("/s/c.bin", b"unique", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);

    let dupes = |path: &str| {
        engine
            .directory_aggregate(&root(), path)
            .unwrap()
            .map_or(0, |a| a.duplicate_files)
    };
    assert_eq!(dupes("/"), 2);
    assert_eq!(dupes("/p"), 2);
    assert_eq!(dupes("/p/q"), 1);
    assert_eq!(dupes("/p/r"), 1);
    assert_eq!(dupes("/s"), 0);

    let ranked: Vec<_> = engine
        .sorted_by_duplicates(&root(), false)
        .unwrap()
        .into_iter()
        .map(|a| a.path)
        .take(2)
        .collect();
    assert_eq!(ranked, vec!["/", "/p"]);

    // Changing one copy breaks the pair on both sides.
    tree.add_file("/p/r/b.bin", b"now different", 2);
    scan(&engine, "share", ScanType::Incremental);
    assert_eq!(dupes("/"), 0);
    assert_eq!(dupes("/p/q"), 0);
    assert!(engine.duplicate_groups(&root()).unwrap().is_empty());
}

#[test]
fn test_incremental_scan_skips_unchanged_files() {
    let (engine, tree) = memory_engine(1);
    for i in 0..5 {
        tree.add_file(&format!("/docs/{i}.txt"), format!("doc {i}").as_bytes(), 10);
    }
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);
    let reads = tree.read_calls();
    assert_eq!(reads, 5);

    let status = scan(&engine, "share", ScanType::Incremental);
    assert_eq!(status.files_processed, 5);
    assert_eq!(status.files_updated, 0);
    assert_eq!(tree.read_calls(), reads);

    tree.add_file("/docs/0.txt", b"edited", 11);
    let status = scan(&engine, "share", ScanType::Incremental);
    assert_eq!(status.files_updated, 1);
    assert_eq!(tree.read_calls(), reads + 1);

    scan(&engine, "share", ScanType::Full);
    assert_eq!(tree.read_calls(), reads + 1 + 5);
}

#[test]
fn test_sub_path_scan_only_reconciles_its_subtree() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/in/a.txt", b"a", 1);
    tree.add_file("/out/b.txt", b"b", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);

    tree.remove("/in/a.txt");
    tree.remove("/out/b.txt");
    let job = engine
        .queue_scan(ScanRequest::new("share", ScanType::Incremental).with_path("/in"))
        .unwrap();
    let status = finish(&engine, &job);
    assert_eq!(status.files_deleted, 1);

    assert!(engine.lookup_path(&root(), "/in/a.txt").unwrap().unwrap().deleted);
    assert!(!engine.lookup_path(&root(), "/out/b.txt").unwrap().unwrap().deleted);
}

#[test]
fn test_depth_limit_stops_descent() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/1/2/3/deep.txt", b"deep", 1);
    tree.add_file("/1/shallow.txt", b"shallow", 1);
    engine.register_root(smb_root("share").with_max_depth(2)).unwrap();
    scan(&engine, "share", ScanType::Full);

    assert!(engine.lookup_path(&root(), "/1/shallow.txt").unwrap().is_some());
    // Directories at the limit are listed; their subdirectories are
    // recorded but not descended into.
    assert!(engine.lookup_path(&root(), "/1/2/3").unwrap().is_some());
    assert!(engine.lookup_path(&root(), "/1/2/3/deep.txt").unwrap().is_none());
}

#[test]
fn test_exclude_patterns_hide_entries() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/a.txt", b"a", 1);
    tree.add_file("/a.tmp", b"t", 1);
    tree.add_file("/cache/x.bin", b"x", 1);
    engine
        .register_root(smb_root("share").with_excludes(["*.tmp", "cache/"]))
        .unwrap();
    let status = scan(&engine, "share", ScanType::Full);
    assert_eq!(status.files_found, 1);

    let names: Vec<_> = engine
        .list_directory(&root(), "/")
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["a.txt"]);
}
