use std::sync::Barrier;
use std::time::Duration;

use catalog_scan::error::ScanError;
use catalog_scan::registry::RootRef;
use catalog_scan::scheduler::{ScanRequest, ScanState, ScanType};

use super::common::{finish, memory_engine, scan, smb_root, wait_until_scanning};

#[test]
fn test_share_scan_counts_every_file() {
    let (engine, tree) = memory_engine(2);
    for i in 0..200 {
        let path = format!("/dept{}/team{}/file{i:03}.dat", i % 10, i % 3);
        tree.add_file(&path, format!("content {i}").as_bytes(), 1_700_000_000);
    }
    engine
        .register_root(smb_root("Test Share").with_max_depth(5))
        .unwrap();

    let job = engine
        .queue_scan(ScanRequest::new("Test Share", ScanType::Full))
        .unwrap();
    let status = finish(&engine, &job);

    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.files_found, 200);
    assert_eq!(status.files_processed, 200);
    assert_eq!(status.error_count, 0);
    assert!(status.finished_at.is_some());

    let root = engine.get_root(&"Test Share".into()).unwrap();
    assert!(root.last_scan_at.is_some());
    assert_eq!(engine.list_directory(&root.id.into(), "/").unwrap().len(), 10);
}

#[test]
fn test_unknown_root_is_rejected_without_status() {
    let (engine, _tree) = memory_engine(1);
    let err = engine
        .queue_scan(ScanRequest::new("nowhere", ScanType::Incremental))
        .unwrap_err();
    assert!(matches!(err, ScanError::RootNotFound(RootRef::Name(ref n)) if n == "nowhere"));
    assert!(engine.get_all_active_scan_statuses().is_empty());
}

#[test]
fn test_reregistering_a_name_overwrites_the_root() {
    let (engine, _tree) = memory_engine(1);
    let first = engine.register_root(smb_root("nas")).unwrap();
    let second = engine
        .register_root(smb_root("nas").with_max_depth(3).with_path("/other"))
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.max_depth, 3);
    assert_eq!(second.path.as_deref(), Some("/other"));
    assert_eq!(engine.list_roots().unwrap().len(), 1);
}

#[test]
fn test_reregistering_during_first_scan_keeps_aggregates_exact() {
    let (engine, tree) = memory_engine(1);
    for d in 0..30 {
        for f in 0..10 {
            tree.add_file(&format!("/d{d}/f{f}.bin"), &[d as u8; 16], 1);
        }
    }
    let root = engine.register_root(smb_root("busy")).unwrap();
    tree.set_list_delay(Duration::from_millis(5));

    let job = engine
        .queue_scan(ScanRequest::new(root.id, ScanType::Full))
        .unwrap();
    wait_until_scanning(&engine, &job);
    while !engine.get_active_scan_status(&job).unwrap().state.is_terminal() {
        engine.register_root(smb_root("busy")).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }

    let status = finish(&engine, &job);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.files_found, 300);
    let id = RootRef::from(root.id);
    assert_eq!(
        engine.aggregates(&id).unwrap(),
        engine.recompute_aggregates(&id).unwrap()
    );
}

#[test]
fn test_concurrent_submissions_admit_one_job_per_root() {
    let (engine, tree) = memory_engine(4);
    for i in 0..5 {
        tree.add_file(&format!("/d{i}/f"), b"x", 1);
    }
    tree.set_list_delay(Duration::from_millis(100));
    engine.register_root(smb_root("busy")).unwrap();

    let barrier = Barrier::new(8);
    let (barrier, shared) = (&barrier, &engine);
    let results = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    barrier.wait();
                    shared.queue_scan(ScanRequest::new("busy", ScanType::Incremental))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);
    for result in &results {
        if let Err(err) = result {
            match err {
                ScanError::AlreadyScanning { job_id, .. } => assert_eq!(job_id, admitted[0]),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    let status = finish(&engine, admitted[0]);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(engine.get_all_active_scan_statuses().len(), 1);
}

#[test]
fn test_new_job_is_admitted_after_the_previous_one_finishes() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/a", b"a", 1);
    engine.register_root(smb_root("again")).unwrap();

    let first = scan(&engine, "again", ScanType::Full);
    let second = scan(&engine, "again", ScanType::Incremental);
    assert_ne!(first.job_id, second.job_id);
    assert_eq!(second.state, ScanState::Completed);
    assert_eq!(engine.get_all_active_scan_statuses().len(), 2);
}

#[test]
fn test_cancelled_scan_keeps_committed_records() {
    let (engine, tree) = memory_engine(1);
    for i in 0..10 {
        tree.add_file(&format!("/d{i}/f.txt"), b"data", 1);
    }
    engine.register_root(smb_root("slow")).unwrap();
    assert_eq!(scan(&engine, "slow", ScanType::Full).state, ScanState::Completed);

    tree.remove("/d9");
    tree.set_list_delay(Duration::from_millis(100));
    let job = engine
        .queue_scan(ScanRequest::new("slow", ScanType::Incremental))
        .unwrap();
    wait_until_scanning(&engine, &job);
    assert!(engine.cancel_scan(&job).unwrap());

    let status = finish(&engine, &job);
    assert_eq!(status.state, ScanState::Cancelled);
    assert_eq!(status.files_deleted, 0);

    let record = engine
        .lookup_path(&"slow".into(), "/d9/f.txt")
        .unwrap()
        .unwrap();
    assert!(!record.deleted);
}

#[test]
fn test_removing_a_root_mid_scan_cancels_and_purges() {
    let (engine, tree) = memory_engine(1);
    for i in 0..10 {
        tree.add_file(&format!("/d{i}/f.txt"), b"data", 1);
    }
    let root = engine.register_root(smb_root("doomed")).unwrap();
    tree.set_list_delay(Duration::from_millis(50));

    let job = engine
        .queue_scan(ScanRequest::new(root.id, ScanType::Full))
        .unwrap();
    wait_until_scanning(&engine, &job);
    engine.remove_root(&root.id.into()).unwrap();

    let status = finish(&engine, &job);
    assert_eq!(status.state, ScanState::Cancelled);
    assert!(matches!(
        engine.list_directory(&root.id.into(), "/"),
        Err(ScanError::RootNotFound(_))
    ));
    assert!(engine.list_roots().unwrap().is_empty());
}

#[test]
fn test_disabled_root_refuses_scans_until_enabled() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/x", b"x", 1);
    engine.register_root(smb_root("off")).unwrap();
    engine.set_root_enabled(&"off".into(), false).unwrap();

    assert!(matches!(
        engine.queue_scan(ScanRequest::new("off", ScanType::Full)),
        Err(ScanError::InvalidConfiguration(_))
    ));

    engine.set_root_enabled(&"off".into(), true).unwrap();
    assert_eq!(scan(&engine, "off", ScanType::Full).state, ScanState::Completed);
}
