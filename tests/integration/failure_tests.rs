use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catalog_scan::catalog::database::Database;
use catalog_scan::catalog::{
    CatalogError, CatalogStore, DuplicateGroup, FileRecord, NoopObserver, Signature, SqliteCatalog,
};
use catalog_scan::error::ErrorKind;
use catalog_scan::registry::{Protocol, RootId, RootRef, RootRegistry};
use catalog_scan::scheduler::{ScanRequest, ScanScheduler, ScanState, ScanType, SchedulerOptions};
use catalog_scan::walker::memory::MemoryTree;
use catalog_scan::walker::{ConnectorSet, DiscoveredEntry};

use super::common::{fast_retry, memory_engine, scan, smb_root, WAIT};

/// Catalog that becomes unavailable after a number of inserts, and whose
/// sweep query can be made slow.
struct FlakyCatalog {
    inner: SqliteCatalog,
    inserts_left: AtomicUsize,
    sweep_delay: Duration,
}

impl FlakyCatalog {
    fn new(db: &Arc<Database>, inserts_left: usize, sweep_delay: Duration) -> Self {
        Self {
            inner: SqliteCatalog::new(Arc::clone(db)),
            inserts_left: AtomicUsize::new(inserts_left),
            sweep_delay,
        }
    }
}

fn start_scheduler(
    registry: RootRegistry,
    catalog: &Arc<FlakyCatalog>,
    tree: &MemoryTree,
) -> ScanScheduler {
    let mut connectors = ConnectorSet::empty();
    connectors.insert(Protocol::Smb, Arc::new(tree.connector()));
    ScanScheduler::start(
        registry,
        Arc::clone(catalog) as Arc<dyn CatalogStore>,
        Arc::new(NoopObserver),
        connectors,
        SchedulerOptions {
            workers: 1,
            retry: fast_retry(),
            ..SchedulerOptions::default()
        },
    )
    .unwrap()
}

impl CatalogStore for FlakyCatalog {
    fn next_generation(&self, root: RootId) -> Result<u64, CatalogError> {
        self.inner.next_generation(root)
    }

    fn find_live(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError> {
        self.inner.find_live(root, path)
    }

    fn insert(
        &self,
        root: RootId,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError> {
        let left = self.inserts_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(CatalogError::Unavailable("disk went away".into()));
        }
        self.inserts_left.store(left - 1, Ordering::SeqCst);
        self.inner.insert(root, entry, signature, generation)
    }

    fn update(
        &self,
        existing: &FileRecord,
        entry: &DiscoveredEntry,
        signature: Option<&Signature>,
        generation: u64,
    ) -> Result<FileRecord, CatalogError> {
        self.inner.update(existing, entry, signature, generation)
    }

    fn touch(&self, id: i64, generation: u64) -> Result<(), CatalogError> {
        self.inner.touch(id, generation)
    }

    fn soft_delete(&self, id: i64) -> Result<Option<FileRecord>, CatalogError> {
        self.inner.soft_delete(id)
    }

    fn stale_records(
        &self,
        root: RootId,
        generation: u64,
        scope: &str,
    ) -> Result<Vec<FileRecord>, CatalogError> {
        std::thread::sleep(self.sweep_delay);
        self.inner.stale_records(root, generation, scope)
    }

    fn live_records(&self, root: RootId) -> Result<Vec<FileRecord>, CatalogError> {
        self.inner.live_records(root)
    }

    fn lookup_path(&self, root: RootId, path: &str) -> Result<Option<FileRecord>, CatalogError> {
        self.inner.lookup_path(root, path)
    }

    fn list_children(&self, root: RootId, dir: &str) -> Result<Vec<FileRecord>, CatalogError> {
        self.inner.list_children(root, dir)
    }

    fn duplicate_groups(&self, root: RootId) -> Result<Vec<DuplicateGroup>, CatalogError> {
        self.inner.duplicate_groups(root)
    }
}

#[test]
fn test_store_outage_fails_the_job_as_persistence() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = RootRegistry::new(Arc::clone(&db), 10);
    let catalog = Arc::new(FlakyCatalog::new(&db, 2, Duration::ZERO));
    let tree = MemoryTree::new();
    for i in 0..5 {
        tree.add_file(&format!("/f{i}"), b"x", 1);
    }
    let root = registry.register(smb_root("share")).unwrap();
    let scheduler = start_scheduler(registry, &catalog, &tree);

    let job = scheduler
        .queue_scan(ScanRequest::new("share", ScanType::Full))
        .unwrap();
    let status = scheduler.wait_for(&job, Some(WAIT)).unwrap();
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.error_kind, Some(ErrorKind::Persistence));
    assert!(status.last_error.unwrap().contains("disk went away"));
    assert_eq!(status.files_updated, 2);

    // Rows written before the outage stay; nothing was swept.
    assert_eq!(catalog.live_records(root.id).unwrap().len(), 2);
    scheduler.shutdown();
}

#[test]
fn test_deadline_passing_during_sweep_still_completes() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = RootRegistry::new(Arc::clone(&db), 10);
    let catalog = Arc::new(FlakyCatalog::new(
        &db,
        usize::MAX,
        Duration::from_millis(300),
    ));
    let tree = MemoryTree::new();
    tree.add_file("/keep.txt", b"k", 1);
    tree.add_file("/gone.txt", b"g", 1);
    let root = registry.register(smb_root("share")).unwrap();
    let scheduler = start_scheduler(registry.clone(), &catalog, &tree);

    let job = scheduler
        .queue_scan(ScanRequest::new("share", ScanType::Full))
        .unwrap();
    assert_eq!(
        scheduler.wait_for(&job, Some(WAIT)).unwrap().state,
        ScanState::Completed
    );

    tree.remove("/gone.txt");
    let job = scheduler
        .queue_scan(
            ScanRequest::new("share", ScanType::Full).with_timeout(Duration::from_millis(100)),
        )
        .unwrap();
    let status = scheduler.wait_for(&job, Some(WAIT)).unwrap();

    // The sweep committed, so the job reports what the catalog shows.
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.last_error, None);
    assert_eq!(status.files_deleted, 1);
    let gone = catalog.lookup_path(root.id, "/gone.txt").unwrap().unwrap();
    assert!(gone.deleted);
    assert!(registry
        .resolve(&RootRef::Id(root.id))
        .unwrap()
        .last_scan_at
        .is_some());
    scheduler.shutdown();
}

#[test]
fn test_unstatable_file_is_counted_and_kept() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/d/f.txt", b"f", 1);
    tree.add_file("/d/g.txt", b"g", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);

    tree.fail_stat("/d/f.txt", 100);
    let status = scan(&engine, "share", ScanType::Incremental);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.files_deleted, 0);
    let record = engine
        .lookup_path(&"share".into(), "/d/f.txt")
        .unwrap()
        .unwrap();
    assert!(!record.deleted);
}

#[test]
fn test_unlistable_subdirectory_degrades_only_its_subtree() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/ok/a.txt", b"a", 1);
    tree.add_file("/bad/b.txt", b"b", 1);
    engine.register_root(smb_root("share")).unwrap();
    scan(&engine, "share", ScanType::Full);

    tree.remove("/ok/a.txt");
    tree.fail_list("/bad", 10);
    let status = scan(&engine, "share", ScanType::Incremental);

    assert_eq!(status.state, ScanState::Completed);
    assert!(status.error_count >= 1);
    assert_eq!(status.files_deleted, 1);

    let root = RootRef::from("share");
    let kept = engine.lookup_path(&root, "/bad/b.txt").unwrap().unwrap();
    assert!(!kept.deleted);
    assert!(engine.lookup_path(&root, "/ok/a.txt").unwrap().unwrap().deleted);
}

#[test]
fn test_unlistable_start_directory_fails_the_job() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/a.txt", b"a", 1);
    engine.register_root(smb_root("share")).unwrap();
    tree.fail_list("/", 10);

    let status = scan(&engine, "share", ScanType::Full);
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.error_kind, Some(ErrorKind::TransientIo));
    assert!(engine.get_root(&"share".into()).unwrap().last_scan_at.is_none());
}

#[test]
fn test_rejected_credentials_fail_without_listing() {
    let (engine, tree) = memory_engine(1);
    tree.reject_auth(true);
    engine.register_root(smb_root("share")).unwrap();

    let status = scan(&engine, "share", ScanType::Full);
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.error_kind, Some(ErrorKind::FatalProtocol));
    assert_eq!(tree.list_calls(), 0);
}

#[test]
fn test_unreadable_file_is_cataloged_unsigned() {
    let (engine, tree) = memory_engine(1);
    tree.add_file("/good.txt", b"good", 1);
    tree.add_file("/locked.txt", b"locked", 1);
    tree.fail_read("/locked.txt", 10);
    engine.register_root(smb_root("share")).unwrap();

    let status = scan(&engine, "share", ScanType::Full);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.files_processed, 2);
    assert!(status.error_count >= 1);

    let record = engine
        .lookup_path(&"share".into(), "/locked.txt")
        .unwrap()
        .unwrap();
    assert!(record.signature.is_none());
    assert_eq!(record.size, 6);
}
