use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_scan::catalog::database::{Database, IN_MEMORY};
use catalog_scan::config::Config;
use catalog_scan::engine::ScanEngine;
use catalog_scan::registry::{Protocol, RootRef, RootSpec};
use catalog_scan::scheduler::{JobId, ScanRequest, ScanState, ScanStatus, ScanType};
use catalog_scan::walker::memory::MemoryTree;
use catalog_scan::walker::retry::RetryPolicy;
use catalog_scan::walker::ConnectorSet;

pub const WAIT: Duration = Duration::from_secs(30);

/// Retries that do not slow tests down.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
    }
}

pub fn memory_config(workers: usize) -> Config {
    Config {
        database: Some(IN_MEMORY.into()),
        workers,
        retry: fast_retry(),
        ..Config::default()
    }
}

/// An engine over an in-memory catalog whose SMB connector serves `tree`.
pub fn memory_engine(workers: usize) -> (ScanEngine, MemoryTree) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let engine = ScanEngine::with_database(memory_config(workers), db, ConnectorSet::empty()).unwrap();
    let tree = MemoryTree::new();
    engine.register_connector(Protocol::Smb, Arc::new(tree.connector()));
    (engine, tree)
}

pub fn smb_root(name: &str) -> RootSpec {
    RootSpec::new(name, Protocol::Smb)
        .with_host("nas.local")
        .with_path("/share")
        .with_credentials("scanner", "secret")
}

pub fn scan(engine: &ScanEngine, root: &str, scan_type: ScanType) -> ScanStatus {
    let job = engine
        .queue_scan(ScanRequest::new(RootRef::parse(root), scan_type))
        .unwrap();
    finish(engine, &job)
}

pub fn finish(engine: &ScanEngine, job: &JobId) -> ScanStatus {
    let status = engine.wait_for(job, Some(WAIT)).unwrap();
    assert!(status.state.is_terminal(), "job {job} still {}", status.state);
    status
}

/// Poll until the job has left the queue.
pub fn wait_until_scanning(engine: &ScanEngine, job: &JobId) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        let state = engine.get_active_scan_status(job).unwrap().state;
        if state != ScanState::Queued {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("job {job} never started");
}
