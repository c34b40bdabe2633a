//! In-memory storage backend.
//!
//! [`MemoryTree`] is a scripted directory tree that behaves like a remote
//! share: it can be mutated between scans, made to fail listings, stats or
//! reads a number of times, drop every open connection, reject credentials,
//! or slow every listing down. It backs the
//! engine's own tests and is handy for exercising an HTTP layer without a
//! real SMB or FTP server.
//!
//! # Example
//!
//! ```
//! use catalog_scan::walker::memory::MemoryTree;
//! use catalog_scan::walker::Session;
//!
//! let tree = MemoryTree::new();
//! tree.add_file("/docs/readme.txt", b"hello", 1_700_000_000);
//! let mut session = tree.session();
//! let names: Vec<_> = session.list("/docs").unwrap().into_iter().map(|e| e.name).collect();
//! assert_eq!(names, vec!["readme.txt"]);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::path_utils::{self, ROOT_PATH};
use super::{Connector, RawEntry, Session, WalkError};
use crate::catalog::signature::Signature;
use crate::registry::StorageRoot;

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: i64 },
    File { content: Vec<u8>, modified: i64 },
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    list_failures: HashMap<String, u32>,
    read_failures: HashMap<String, u32>,
    stat_failures: HashMap<String, u32>,
    invalid_names: HashSet<String>,
    connect_failures: u32,
    epoch: u64,
    reject_auth: bool,
    list_delay: Duration,
}

/// A shared, mutable in-memory directory tree.
///
/// Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    state: Arc<Mutex<State>>,
    lists: Arc<AtomicU64>,
    reads: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// A tree containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .nodes
            .insert(ROOT_PATH.to_string(), Node::Dir { modified: 0 });
        Self {
            state: Arc::new(Mutex::new(state)),
            lists: Arc::new(AtomicU64::new(0)),
            reads: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Create a directory and any missing parents.
    pub fn add_dir(&self, path: &str) {
        let path = path_utils::canonicalize(path);
        let mut state = self.lock();
        for dir in path_utils::self_and_ancestors(&path) {
            state
                .nodes
                .entry(dir.to_string())
                .or_insert(Node::Dir { modified: 0 });
        }
    }

    /// Create or overwrite a file, creating missing parent directories.
    pub fn add_file(&self, path: &str, content: &[u8], modified: i64) {
        let path = path_utils::canonicalize(path);
        self.add_dir(path_utils::parent(&path));
        self.lock().nodes.insert(
            path,
            Node::File {
                content: content.to_vec(),
                modified,
            },
        );
    }

    /// Remove a path and everything beneath it.
    pub fn remove(&self, path: &str) {
        let path = path_utils::canonicalize(path);
        self.lock()
            .nodes
            .retain(|p, _| p == ROOT_PATH || !path_utils::is_within(p, &path));
    }

    /// Make the next `times` listings of `path` fail with a connection reset.
    pub fn fail_list(&self, path: &str, times: u32) {
        self.lock()
            .list_failures
            .insert(path_utils::canonicalize(path), times);
    }

    /// Make the next `times` content reads of `path` fail with a reset.
    pub fn fail_read(&self, path: &str, times: u32) {
        self.lock()
            .read_failures
            .insert(path_utils::canonicalize(path), times);
    }

    /// List `path` without metadata and make the next `times` stats of it
    /// fail with a reset.
    pub fn fail_stat(&self, path: &str, times: u32) {
        self.lock()
            .stat_failures
            .insert(path_utils::canonicalize(path), times);
    }

    /// Report `path` in listings as a name that is not valid UTF-8.
    pub fn mark_invalid_name(&self, path: &str) {
        self.lock()
            .invalid_names
            .insert(path_utils::canonicalize(path));
    }

    /// Reset every open session; each fails until it reconnects.
    pub fn drop_connections(&self) {
        self.lock().epoch += 1;
    }

    /// Make the next `times` connection attempts time out.
    pub fn fail_connect(&self, times: u32) {
        self.lock().connect_failures = times;
    }

    /// Reject (or accept again) every connection attempt as unauthorized.
    pub fn reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    /// Sleep this long inside every listing.
    pub fn set_list_delay(&self, delay: Duration) {
        self.lock().list_delay = delay;
    }

    /// Number of successful and failed listings so far.
    #[must_use]
    pub fn list_calls(&self) -> u64 {
        self.lists.load(Ordering::SeqCst)
    }

    /// Number of content reads so far.
    #[must_use]
    pub fn read_calls(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of session reconnects so far.
    #[must_use]
    pub fn reconnect_calls(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Open a session directly, bypassing authentication.
    #[must_use]
    pub fn session(&self) -> MemorySession {
        MemorySession {
            tree: self.clone(),
            epoch: self.lock().epoch,
        }
    }

    /// A connector serving this tree for any root.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { tree: self.clone() }
    }
}

fn reset(path: &str) -> WalkError {
    WalkError::from_io(
        path,
        io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"),
    )
}

fn take_failure(failures: &mut HashMap<String, u32>, path: &str) -> bool {
    match failures.get_mut(path) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

/// Connector over a [`MemoryTree`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tree: MemoryTree,
}

/// Admit a new connection, or refuse it the way the tree is scripted to.
fn admit(state: &mut State, endpoint: &str) -> Result<(), WalkError> {
    if state.reject_auth {
        return Err(WalkError::Auth {
            endpoint: endpoint.to_string(),
            message: "invalid credentials".to_string(),
        });
    }
    if state.connect_failures > 0 {
        state.connect_failures -= 1;
        return Err(WalkError::from_io(
            endpoint,
            io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        ));
    }
    Ok(())
}

impl Connector for MemoryConnector {
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError> {
        admit(&mut self.tree.lock(), &root.endpoint())?;
        Ok(Box::new(self.tree.session()))
    }
}

/// Session over a [`MemoryTree`].
#[derive(Debug)]
pub struct MemorySession {
    tree: MemoryTree,
    epoch: u64,
}

impl MemorySession {
    /// The tree's state, or a reset error when the tree dropped this
    /// session's connection.
    fn connected(&self, path: &str) -> Result<MutexGuard<'_, State>, WalkError> {
        let state = self.tree.lock();
        if state.epoch == self.epoch {
            Ok(state)
        } else {
            Err(reset(path))
        }
    }
}

impl Session for MemorySession {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        self.tree.lists.fetch_add(1, Ordering::SeqCst);
        let delay = self.tree.lock().list_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.connected(path)?;
        if take_failure(&mut state.list_failures, path) {
            return Err(reset(path));
        }
        match state.nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(WalkError::NotADirectory(path.to_string())),
            None => return Err(WalkError::NotFound(path.to_string())),
        }

        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() != ROOT_PATH && path_utils::parent(p) == path)
            .map(|(p, node)| {
                let name = path_utils::file_name(p);
                if state.invalid_names.contains(p) {
                    RawEntry::invalid_name(name)
                } else if state.stat_failures.get(p).is_some_and(|n| *n > 0) {
                    RawEntry::unreadable(name)
                } else {
                    to_raw(name, node)
                }
            })
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        let mut state = self.connected(path)?;
        if take_failure(&mut state.stat_failures, path) {
            return Err(reset(path));
        }
        state
            .nodes
            .get(path)
            .map(|node| to_raw(path_utils::file_name(path), node))
            .ok_or_else(|| WalkError::NotFound(path.to_string()))
    }

    fn reconnect(&mut self) -> Result<(), WalkError> {
        self.tree.reconnects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.tree.lock();
        admit(&mut state, "memory")?;
        self.epoch = state.epoch;
        Ok(())
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        self.tree.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.connected(path)?;
        if take_failure(&mut state.read_failures, path) {
            return Err(reset(path));
        }
        match state.nodes.get(path) {
            Some(Node::File { content, .. }) => Ok(Signature::of_bytes(content)),
            Some(Node::Dir { .. }) => Err(WalkError::Protocol {
                path: path.to_string(),
                message: "is a directory".to_string(),
            }),
            None => Err(WalkError::NotFound(path.to_string())),
        }
    }
}

fn to_raw(name: &str, node: &Node) -> RawEntry {
    match node {
        Node::Dir { modified } => RawEntry::dir(name, *modified),
        Node::File { content, modified } => RawEntry::file(name, content.len() as u64, *modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Protocol, RootSpec};

    #[test]
    fn test_parents_are_created() {
        let tree = MemoryTree::new();
        tree.add_file("/a/b/c.txt", b"c", 5);
        let mut session = tree.session();
        assert!(session.stat("/a/b").unwrap().is_dir);
        assert_eq!(session.list("/a").unwrap(), vec![RawEntry::dir("b", 0)]);
        assert_eq!(session.stat("/a/b/c.txt").unwrap().size, 1);
    }

    #[test]
    fn test_remove_subtree() {
        let tree = MemoryTree::new();
        tree.add_file("/a/b/c.txt", b"c", 5);
        tree.add_file("/ab.txt", b"x", 5);
        tree.remove("/a");
        let names: Vec<_> = tree
            .session()
            .list("/")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["ab.txt"]);
    }

    #[test]
    fn test_injected_list_failures_run_out() {
        let tree = MemoryTree::new();
        tree.fail_list("/", 1);
        let mut session = tree.session();
        assert!(matches!(session.list("/"), Err(WalkError::Transient { .. })));
        assert!(session.list("/").is_ok());
        assert_eq!(tree.list_calls(), 2);
    }

    #[test]
    fn test_dropped_connection_needs_reconnect() {
        let tree = MemoryTree::new();
        tree.add_file("/a.txt", b"a", 1);
        let mut session = tree.session();
        tree.drop_connections();
        assert!(matches!(session.list("/"), Err(WalkError::Transient { .. })));
        assert!(session.signature("/a.txt").is_err());

        session.reconnect().unwrap();
        assert_eq!(session.list("/").unwrap().len(), 1);
        assert_eq!(tree.reconnect_calls(), 1);
    }

    #[test]
    fn test_reconnect_honors_auth() {
        let tree = MemoryTree::new();
        let mut session = tree.session();
        tree.drop_connections();
        tree.reject_auth(true);
        assert!(session.reconnect().unwrap_err().is_fatal());
    }

    #[test]
    fn test_stat_failures_leave_listing_unreadable() {
        let tree = MemoryTree::new();
        tree.add_file("/d/f.txt", b"ff", 3);
        tree.fail_stat("/d/f.txt", 1);
        let mut session = tree.session();
        assert_eq!(session.list("/d").unwrap(), vec![RawEntry::unreadable("f.txt")]);
        assert!(session.stat("/d/f.txt").is_err());
        assert_eq!(session.stat("/d/f.txt").unwrap(), RawEntry::file("f.txt", 2, 3));
        assert_eq!(session.list("/d").unwrap(), vec![RawEntry::file("f.txt", 2, 3)]);
    }

    #[test]
    fn test_list_file_is_not_a_directory() {
        let tree = MemoryTree::new();
        tree.add_file("/f", b"", 0);
        assert!(matches!(
            tree.session().list("/f"),
            Err(WalkError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_connector_rejects_auth() {
        let tree = MemoryTree::new();
        tree.reject_auth(true);
        let root = RootSpec::new("share", Protocol::Smb)
            .with_host("nas")
            .with_path("share")
            .into_root(1, 10);
        let err = tree.connector().connect(&root).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_signature_counts_reads() {
        let tree = MemoryTree::new();
        tree.add_file("/f", b"data", 0);
        let sig = tree.session().signature("/f").unwrap();
        assert_eq!(sig, Signature::of_bytes(b"data"));
        assert_eq!(tree.read_calls(), 1);
    }
}
