//! Protocol walkers: one capability contract, one adapter per protocol.
//!
//! A [`Connector`] opens a [`Session`] against a storage root; the session
//! lists directories, stats paths and streams file content for signatures.
//! The depth-limited, cancellable, retrying traversal on top of a session is
//! protocol independent and lives in [`traverse`].
//!
//! # Architecture
//!
//! - [`local`]: local volumes and NFS mount points (walkdir)
//! - [`ftp`]: FTP servers (suppaftp, `ftp` feature)
//! - [`smb`]: SMB shares (pavao/libsmbclient, `smb` feature)
//! - [`memory`]: scripted in-memory tree for tests and demos
//! - [`retry`]: bounded exponential backoff for transient errors
//! - [`path_utils`]: catalog path helpers
//!
//! # Example
//!
//! ```no_run
//! use catalog_scan::walker::{local::LocalConnector, Connector};
//! use catalog_scan::registry::{Protocol, RootSpec};
//!
//! let spec = RootSpec::new("scratch", Protocol::Local).with_path("/srv/scratch");
//! let root = spec.into_root(1, 10);
//! let mut session = LocalConnector.connect(&root).unwrap();
//! for entry in session.list("/").unwrap() {
//!     println!("{} {}", entry.name, entry.size);
//! }
//! ```

pub mod local;
pub mod memory;
pub mod path_utils;
pub mod retry;
pub mod traverse;

#[cfg(feature = "ftp")]
pub mod ftp;
#[cfg(feature = "smb")]
pub mod smb;
#[cfg(feature = "webdav")]
pub mod webdav;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::catalog::signature::Signature;
use crate::registry::{Protocol, StorageRoot};

pub use retry::{ErrorClass, RetryPolicy};
pub use traverse::{walk, EntrySink, TraversalPlan, WalkFailure, WalkOutcome};

/// Why a listed child came back without usable metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFault {
    /// The listing named the child but its metadata could not be read.
    /// The walker stats it again under the retry policy.
    Unreadable,
    /// The name cannot be represented as a UTF-8 catalog path. `name`
    /// holds a lossy rendering for messages only.
    InvalidName,
}

/// One child as reported by a protocol listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry name, already NFC-normalized by the adapter
    pub name: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time as Unix seconds
    pub modified: i64,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Set when the listing could not describe the child
    pub fault: Option<EntryFault>,
}

impl RawEntry {
    /// A regular file entry.
    #[must_use]
    pub fn file(name: impl Into<String>, size: u64, modified: i64) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_dir: false,
            fault: None,
        }
    }

    /// A directory entry.
    #[must_use]
    pub fn dir(name: impl Into<String>, modified: i64) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified,
            is_dir: true,
            fault: None,
        }
    }

    /// A child whose metadata could not be read during the listing.
    #[must_use]
    pub fn unreadable(name: impl Into<String>) -> Self {
        Self {
            fault: Some(EntryFault::Unreadable),
            ..Self::file(name, 0, 0)
        }
    }

    /// A child whose name is not valid UTF-8.
    #[must_use]
    pub fn invalid_name(lossy: impl Into<String>) -> Self {
        Self {
            fault: Some(EntryFault::InvalidName),
            ..Self::file(lossy, 0, 0)
        }
    }
}

/// An entry discovered by the traversal, addressed by its catalog path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredEntry {
    /// Root-relative catalog path (`/a/b.txt`)
    pub path: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time as Unix seconds
    pub modified: i64,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Depth below the root (children of `/` are depth 1)
    pub depth: u32,
}

/// Errors raised by connectors and sessions.
#[derive(thiserror::Error, Debug)]
pub enum WalkError {
    /// Connection reset, timeout and similar; retried with backoff.
    #[error("transient I/O error for {path}: {source}")]
    Transient {
        /// Path (or endpoint) being accessed
        path: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Credentials were rejected. Fatal to the whole job.
    #[error("authentication failed for {endpoint}: {message}")]
    Auth {
        /// Server endpoint
        endpoint: String,
        /// Server supplied reason
        message: String,
    },

    /// No adapter is available for the protocol. Fatal to the whole job.
    #[error("unsupported protocol: {0}")]
    Unsupported(Protocol),

    /// The root definition cannot be used by this adapter.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The path does not exist on the remote side.
    #[error("path not found: {0}")]
    NotFound(String),

    /// Access to the path was denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Non-retryable I/O failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path being accessed
        path: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An entry name that cannot become a catalog path.
    #[error("name is not valid UTF-8: {0}")]
    InvalidName(String),

    /// The server answered with something the adapter could not use.
    #[error("protocol error for {path}: {message}")]
    Protocol {
        /// Path being accessed
        path: String,
        /// Description of the failure
        message: String,
    },
}

impl WalkError {
    /// Classify an I/O error for the given path.
    #[must_use]
    pub fn from_io(path: impl Into<String>, error: io::Error) -> Self {
        use io::ErrorKind;

        let path = path.into();
        match error.kind() {
            ErrorKind::NotFound => Self::NotFound(path),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::UnexpectedEof => Self::Transient {
                path,
                source: error,
            },
            _ => Self::Io {
                path,
                source: error,
            },
        }
    }

    /// Whether the error may go away on retry.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } => ErrorClass::Retryable,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether the error aborts the whole job rather than one subtree.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Unsupported(_) | Self::InvalidConfiguration(_)
        )
    }
}

/// Opens sessions against storage roots of one protocol.
pub trait Connector: Send + Sync {
    /// Connect and authenticate against the root.
    ///
    /// # Errors
    ///
    /// [`WalkError::Auth`] when credentials are rejected, a retryable
    /// [`WalkError::Transient`] when the server cannot be reached.
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError>;
}

/// An open connection to a storage root.
///
/// All paths are catalog paths (`/`, `/a/b`); the session maps them onto
/// the root's host path prefix.
pub trait Session: Send {
    /// List the children of a directory, in the order the server returns
    /// them. `.` and `..` are never included.
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError>;

    /// Stat a single path.
    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError>;

    /// Stream a file's content through the signature hasher.
    fn signature(&mut self, path: &str) -> Result<Signature, WalkError>;

    /// Drop the current connection and open a fresh one. Called before a
    /// transient failure is retried, since a reset connection stays dead.
    ///
    /// Stateless adapters keep the default no-op.
    ///
    /// # Errors
    ///
    /// Same as [`Connector::connect`].
    fn reconnect(&mut self) -> Result<(), WalkError> {
        Ok(())
    }

    /// Release the connection. Errors on close are logged, never surfaced.
    fn close(&mut self) {}
}

/// Protocol tag to connector lookup, shared by all scan workers.
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<Protocol, Arc<dyn Connector>>,
}

impl ConnectorSet {
    /// An empty set; every protocol is unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The adapters compiled into this build.
    #[must_use]
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.insert(Protocol::Local, Arc::new(local::LocalConnector));
        set.insert(Protocol::Nfs, Arc::new(local::LocalConnector));
        #[cfg(feature = "ftp")]
        set.insert(Protocol::Ftp, Arc::new(ftp::FtpConnector::default()));
        #[cfg(feature = "smb")]
        set.insert(Protocol::Smb, Arc::new(smb::SmbConnector));
        #[cfg(feature = "webdav")]
        set.insert(Protocol::Webdav, Arc::new(webdav::WebdavConnector));
        set
    }

    /// Register (or replace) the connector for a protocol.
    pub fn insert(&mut self, protocol: Protocol, connector: Arc<dyn Connector>) {
        self.connectors.insert(protocol, connector);
    }

    /// Look up the connector for a protocol.
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&protocol).cloned()
    }

    /// Protocols with an adapter.
    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<_> = self.connectors.keys().copied().collect();
        protocols.sort();
        protocols
    }
}

impl std::fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSet")
            .field("protocols", &self.protocols())
            .finish()
    }
}

/// Convert a `SystemTime` to Unix seconds, clamping pre-epoch times to 0.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
