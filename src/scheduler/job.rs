//! Scan requests and the jobs they become.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CancelToken;
use crate::registry::{RootRef, StorageRoot};

/// Opaque, unique scan job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// A fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How much to trust the previous catalog state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Re-sign every file.
    Full,
    /// Skip files whose size and mtime are unchanged.
    #[default]
    Incremental,
}

impl ScanType {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown scan type '{other}'")),
        }
    }
}

/// A request to scan one storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Target root
    pub root: RootRef,
    /// Full or incremental
    pub scan_type: ScanType,
    /// Overrides the root's `max_depth`
    pub max_depth: Option<u32>,
    /// Sub-path under the root to scan instead of the whole root
    pub path: Option<String>,
    /// Deadline measured from when a worker starts the job
    pub timeout: Option<Duration>,
}

impl ScanRequest {
    /// Scan the whole of `root`.
    pub fn new(root: impl Into<RootRef>, scan_type: ScanType) -> Self {
        Self {
            root: root.into(),
            scan_type,
            max_depth: None,
            path: None,
            timeout: None,
        }
    }

    /// Override the depth limit.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Only scan beneath `path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Cancel the job if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An admitted request, resolved against the registry at submission time.
///
/// Never mutated after dispatch; the root is the copy taken at submission,
/// so re-registering the root does not affect a job already in flight.
#[derive(Debug, Clone)]
pub struct ScanJob {
    /// Job identifier
    pub id: JobId,
    /// Resolved root
    pub root: StorageRoot,
    /// Full or incremental
    pub scan_type: ScanType,
    /// Effective depth limit
    pub max_depth: u32,
    /// Canonical catalog path the walk starts from
    pub path: String,
    /// Optional run-time deadline
    pub timeout: Option<Duration>,
    /// When the job was admitted
    pub submitted_at: DateTime<Utc>,
    /// Cancellation flag shared with the scheduler
    pub cancel: CancelToken,
}
