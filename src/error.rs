//! Engine error taxonomy, exit codes and structured error output.

use serde::Serialize;

use crate::catalog::CatalogError;
use crate::registry::{RegistryError, RootRef};
use crate::scheduler::JobId;
use crate::walker::WalkError;

/// Errors returned by the scan engine.
///
/// Submission-time errors (`InvalidConfiguration`, `RootNotFound`,
/// `AlreadyScanning`) come back from the call itself. Execution-time errors
/// only ever show up in a job's [`ScanStatus`](crate::scheduler::ScanStatus).
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// A root definition or request was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The named root is not registered.
    #[error("storage root {0} not found")]
    RootNotFound(RootRef),

    /// No status is retained for the job.
    #[error("scan job {0} not found")]
    JobNotFound(JobId),

    /// Another job for the same root is queued or scanning.
    #[error("storage root '{root}' is already being scanned by job {job_id}")]
    AlreadyScanning {
        /// Root name
        root: String,
        /// The job holding the root
        job_id: JobId,
    },

    /// The scheduler no longer accepts jobs.
    #[error("scan scheduler is shutting down")]
    ShuttingDown,

    /// Walker failure.
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// Catalog failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Registry persistence failure.
    #[error("root registry error: {0}")]
    Registry(#[source] RegistryError),

    /// Worker threads could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for ScanError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(root) => Self::RootNotFound(root),
            RegistryError::InvalidConfiguration(message) => Self::InvalidConfiguration(message),
            other => Self::Registry(other),
        }
    }
}

/// Coarse error category, as reported in job statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad root definition or request
    InvalidConfiguration,
    /// Unknown root
    RootNotFound,
    /// Unknown job
    JobNotFound,
    /// Admission rejected
    AlreadyScanning,
    /// Network or I/O failure that outlived its retries
    TransientIo,
    /// Authentication or unsupported protocol
    FatalProtocol,
    /// Catalog or registry storage failure
    Persistence,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid_configuration",
            Self::RootNotFound => "root_not_found",
            Self::JobNotFound => "job_not_found",
            Self::AlreadyScanning => "already_scanning",
            Self::TransientIo => "transient_io",
            Self::FatalProtocol => "fatal_protocol",
            Self::Persistence => "persistence",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScanError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::RootNotFound(_) => ErrorKind::RootNotFound,
            Self::JobNotFound(_) => ErrorKind::JobNotFound,
            Self::AlreadyScanning { .. } => ErrorKind::AlreadyScanning,
            Self::Walk(
                WalkError::InvalidConfiguration(_)
                | WalkError::NotFound(_)
                | WalkError::NotADirectory(_),
            ) => ErrorKind::InvalidConfiguration,
            Self::Walk(e) if e.is_fatal() => ErrorKind::FatalProtocol,
            Self::Walk(_) => ErrorKind::TransientIo,
            Self::Catalog(_) | Self::Registry(_) => ErrorKind::Persistence,
            Self::ShuttingDown | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Process exit codes of the `catalog-scan` binary.
///
/// - 0: success
/// - 1: general error
/// - 3: scan completed with per-entry errors
/// - 4: scan failed
/// - 130: interrupted by the user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Scan completed but some entries could not be processed.
    PartialSuccess = 3,
    /// Scan ended in the `failed` state.
    ScanFailed = 4,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "CS000",
            Self::GeneralError => "CS001",
            Self::PartialSuccess => "CS003",
            Self::ScanFailed => "CS004",
            Self::Interrupted => "CS130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "CS001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Engine error category, when the failure came from the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            kind: err.downcast_ref::<ScanError>().map(ScanError::kind),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Protocol;
    use std::io;

    #[test]
    fn test_registry_errors_map_to_taxonomy() {
        let err: ScanError = RegistryError::NotFound(RootRef::Id(7)).into();
        assert!(matches!(err, ScanError::RootNotFound(RootRef::Id(7))));
        assert_eq!(err.to_string(), "storage root #7 not found");

        let err: ScanError = RegistryError::InvalidConfiguration("bad".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_walk_error_kinds() {
        let auth = ScanError::Walk(WalkError::Auth {
            endpoint: "smb://nas/share".into(),
            message: "denied".into(),
        });
        assert_eq!(auth.kind(), ErrorKind::FatalProtocol);

        let unsupported = ScanError::Walk(WalkError::Unsupported(Protocol::Webdav));
        assert_eq!(unsupported.kind(), ErrorKind::FatalProtocol);
        assert_eq!(unsupported.to_string(), "unsupported protocol: webdav");

        let transient = ScanError::Walk(WalkError::from_io(
            "/a",
            io::Error::new(io::ErrorKind::TimedOut, "slow"),
        ));
        assert_eq!(transient.kind(), ErrorKind::TransientIo);
    }

    #[test]
    fn test_catalog_errors_are_persistence() {
        let err = ScanError::Catalog(CatalogError::Unavailable("disk gone".into()));
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(err.to_string(), "catalog store unavailable: disk gone");
    }

    #[test]
    fn test_already_scanning_message() {
        let err = ScanError::AlreadyScanning {
            root: "Test Share".into(),
            job_id: JobId::from("abc"),
        };
        assert_eq!(
            err.to_string(),
            "storage root 'Test Share' is already being scanned by job abc"
        );
    }

    #[test]
    fn test_structured_error_carries_kind() {
        let err = anyhow::Error::new(ScanError::ShuttingDown);
        let structured = StructuredError::new(&err, ExitCode::GeneralError);
        assert_eq!(structured.code, "CS001");
        assert_eq!(structured.kind, Some(ErrorKind::Internal));
        assert!(!structured.interrupted);

        let json = serde_json::to_string(&structured).unwrap();
        assert!(json.contains("\"kind\":\"internal\""));
    }

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::PartialSuccess.as_i32(), 3);
        assert_eq!(ExitCode::ScanFailed.as_i32(), 4);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
    }
}
