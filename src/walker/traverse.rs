//! Protocol-independent, depth-limited traversal.
//!
//! # Overview
//!
//! [`walk`] drives a [`Session`] depth first from a start directory and
//! hands every discovered entry to an [`EntrySink`] in a stable order:
//! children of a directory are emitted sorted by name, then each
//! subdirectory is descended into in the same order.
//!
//! Depth is measured from the storage root, which is depth 0. A directory
//! is listed only while its depth is at most `max_depth`, so `max_depth = 0`
//! lists the root's immediate children and stops there.
//!
//! Every session call goes through the plan's [`RetryPolicy`], and the
//! session is reconnected before each retry. When listing a subdirectory
//! still fails after retries the subtree is reported to the sink and
//! skipped; the rest of the walk continues. A child the listing could not
//! describe is stat'ed again and, if that fails too, reported to the sink as
//! a failed entry rather than silently left out. A failure to list the start
//! directory, or any fatal error (authentication, unsupported protocol),
//! aborts the walk.
//!
//! The cancel token is checked before every listing and between every
//! entry.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use super::path_utils::{self, ROOT_PATH};
use super::{DiscoveredEntry, EntryFault, RawEntry, RetryPolicy, Session, WalkError};
use crate::catalog::signature::Signature;
use crate::scheduler::CancelToken;

/// Receives the walker's output.
pub trait EntrySink {
    /// Fatal sink error; aborts the walk.
    type Error;

    /// Called for every discovered entry, files and directories alike.
    ///
    /// `session` is the walker's retrying session, for content signatures.
    fn entry(
        &mut self,
        entry: &DiscoveredEntry,
        session: &mut dyn Session,
    ) -> Result<(), Self::Error>;

    /// Called right before a directory is listed.
    fn directory(&mut self, _path: &str) {}

    /// Called when a subdirectory could not be listed after retries.
    fn subtree_failed(&mut self, _path: &str, _error: &WalkError) {}

    /// Called when a listed child could not be described. Whatever the
    /// catalog holds at `path` was not observed, but it was not seen to
    /// disappear either.
    fn entry_failed(&mut self, _path: &str, _error: &WalkError) {}
}

/// What to walk and how.
#[derive(Debug, Clone)]
pub struct TraversalPlan {
    /// Catalog path to start from (`/` for the whole root)
    pub start: String,
    /// Deepest directory depth that is still listed
    pub max_depth: u32,
    /// Retry policy for every session call
    pub retry: RetryPolicy,
    excludes: Option<Gitignore>,
}

impl TraversalPlan {
    /// Plan a walk of `start` limited to `max_depth`.
    #[must_use]
    pub fn new(start: &str, max_depth: u32) -> Self {
        Self {
            start: path_utils::canonicalize(start),
            max_depth,
            retry: RetryPolicy::default(),
            excludes: None,
        }
    }

    /// Use a specific retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Skip entries matching gitignore-style patterns.
    ///
    /// # Errors
    ///
    /// [`WalkError::InvalidConfiguration`] when a pattern does not compile.
    pub fn with_excludes(mut self, patterns: &[String]) -> Result<Self, WalkError> {
        self.excludes = compile_excludes(patterns)
            .map_err(|e| WalkError::InvalidConfiguration(format!("exclude pattern: {e}")))?;
        Ok(self)
    }

    /// Whether a catalog path is excluded by the plan's patterns.
    #[must_use]
    pub fn is_excluded(&self, path: &str, is_dir: bool) -> bool {
        self.excludes.as_ref().is_some_and(|gi| {
            let relative = path.trim_start_matches('/');
            gi.matched(Path::new(relative), is_dir).is_ignore()
        })
    }
}

/// Compile exclude patterns into a matcher, `None` when there are none.
///
/// # Errors
///
/// Returns the first pattern that fails to parse.
pub fn compile_excludes(patterns: &[String]) -> Result<Option<Gitignore>, ignore::Error> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(ROOT_PATH);
    for pattern in patterns {
        builder.add_line(None, pattern)?;
    }
    Ok(Some(builder.build()?))
}

/// How a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every reachable directory within the depth limit was listed.
    Completed {
        /// Number of directories listed
        directories: u64,
        /// Subdirectories whose listing failed after retries
        failed_subtrees: Vec<String>,
    },
    /// The cancel token fired before the walk finished.
    Cancelled,
}

/// Why a walk aborted.
#[derive(Debug)]
pub enum WalkFailure<E> {
    /// Fatal walker error (or the start directory could not be listed).
    Walk(WalkError),
    /// The sink returned an error.
    Sink(E),
}

/// Session wrapper that applies the retry policy to every call.
struct Retrying<'a> {
    inner: &'a mut dyn Session,
    policy: RetryPolicy,
    cancel: &'a CancelToken,
}

impl Retrying<'_> {
    fn call<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut dyn Session) -> Result<T, WalkError>,
    ) -> Result<T, WalkError> {
        let inner = &mut *self.inner;
        self.policy.run_attempts(self.cancel, what, |attempt| {
            if attempt > 1 {
                log::debug!("Reconnecting before {what}");
                inner.reconnect()?;
            }
            op(&mut *inner)
        })
    }
}

impl Session for Retrying<'_> {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        self.call(&format!("list {path}"), |s| s.list(path))
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        self.call(&format!("stat {path}"), |s| s.stat(path))
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        self.call(&format!("read {path}"), |s| s.signature(path))
    }

    fn reconnect(&mut self) -> Result<(), WalkError> {
        self.inner.reconnect()
    }
}

/// Walk `plan.start` through `session`, feeding `sink`.
///
/// # Errors
///
/// [`WalkFailure::Walk`] for fatal walker errors or when the start
/// directory cannot be listed; [`WalkFailure::Sink`] when the sink fails.
pub fn walk<S: EntrySink>(
    session: &mut dyn Session,
    plan: &TraversalPlan,
    cancel: &CancelToken,
    sink: &mut S,
) -> Result<WalkOutcome, WalkFailure<S::Error>> {
    let mut session = Retrying {
        inner: session,
        policy: plan.retry,
        cancel,
    };

    let start_depth = path_utils::depth(&plan.start);
    let mut stack = vec![(plan.start.clone(), start_depth)];
    let mut directories = 0u64;
    let mut failed_subtrees = Vec::new();

    while let Some((dir, depth)) = stack.pop() {
        if cancel.is_cancelled() {
            return Ok(WalkOutcome::Cancelled);
        }

        sink.directory(&dir);
        let mut children = match session.list(&dir) {
            Ok(children) => children,
            Err(_) if cancel.is_cancelled() => return Ok(WalkOutcome::Cancelled),
            Err(e) if e.is_fatal() || dir == plan.start => return Err(WalkFailure::Walk(e)),
            Err(e) => {
                log::warn!("Skipping subtree {dir}: {e}");
                sink.subtree_failed(&dir, &e);
                failed_subtrees.push(dir);
                continue;
            }
        };
        directories += 1;
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut subdirs = Vec::new();
        for raw in children {
            if cancel.is_cancelled() {
                return Ok(WalkOutcome::Cancelled);
            }
            if raw.name.is_empty() || raw.name == "." || raw.name == ".." {
                continue;
            }

            let path = path_utils::join(&dir, &path_utils::normalize_name(&raw.name));
            let raw = match raw.fault {
                None => raw,
                Some(EntryFault::InvalidName) => {
                    let error = WalkError::InvalidName(path.clone());
                    log::warn!("Skipping {error}");
                    sink.entry_failed(&path, &error);
                    continue;
                }
                Some(EntryFault::Unreadable) => match session.stat(&path) {
                    Ok(stat) => RawEntry {
                        name: raw.name,
                        fault: None,
                        ..stat
                    },
                    Err(_) if cancel.is_cancelled() => return Ok(WalkOutcome::Cancelled),
                    Err(e) if e.is_fatal() => return Err(WalkFailure::Walk(e)),
                    Err(e) => {
                        log::warn!("Cannot stat {path}: {e}");
                        sink.entry_failed(&path, &e);
                        continue;
                    }
                },
            };
            if plan.is_excluded(&path, raw.is_dir) {
                log::trace!("Excluded {path}");
                continue;
            }

            let entry = DiscoveredEntry {
                path,
                size: if raw.is_dir { 0 } else { raw.size },
                modified: raw.modified,
                is_dir: raw.is_dir,
                depth: depth + 1,
            };
            log::trace!("Discovered {}", entry.path);
            sink.entry(&entry, &mut session).map_err(WalkFailure::Sink)?;

            if entry.is_dir && entry.depth <= plan.max_depth {
                subdirs.push(entry.path);
            }
        }

        stack.extend(subdirs.into_iter().rev().map(|p| (p, depth + 1)));
    }

    Ok(WalkOutcome::Completed {
        directories,
        failed_subtrees,
    })
}
