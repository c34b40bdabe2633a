//! Catalog path utilities.
//!
//! Every record in the catalog is addressed by a root-relative path using
//! forward slashes and a leading `/`, regardless of which protocol produced
//! it. The storage root itself is `/`.
//!
//! Names coming back from remote servers are normalized to Unicode NFC
//! before they are joined into a catalog path. macOS-hosted SMB shares in
//! particular report NFD names, which would otherwise show up as two
//! different paths for the same file across scans.
//!
//! # Example
//!
//! ```
//! use catalog_scan::walker::path_utils::{ancestors, join, normalize_name};
//!
//! let dir = join("/", "photos");
//! let file = join(&dir, &normalize_name("cafe\u{0301}.jpg"));
//! assert_eq!(file, "/photos/café.jpg");
//! assert_eq!(ancestors(&file).collect::<Vec<_>>(), vec!["/photos", "/"]);
//! ```

use std::borrow::Cow;
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Catalog path of a storage root's top directory.
pub const ROOT_PATH: &str = "/";

/// Normalize an entry name to NFC form.
///
/// Returns the input unchanged (borrowed) when it is already NFC.
#[must_use]
pub fn normalize_name(name: &str) -> Cow<'_, str> {
    if is_nfc(name) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(name.nfc().collect())
    }
}

/// Canonicalize a user-supplied path into catalog form.
///
/// Backslashes become forward slashes, empty and `.` segments are dropped,
/// and the result always starts with `/`. `..` segments pop the previous
/// segment but never climb above the root.
///
/// # Example
///
/// ```
/// use catalog_scan::walker::path_utils::canonicalize;
///
/// assert_eq!(canonicalize(""), "/");
/// assert_eq!(canonicalize("music\\2024/"), "/music/2024");
/// assert_eq!(canonicalize("/a/./b/../c"), "/a/c");
/// assert_eq!(canonicalize("../../etc"), "/etc");
/// ```
#[must_use]
pub fn canonicalize(path: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(normalize_name(other).into_owned()),
        }
    }

    if segments.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Join a child name onto a catalog directory path.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent directory of a catalog path. The root is its own parent.
#[must_use]
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(idx) => &path[..idx],
    }
}

/// Final segment of a catalog path (empty for the root).
#[must_use]
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Number of segments below the root (`/` is 0, `/a` is 1, `/a/b` is 2).
#[must_use]
pub fn depth(path: &str) -> u32 {
    if path == ROOT_PATH {
        0
    } else {
        path.matches('/').count() as u32
    }
}

/// Iterate over the proper ancestors of a path, nearest first, ending at `/`.
///
/// The root has no ancestors.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = path;
    std::iter::from_fn(move || {
        if current == ROOT_PATH {
            return None;
        }
        current = parent(current);
        Some(current)
    })
}

/// The path itself followed by all of its ancestors.
pub fn self_and_ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::once(path).chain(ancestors(path))
}

/// Whether `path` equals `scope` or lies beneath it.
#[must_use]
pub fn is_within(path: &str, scope: &str) -> bool {
    if scope == ROOT_PATH {
        return true;
    }
    path == scope
        || (path.starts_with(scope) && path.as_bytes().get(scope.len()) == Some(&b'/'))
}
