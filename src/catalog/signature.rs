//! BLAKE3 content signatures with streaming support.
//!
//! Signatures are the equivalence class used for duplicate grouping: two
//! files are duplicates exactly when their signatures are equal. They are
//! computed by streaming the file through BLAKE3 in fixed-size chunks, so
//! memory use does not depend on file size and remote reads never have to
//! buffer a whole file.

use std::fmt;
use std::io::{self, Read};

use serde::{Deserialize, Serialize};

/// Read buffer size for streaming hashing (64 KiB).
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Hex-encoded BLAKE3 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wrap an already hex-encoded digest (e.g. one loaded from the catalog).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Signature of an in-memory byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// The hex-encoded digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute a signature by streaming a reader to the end.
///
/// # Errors
///
/// Returns the underlying I/O error if a read fails. `Interrupted` reads are
/// retried transparently.
///
/// # Example
///
/// ```
/// use catalog_scan::catalog::signature::{sign_reader, Signature};
///
/// let sig = sign_reader(&mut &b"hello"[..]).unwrap();
/// assert_eq!(sig, Signature::of_bytes(b"hello"));
/// ```
pub fn sign_reader(reader: &mut dyn Read) -> io::Result<Signature> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(Signature(hasher.finalize().to_hex().to_string()))
}
