//! SMB adapter built on `pavao` (libsmbclient bindings).
//!
//! The first segment of the root's `path` is the share name; anything after
//! it is a directory prefix inside the share. Credentials, domain
//! (workgroup) and port come from the root definition.

use std::io;

use pavao::{
    SmbClient, SmbCredentials, SmbDirentType, SmbError, SmbOpenOptions, SmbOptions,
};

use super::path_utils::{self, ROOT_PATH};
use super::{unix_seconds, Connector, RawEntry, Session, WalkError};
use crate::catalog::signature::{sign_reader, Signature};
use crate::registry::StorageRoot;

/// Default SMB port.
pub const DEFAULT_PORT: u16 = 445;

/// Connector for SMB shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmbConnector;

/// Split `share/prefix/dirs` into the share name and an in-share prefix.
fn split_share(path: &str) -> Option<(String, String)> {
    let canonical = path_utils::canonicalize(path);
    let mut segments = canonical.trim_start_matches('/').splitn(2, '/');
    let share = segments.next().filter(|s| !s.is_empty())?;
    let prefix = segments.next().map(|p| format!("/{p}")).unwrap_or_default();
    Some((share.to_string(), prefix))
}

impl Connector for SmbConnector {
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError> {
        let (client, prefix) = open_share(root)?;
        Ok(Box::new(SmbSession {
            client,
            prefix,
            root: root.clone(),
        }))
    }
}

/// Open and authenticate a client for the root's share, returning it with
/// the in-share directory prefix.
fn open_share(root: &StorageRoot) -> Result<(SmbClient, String), WalkError> {
    let host = root
        .host
        .as_deref()
        .ok_or_else(|| WalkError::InvalidConfiguration("smb root without host".into()))?;
    let (share, prefix) = root
        .path
        .as_deref()
        .and_then(split_share)
        .ok_or_else(|| WalkError::InvalidConfiguration("smb root without share".into()))?;
    let port = root.port.unwrap_or(DEFAULT_PORT);
    let endpoint = format!("smb://{host}:{port}");

    let mut credentials = SmbCredentials::default()
        .server(&endpoint)
        .share(format!("/{share}"))
        .username(root.username.as_deref().unwrap_or("guest"))
        .password(root.password.as_deref().unwrap_or(""));
    if let Some(domain) = root.domain.as_deref() {
        credentials = credentials.workgroup(domain);
    }

    let client = SmbClient::new(credentials, SmbOptions::default().one_share_per_server(true))
        .map_err(|e| map_error(&endpoint, e))?;

    // libsmbclient authenticates lazily; force it with a listing.
    client
        .list_dir(&remote_path(&prefix, ROOT_PATH))
        .map_err(|e| match e {
            SmbError::Io(io) if io.kind() == io::ErrorKind::PermissionDenied => WalkError::Auth {
                endpoint: endpoint.clone(),
                message: io.to_string(),
            },
            other => map_error(&endpoint, other),
        })?;

    log::debug!("Connected to {endpoint}/{share}");
    Ok((client, prefix))
}

fn remote_path(prefix: &str, path: &str) -> String {
    if path == ROOT_PATH {
        if prefix.is_empty() {
            ROOT_PATH.to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}{path}")
    }
}

/// An open SMB share.
pub struct SmbSession {
    client: SmbClient,
    prefix: String,
    root: StorageRoot,
}

impl SmbSession {
    fn remote(&self, path: &str) -> String {
        remote_path(&self.prefix, path)
    }
}

fn map_error(path: &str, error: SmbError) -> WalkError {
    match error {
        SmbError::Io(io) => WalkError::from_io(path, io),
        other => WalkError::Protocol {
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}

impl Session for SmbSession {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        let remote = self.remote(path);
        let dirents = self
            .client
            .list_dir(&remote)
            .map_err(|e| map_error(path, e))?;

        let base = remote.trim_end_matches('/');
        let mut entries = Vec::with_capacity(dirents.len());
        for dirent in dirents {
            let name = dirent.name().to_string();
            if name == "." || name == ".." {
                continue;
            }
            let is_dir = match dirent.get_type() {
                SmbDirentType::Dir => true,
                SmbDirentType::File => false,
                _ => continue,
            };
            let child = format!("{base}/{name}");
            match self.client.stat(&child) {
                Ok(stat) if is_dir => entries.push(RawEntry::dir(name, unix_seconds(stat.modified))),
                Ok(stat) => entries.push(RawEntry::file(name, stat.size, unix_seconds(stat.modified))),
                Err(e) => {
                    log::debug!("Cannot stat {child}: {e}");
                    entries.push(RawEntry::unreadable(name));
                }
            }
        }
        Ok(entries)
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        let name = path_utils::file_name(path);
        let parent = path_utils::parent(path);
        let is_dir = self
            .client
            .list_dir(&self.remote(parent))
            .map_err(|e| map_error(parent, e))?
            .into_iter()
            .find(|d| d.name() == name)
            .map(|d| matches!(d.get_type(), SmbDirentType::Dir))
            .ok_or_else(|| WalkError::NotFound(path.to_string()))?;
        let stat = self
            .client
            .stat(&self.remote(path))
            .map_err(|e| map_error(path, e))?;
        let modified = unix_seconds(stat.modified);
        Ok(if is_dir {
            RawEntry::dir(name, modified)
        } else {
            RawEntry::file(name, stat.size, modified)
        })
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        let remote = self.remote(path);
        let mut file = self
            .client
            .open_with(&remote, SmbOpenOptions::default().read(true))
            .map_err(|e| map_error(path, e))?;
        sign_reader(&mut file).map_err(|e| WalkError::from_io(path, e))
    }

    fn reconnect(&mut self) -> Result<(), WalkError> {
        let (client, prefix) = open_share(&self.root)?;
        self.client = client;
        self.prefix = prefix;
        Ok(())
    }
}
