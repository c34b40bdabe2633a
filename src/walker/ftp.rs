//! FTP adapter built on `suppaftp`.
//!
//! Connects in passive binary mode, logs in with the root's credentials
//! (anonymous when none are set) and maps catalog paths under the root's
//! `path` prefix. Directory listings are parsed from `LIST` output, which
//! covers both the Unix `ls -l` and the DOS formats.

use std::io;
use std::time::SystemTime;

use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};

use super::path_utils::{self, ROOT_PATH};
use super::{unix_seconds, Connector, RawEntry, Session, WalkError};
use crate::catalog::signature::{sign_reader, Signature};
use crate::registry::StorageRoot;

/// Default FTP control port.
pub const DEFAULT_PORT: u16 = 21;

/// Connector for FTP roots.
#[derive(Debug, Clone, Default)]
pub struct FtpConnector;

impl Connector for FtpConnector {
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError> {
        let stream = login(root)?;
        Ok(Box::new(FtpSession {
            stream: Some(stream),
            prefix: root.path.clone().unwrap_or_default(),
            root: root.clone(),
        }))
    }
}

/// Open a control connection and log in, in passive binary mode.
fn login(root: &StorageRoot) -> Result<FtpStream, WalkError> {
    let host = root
        .host
        .as_deref()
        .ok_or_else(|| WalkError::InvalidConfiguration("ftp root without host".into()))?;
    let port = root.port.unwrap_or(DEFAULT_PORT);
    let endpoint = format!("{host}:{port}");

    let mut stream = FtpStream::connect((host, port)).map_err(|e| map_error(&endpoint, e))?;
    let user = root.username.as_deref().unwrap_or("anonymous");
    let password = root.password.as_deref().unwrap_or("");
    stream.login(user, password).map_err(|e| match e {
        FtpError::ConnectionError(io) => WalkError::from_io(endpoint.clone(), io),
        other => WalkError::Auth {
            endpoint: endpoint.clone(),
            message: other.to_string(),
        },
    })?;
    stream.set_mode(Mode::Passive);
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| map_error(&endpoint, e))?;

    log::debug!("Logged in to ftp://{endpoint} as {user}");
    Ok(stream)
}

/// An authenticated FTP control connection.
pub struct FtpSession {
    stream: Option<FtpStream>,
    prefix: String,
    root: StorageRoot,
}

impl FtpSession {
    fn remote(&self, path: &str) -> String {
        let prefix = self.prefix.trim_end_matches('/');
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

    fn stream(&mut self, path: &str) -> Result<&mut FtpStream, WalkError> {
        self.stream.as_mut().ok_or_else(|| WalkError::Transient {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::NotConnected, "ftp session closed"),
        })
    }
}

fn map_error(path: &str, error: FtpError) -> WalkError {
    match error {
        FtpError::ConnectionError(io) => WalkError::from_io(path, io),
        FtpError::UnexpectedResponse(response) => match response.status {
            Status::NotLoggedIn => WalkError::Auth {
                endpoint: path.to_string(),
                message: "not logged in".to_string(),
            },
            Status::FileUnavailable => WalkError::NotFound(path.to_string()),
            Status::NotAvailable => {
                WalkError::from_io(
                    path,
                    io::Error::new(io::ErrorKind::ConnectionAborted, "service not available"),
                )
            }
            status => WalkError::Protocol {
                path: path.to_string(),
                message: format!("unexpected response {status:?}"),
            },
        },
        other => WalkError::Protocol {
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}

fn parse_line(line: &str) -> Option<RawEntry> {
    let parsed = match ListEntry::try_from(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::debug!("Unparsable LIST line {line:?}: {e:?}");
            return None;
        }
    };
    if parsed.is_symlink() {
        return None;
    }
    let name = parsed.name().to_string();
    let modified: SystemTime = parsed.modified();
    Some(if parsed.is_directory() {
        RawEntry::dir(name, unix_seconds(modified))
    } else {
        RawEntry::file(name, parsed.size() as u64, unix_seconds(modified))
    })
}

impl Session for FtpSession {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        let remote = self.remote(path);
        let lines = self
            .stream(path)?
            .list(Some(&remote))
            .map_err(|e| map_error(path, e))?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_line(line))
            .filter(|e| e.name != "." && e.name != "..")
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        let name = path_utils::file_name(path).to_string();
        let remote = self.remote(path);
        let stream = self.stream(path)?;
        match stream.size(&remote) {
            Ok(size) => {
                let modified = stream
                    .mdtm(&remote)
                    .map(|t| t.and_utc().timestamp())
                    .unwrap_or(0);
                Ok(RawEntry::file(name, size as u64, modified))
            }
            Err(FtpError::UnexpectedResponse(_)) => {
                // SIZE is refused for directories; confirm by listing.
                stream.list(Some(&remote)).map_err(|e| map_error(path, e))?;
                Ok(RawEntry::dir(name, 0))
            }
            Err(e) => Err(map_error(path, e)),
        }
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        let remote = self.remote(path);
        self.stream(path)?
            .retr(&remote, |reader| {
                sign_reader(reader).map_err(FtpError::ConnectionError)
            })
            .map_err(|e| map_error(path, e))
    }

    fn reconnect(&mut self) -> Result<(), WalkError> {
        // The old control stream is usually dead already; don't wait on QUIT.
        self.stream = None;
        self.stream = Some(login(&self.root)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                log::debug!("FTP quit failed: {e}");
            }
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Protocol, RootSpec};

    fn detached(prefix: &str) -> FtpSession {
        FtpSession {
            stream: None,
            prefix: prefix.to_string(),
            root: RootSpec::new("f", Protocol::Ftp)
                .with_host("127.0.0.1")
                .with_port(1)
                .into_root(1, 10),
        }
    }

    #[test]
    fn test_parse_unix_listing() {
        let file = parse_line("-rw-r--r-- 1 ftp ftp 1024 Jan 10 2020 report.pdf").unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size, 1024);
        assert!(!file.is_dir);

        let dir = parse_line("drwxr-xr-x 2 ftp ftp 4096 Jan 10 2020 photos").unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_line("total 12").is_none());
    }

    #[test]
    fn test_remote_path_mapping() {
        let session = detached("/pub/");
        assert_eq!(session.remote("/"), "/pub");
        assert_eq!(session.remote("/a/b"), "/pub/a/b");

        let bare = detached("");
        assert_eq!(bare.remote("/"), "/");
        assert_eq!(bare.remote("/a"), "/a");
    }

    #[test]
    fn test_closed_session_is_transient() {
        let mut session = detached("");
        let err = session.list("/").unwrap_err();
        assert!(matches!(err, WalkError::Transient { .. }));
    }

    #[test]
    fn test_failed_reconnect_leaves_session_closed() {
        let mut session = detached("");
        let err = session.reconnect().unwrap_err();
        assert_eq!(err.class(), crate::walker::ErrorClass::Retryable);
        assert!(session.stream.is_none());
    }
}
