//! Storage root definitions and their validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RegistryError;
use crate::walker::traverse::compile_excludes;

/// Identifier of a registered storage root.
pub type RootId = i64;

/// Protocol used to reach a storage root.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Directory on a locally mounted volume
    Local,
    /// SMB/CIFS share
    Smb,
    /// FTP server
    Ftp,
    /// NFS export, walked through its local mount point
    Nfs,
    /// WebDAV server
    Webdav,
}

impl Protocol {
    /// All protocols, in declaration order.
    pub const ALL: [Protocol; 5] = [
        Protocol::Local,
        Protocol::Smb,
        Protocol::Ftp,
        Protocol::Nfs,
        Protocol::Webdav,
    ];

    /// Lowercase tag used in the catalog and on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Smb => "smb",
            Self::Ftp => "ftp",
            Self::Nfs => "nfs",
            Self::Webdav => "webdav",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| {
                RegistryError::InvalidConfiguration(format!("unsupported protocol '{s}'"))
            })
    }
}

/// Reference to a root by numeric ID or by unique name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootRef {
    /// Numeric ID
    Id(RootId),
    /// Unique name
    Name(String),
}

impl fmt::Display for RootRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<RootId> for RootRef {
    fn from(id: RootId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RootRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RootRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl RootRef {
    /// Parse command-line input: all digits is an ID, anything else a name.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.parse::<RootId>() {
            Ok(id) if !input.starts_with('+') => Self::Id(id),
            _ => Self::Name(input.to_string()),
        }
    }
}

/// Registration input for a storage root.
///
/// `max_depth = 0` asks for the configured default depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    /// Unique name; re-registering a name overwrites that root
    pub name: String,
    /// Access protocol
    pub protocol: Protocol,
    /// Server host name or address
    #[serde(default)]
    pub host: Option<String>,
    /// Server port (protocol default when absent)
    #[serde(default)]
    pub port: Option<u16>,
    /// Path prefix: local directory, SMB `share/dir`, FTP directory, NFS export
    #[serde(default)]
    pub path: Option<String>,
    /// Login user
    #[serde(default)]
    pub username: Option<String>,
    /// Login password
    #[serde(default)]
    pub password: Option<String>,
    /// SMB domain / workgroup
    #[serde(default)]
    pub domain: Option<String>,
    /// Local mount point of an NFS export
    #[serde(default)]
    pub mount_point: Option<String>,
    /// WebDAV base URL
    #[serde(default)]
    pub url: Option<String>,
    /// Gitignore-style patterns excluded from scans
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Disabled roots are kept but refuse new scans
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Crawl depth limit; 0 selects the configured default
    #[serde(default)]
    pub max_depth: u32,
}

fn default_enabled() -> bool {
    true
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl RootSpec {
    /// A spec with only a name and protocol set.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            protocol,
            host: None,
            port: None,
            path: None,
            username: None,
            password: None,
            domain: None,
            mount_point: None,
            url: None,
            exclude_patterns: Vec::new(),
            enabled: true,
            max_depth: 0,
        }
    }

    /// Set the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the path prefix.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set login credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the SMB domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the NFS mount point.
    #[must_use]
    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    /// Set the WebDAV URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the depth limit (0 for the configured default).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Add exclude patterns.
    #[must_use]
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Enable or disable the root.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check that the fields the protocol needs are present.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidConfiguration`] naming the first problem.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |msg: String| Err(RegistryError::InvalidConfiguration(msg));

        if self.name.trim().is_empty() {
            return invalid("root name must not be empty".into());
        }
        if self.port == Some(0) {
            return invalid(format!("root '{}': port must not be 0", self.name));
        }

        let required: Vec<(&str, &Option<String>)> = match self.protocol {
            Protocol::Local => vec![("path", &self.path)],
            Protocol::Smb | Protocol::Ftp => vec![("host", &self.host), ("path", &self.path)],
            Protocol::Nfs => vec![
                ("host", &self.host),
                ("path", &self.path),
                ("mount_point", &self.mount_point),
            ],
            Protocol::Webdav => vec![("url", &self.url)],
        };
        if let Some((field, _)) = required.iter().find(|(_, value)| !present(value)) {
            return invalid(format!(
                "root '{}': {} roots require {field}",
                self.name, self.protocol
            ));
        }

        if let Err(e) = compile_excludes(&self.exclude_patterns) {
            return invalid(format!("root '{}': bad exclude pattern: {e}", self.name));
        }
        Ok(())
    }

    /// Materialize a root with the given ID, resolving a zero depth.
    #[must_use]
    pub fn into_root(self, id: RootId, default_max_depth: u32) -> StorageRoot {
        let now = Utc::now();
        StorageRoot {
            id,
            name: self.name.trim().to_string(),
            protocol: self.protocol,
            host: self.host,
            port: self.port,
            path: self.path,
            username: self.username,
            password: self.password,
            domain: self.domain,
            mount_point: self.mount_point,
            url: self.url,
            exclude_patterns: self.exclude_patterns,
            enabled: self.enabled,
            max_depth: if self.max_depth == 0 {
                default_max_depth
            } else {
                self.max_depth
            },
            created_at: now,
            updated_at: now,
            last_scan_at: None,
        }
    }
}

/// A registered storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRoot {
    /// Numeric ID
    pub id: RootId,
    /// Unique name
    pub name: String,
    /// Access protocol
    pub protocol: Protocol,
    /// Server host
    pub host: Option<String>,
    /// Server port
    pub port: Option<u16>,
    /// Path prefix
    pub path: Option<String>,
    /// Login user
    pub username: Option<String>,
    /// Login password, never serialized
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// SMB domain
    pub domain: Option<String>,
    /// NFS mount point
    pub mount_point: Option<String>,
    /// WebDAV URL
    pub url: Option<String>,
    /// Exclude patterns
    pub exclude_patterns: Vec<String>,
    /// Whether new scans are accepted
    pub enabled: bool,
    /// Effective crawl depth limit
    pub max_depth: u32,
    /// First registration
    pub created_at: DateTime<Utc>,
    /// Last re-registration
    pub updated_at: DateTime<Utc>,
    /// Completion time of the last successful scan
    pub last_scan_at: Option<DateTime<Utc>>,
}

impl StorageRoot {
    /// Human-readable location, without credentials.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let host = self.host.as_deref().unwrap_or("");
        let path = self.path.as_deref().unwrap_or("");
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        match self.protocol {
            Protocol::Local => path.to_string(),
            Protocol::Webdav => self.url.clone().unwrap_or_default(),
            Protocol::Nfs => format!("{host}:{path}"),
            Protocol::Smb | Protocol::Ftp => {
                format!("{}://{host}{port}/{}", self.protocol, path.trim_start_matches('/'))
            }
        }
    }
}
