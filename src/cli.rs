//! Command-line interface definitions for catalog-scan.
//!
//! # Example
//!
//! ```bash
//! # Register an SMB share and scan it
//! catalog-scan root add "Test Share" --protocol smb --host nas --path /share --user scan
//! catalog-scan scan "Test Share" --type full
//!
//! # Largest directories, as JSON
//! catalog-scan --json sizes "Test Share" --limit 20
//!
//! # Directories holding the most duplicates
//! catalog-scan dupes "Test Share" --by-directory
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::registry::{Protocol, RootRef, RootSpec};
use crate::scheduler::ScanType;

/// Crawl SMB, FTP and local storage into a reconciled file catalog.
#[derive(Debug, Parser)]
#[command(name = "catalog-scan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Config file (default: config.toml in the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Catalog database file, or :memory:
    #[arg(long, value_name = "FILE", global = true)]
    pub database: Option<String>,

    /// Number of scan worker threads
    #[arg(long, value_name = "N", global = true)]
    pub workers: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Plain-text progress without animation
    #[arg(long, global = true)]
    pub accessible: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage storage roots
    #[command(subcommand)]
    Root(RootCommand),
    /// Scan a storage root and wait for the job to finish
    Scan(ScanArgs),
    /// Directories ranked by recursive size
    Sizes(RankArgs),
    /// Duplicate groups, or directories ranked by duplicate count
    Dupes(DupesArgs),
    /// List the live entries of a catalog directory
    Ls(PathArgs),
    /// Show the catalog record of a path, including deleted ones
    Stat(PathArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// `root` subcommands.
#[derive(Debug, Subcommand)]
pub enum RootCommand {
    /// Register a root, or overwrite the one with the same name
    Add(RootAddArgs),
    /// List registered roots
    List,
    /// Remove a root and its catalog records
    Remove(RootArg),
    /// Allow scans of a root
    Enable(RootArg),
    /// Reject scans of a root
    Disable(RootArg),
}

/// A root given by ID or name.
#[derive(Debug, Args)]
pub struct RootArg {
    /// Root ID or name
    #[arg(value_name = "ROOT")]
    pub root: String,
}

impl RootArg {
    /// Parsed reference.
    #[must_use]
    pub fn reference(&self) -> RootRef {
        RootRef::parse(&self.root)
    }
}

/// Arguments for `root add`.
#[derive(Debug, Args)]
pub struct RootAddArgs {
    /// Unique root name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Storage protocol
    #[arg(short, long, value_enum)]
    pub protocol: Protocol,

    /// Server host name or address
    #[arg(long)]
    pub host: Option<String>,

    /// Server port (protocol default when omitted)
    #[arg(long)]
    pub port: Option<u16>,

    /// Path prefix on the server (share/path for SMB, directory for local)
    #[arg(long)]
    pub path: Option<String>,

    /// Login user
    #[arg(long)]
    pub user: Option<String>,

    /// Login password
    #[arg(long, env = "CATALOG_SCAN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SMB workgroup or domain
    #[arg(long)]
    pub domain: Option<String>,

    /// Local mount point of an NFS export
    #[arg(long)]
    pub mount_point: Option<String>,

    /// WebDAV URL
    #[arg(long)]
    pub url: Option<String>,

    /// Crawl depth limit (0 uses the configured default)
    #[arg(long, default_value_t = 0)]
    pub max_depth: u32,

    /// Gitignore-style exclude pattern (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Register the root disabled
    #[arg(long)]
    pub disabled: bool,
}

impl RootAddArgs {
    /// Registration input for the engine.
    #[must_use]
    pub fn to_spec(&self) -> RootSpec {
        let mut spec = RootSpec::new(&self.name, self.protocol)
            .with_max_depth(self.max_depth)
            .with_excludes(self.excludes.iter().cloned())
            .with_enabled(!self.disabled);
        spec.host = self.host.clone();
        spec.port = self.port;
        spec.path = self.path.clone();
        spec.username = self.user.clone();
        spec.password = self.password.clone();
        spec.domain = self.domain.clone();
        spec.mount_point = self.mount_point.clone();
        spec.url = self.url.clone();
        spec
    }
}

/// Arguments for `scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Root ID or name
    #[arg(value_name = "ROOT")]
    pub root: String,

    /// full re-signs every file; incremental trusts unchanged size and mtime
    #[arg(short = 't', long = "type", value_enum, default_value_t = ScanType::Incremental)]
    pub scan_type: ScanType,

    /// Override the root's depth limit
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Only scan beneath this catalog path
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Cancel the job after this many seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

/// Arguments for `sizes`.
#[derive(Debug, Args)]
pub struct RankArgs {
    /// Root ID or name
    #[arg(value_name = "ROOT")]
    pub root: String,

    /// Smallest first
    #[arg(long)]
    pub ascending: bool,

    /// Show at most this many rows
    #[arg(short = 'n', long, default_value_t = 25)]
    pub limit: usize,
}

/// Arguments for `dupes`.
#[derive(Debug, Args)]
pub struct DupesArgs {
    /// Root ID or name
    #[arg(value_name = "ROOT")]
    pub root: String,

    /// Rank directories by duplicate count instead of listing groups
    #[arg(long)]
    pub by_directory: bool,

    /// Fewest first (with --by-directory)
    #[arg(long, requires = "by_directory")]
    pub ascending: bool,

    /// Show at most this many rows
    #[arg(short = 'n', long, default_value_t = 25)]
    pub limit: usize,
}

/// Arguments for `ls` and `stat`.
#[derive(Debug, Args)]
pub struct PathArgs {
    /// Root ID or name
    #[arg(value_name = "ROOT")]
    pub root: String,

    /// Catalog path
    #[arg(value_name = "PATH", default_value = "/")]
    pub path: String,
}
