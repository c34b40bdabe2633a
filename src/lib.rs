//! catalog-scan - storage scan engine
//!
//! Crawls local, SMB and FTP storage roots into a SQLite file catalog,
//! reconciles every scan against what was cataloged before (soft-deleting
//! vanished entries), and keeps per-directory size and duplicate rollups
//! current as changes commit.
//!
//! The entry point for embedding is [`engine::ScanEngine`]; the bundled
//! binary drives it through [`run_app`].

pub mod aggregate;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod walker;

pub use app::run_app;
