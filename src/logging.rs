//! Logging setup for the `catalog-scan` binary.
//!
//! `log` facade with the `env_logger` backend. The level comes from, in
//! order: `RUST_LOG`, `--quiet` (errors only), `-v` (debug) / `-vv` (trace),
//! and otherwise info.
//!
//! Scans run on named worker threads (`scan-worker-N`), so every line
//! carries the thread name when it was logged off the main thread. Debug
//! builds also print a timestamp and the module path.

use std::env;
use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Protocol client crates that are chatty at debug level.
const NOISY_DEPENDENCIES: &[&str] = &["suppaftp", "pavao", "ureq", "rustls"];

/// Initialize logging from the CLI verbosity flags.
///
/// Returns false if a logger was already installed (tests, embedding
/// applications); the existing logger is left alone.
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let from_env = env::var("RUST_LOG").is_ok();
    let mut builder = Builder::new();

    let level = determine_level(verbose, quiet);
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(level);
        if level < LevelFilter::Trace {
            for dependency in NOISY_DEPENDENCIES {
                builder.filter_module(dependency, LevelFilter::Warn);
            }
        }
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return false;
    }
    if from_env {
        log::debug!("Logging configured from RUST_LOG");
    } else {
        log::debug!("Logging initialized at level: {level:?}");
    }
    true
}

/// Level for the given flags; quiet wins over verbose.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// `[scan-worker-2] ` for worker threads, empty for main.
fn thread_tag() -> String {
    match std::thread::current().name() {
        Some("main") | None => String::new(),
        Some(name) => format!("[{name}] "),
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            let module = if verbose >= 1 {
                format!(" [{}]", record.module_path().unwrap_or("unknown"))
            } else {
                String::new()
            };
            writeln!(
                buf,
                "{} {style}{level:<5}{style:#}{module} {}{}",
                buf.timestamp_seconds(),
                thread_tag(),
                record.args()
            )
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(
                buf,
                "{style}{level:<5}{style:#} {}{}",
                thread_tag(),
                record.args()
            )
        });
    }
}
