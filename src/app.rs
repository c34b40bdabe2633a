//! Application runner for the `catalog-scan` binary.
//!
//! Resolves configuration, opens the [`ScanEngine`] and dispatches the
//! parsed [`Cli`] subcommand. Scans run on the engine's worker pool while
//! the main thread polls the job status, drives the progress spinner and
//! watches for Ctrl+C.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Context;

use crate::cli::{Cli, Commands, DupesArgs, PathArgs, RankArgs, RootCommand, ScanArgs};
use crate::config::Config;
use crate::engine::ScanEngine;
use crate::error::ExitCode;
use crate::logging;
use crate::output;
use crate::progress::ScanProgress;
use crate::registry::RootRef;
use crate::scheduler::{JobId, ScanRequest, ScanState, ScanStatus};
use crate::signal::{self, Interrupt};

/// Poll interval of the scan progress loop.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Output options shared by all subcommands.
#[derive(Debug, Clone, Copy)]
struct OutputOptions {
    json: bool,
    quiet: bool,
    accessible: bool,
}

/// Run the application with parsed arguments.
///
/// # Errors
///
/// Configuration, engine or output failures. A scan that ran but failed is
/// not an error; it is reported through the returned [`ExitCode`].
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = resolve_config(&cli)?;
    let opts = OutputOptions {
        json: cli.json,
        quiet: cli.quiet,
        accessible: cli.accessible,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Commands::Config = cli.command {
        out.write_all(config.to_toml()?.as_bytes())?;
        return Ok(ExitCode::Success);
    }

    let engine = ScanEngine::open(config).context("Failed to open the catalog")?;
    let code = match cli.command {
        Commands::Root(command) => run_root(&engine, command, opts, &mut out)?,
        Commands::Scan(args) => run_scan(&engine, &args, opts, &mut out)?,
        Commands::Sizes(args) => run_sizes(&engine, &args, opts, &mut out)?,
        Commands::Dupes(args) => run_dupes(&engine, &args, opts, &mut out)?,
        Commands::Ls(args) => run_ls(&engine, &args, opts, &mut out)?,
        Commands::Stat(args) => run_stat(&engine, &args, opts, &mut out)?,
        Commands::Config => ExitCode::Success,
    };
    engine.shutdown();
    Ok(code)
}

/// Config file and environment, then command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;
    log::debug!("Using catalog at {}", config.database_location());
    Ok(config)
}

fn run_root(
    engine: &ScanEngine,
    command: RootCommand,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let root = match command {
        RootCommand::List => {
            let roots = engine.list_roots()?;
            if opts.json {
                output::write_json(out, &roots)?;
            } else {
                output::write_roots(out, &roots)?;
            }
            return Ok(ExitCode::Success);
        }
        RootCommand::Add(args) => engine.register_root(args.to_spec())?,
        RootCommand::Remove(arg) => {
            let removed = engine.remove_root(&arg.reference())?;
            if opts.json {
                output::write_json(out, &removed)?;
            } else if !opts.quiet {
                writeln!(out, "Removed root '{}' (#{})", removed.name, removed.id)?;
            }
            return Ok(ExitCode::Success);
        }
        RootCommand::Enable(arg) => engine.set_root_enabled(&arg.reference(), true)?,
        RootCommand::Disable(arg) => engine.set_root_enabled(&arg.reference(), false)?,
    };

    if opts.json {
        output::write_json(out, &root)?;
    } else {
        output::write_roots(out, std::slice::from_ref(&root))?;
    }
    Ok(ExitCode::Success)
}

fn run_scan(
    engine: &ScanEngine,
    args: &ScanArgs,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let interrupt = signal::install_handler().unwrap_or_else(|e| {
        log::warn!("{e}; Ctrl+C will not cancel the scan cleanly");
        Interrupt::new()
    });

    let mut request = ScanRequest::new(RootRef::parse(&args.root), args.scan_type);
    if let Some(depth) = args.max_depth {
        request = request.with_max_depth(depth);
    }
    if let Some(path) = &args.path {
        request = request.with_path(path.clone());
    }
    if let Some(secs) = args.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let job = engine.queue_scan(request)?;
    log::debug!("Queued job {job}");

    let progress = ScanProgress::new(opts.quiet || opts.json, opts.accessible);
    let status = poll_until_done(engine, &job, &interrupt, &progress)
        .with_context(|| format!("Scan job {job} disappeared"))?;
    progress.finish(&status);

    if opts.json {
        output::write_json(out, &status)?;
    }

    Ok(exit_code_for(&status, interrupt.is_interrupted()))
}

/// Poll the job until it is terminal, cancelling it on Ctrl+C.
fn poll_until_done(
    engine: &ScanEngine,
    job: &JobId,
    interrupt: &Interrupt,
    progress: &ScanProgress,
) -> Option<ScanStatus> {
    let mut cancelled = false;
    loop {
        let status = engine.wait_for(job, Some(POLL_INTERVAL))?;
        if status.state.is_terminal() {
            return Some(status);
        }
        progress.update(&status);
        if interrupt.is_interrupted() && !cancelled {
            log::info!("Cancelling job {job}");
            // The job may finish on its own between the poll and the cancel.
            let _ = engine.cancel_scan(job);
            cancelled = true;
        }
    }
}

fn exit_code_for(status: &ScanStatus, interrupted: bool) -> ExitCode {
    match status.state {
        ScanState::Cancelled if interrupted => ExitCode::Interrupted,
        ScanState::Failed | ScanState::Cancelled => ExitCode::ScanFailed,
        _ if status.error_count > 0 => ExitCode::PartialSuccess,
        _ => ExitCode::Success,
    }
}

fn run_sizes(
    engine: &ScanEngine,
    args: &RankArgs,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let rows = engine.sorted_by_size(&RootRef::parse(&args.root), args.ascending)?;
    if opts.json {
        output::write_json(out, &rows[..rows.len().min(args.limit)])?;
    } else {
        output::write_rankings(out, &rows, args.limit)?;
    }
    Ok(ExitCode::Success)
}

fn run_dupes(
    engine: &ScanEngine,
    args: &DupesArgs,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let root = RootRef::parse(&args.root);
    if args.by_directory {
        let rows = engine.sorted_by_duplicates(&root, args.ascending)?;
        if opts.json {
            output::write_json(out, &rows[..rows.len().min(args.limit)])?;
        } else {
            output::write_rankings(out, &rows, args.limit)?;
        }
    } else {
        let groups = engine.duplicate_groups(&root)?;
        if opts.json {
            output::write_json(out, &groups[..groups.len().min(args.limit)])?;
        } else {
            output::write_groups(out, &groups, args.limit)?;
        }
    }
    Ok(ExitCode::Success)
}

fn run_ls(
    engine: &ScanEngine,
    args: &PathArgs,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let records = engine.list_directory(&RootRef::parse(&args.root), &args.path)?;
    if opts.json {
        output::write_json(out, &records)?;
    } else {
        output::write_listing(out, &records)?;
    }
    Ok(ExitCode::Success)
}

fn run_stat(
    engine: &ScanEngine,
    args: &PathArgs,
    opts: OutputOptions,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let root = RootRef::parse(&args.root);
    let Some(record) = engine.lookup_path(&root, &args.path)? else {
        anyhow::bail!("'{}' is not in the catalog of {root}", args.path);
    };
    if opts.json {
        output::write_json(out, &record)?;
    } else {
        output::write_record(out, &record)?;
    }
    Ok(ExitCode::Success)
}
