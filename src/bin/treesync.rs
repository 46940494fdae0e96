//! # Treesync CLI - Mirror a directory tree
//!
//! Command-line front end for the treesync library.
//!
//! ## Features
//! - Copy new and changed files and directories from SOURCE to DESTINATION
//! - Preserve permission bits and modification times
//! - Optional content fingerprints on top of size and mtime comparison
//! - Parallel tree building with a pool of worker threads
//!
//! ## Usage
//! ```bash
//! # Synchronize with default settings
//! treesync ./photos /mnt/backup/photos
//!
//! # Only compare size and modification time
//! treesync -d ./photos /mnt/backup/photos
//!
//! # Show what would change without writing
//! treesync -r ./photos /mnt/backup/photos
//!
//! # Serial mode with full listings
//! treesync -p -v ./photos /mnt/backup/photos
//! ```

use clap::Parser;
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use treesync::utils::format_bytes;
use treesync::{ChangeKind, FileTree, Result, SyncEngineBuilder, SyncError, SyncReport};

/// Treesync CLI - One-way directory synchronization
#[derive(Parser)]
#[command(name = "treesync")]
#[command(author, version)]
#[command(about = "Make DESTINATION match SOURCE: copy new and changed files, keep modes and times")]
#[command(long_about = None)]
struct Cli {
    /// Directory to copy from
    source: PathBuf,

    /// Directory to copy into (created if missing)
    destination: PathBuf,

    /// Compare only size and modification time, skip content hashing
    #[arg(short = 'd', long = "date-size-only")]
    date_size_only: bool,

    /// Total number of worker threads in parallel mode
    #[arg(short = 'n', long = "processes", value_name = "N")]
    processes: Option<usize>,

    /// Build trees on a single thread
    #[arg(short = 'p', long = "no-parallel")]
    no_parallel: bool,

    /// Log tree and diff listings along with debug output
    #[arg(short, long)]
    verbose: bool,

    /// Show what would be copied without writing anything
    #[arg(short = 'r', long = "dry-run")]
    dry_run: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG overrides the default filter
    let default_filter = if cli.verbose { "treesync=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut builder = SyncEngineBuilder::new()
        .content_hash(!cli.date_size_only)
        .parallel(!cli.no_parallel)
        .dry_run(cli.dry_run)
        .verbose(cli.verbose);
    if let Some(processes) = cli.processes {
        builder = builder.worker_count(processes);
    }
    let engine = builder.build(&cli.source, &cli.destination)?;

    let start = Instant::now();
    let progress = if cli.json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!(
            "Synchronizing {} -> {}",
            cli.source.display(),
            cli.destination.display()
        ));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let result = engine.run();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = result?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| SyncError::internal(format!("cannot serialize report: {}", e)))?;
        println!("{}", json);
    } else {
        // Verbose runs get the same listings from the engine's log output
        if cli.dry_run {
            print_listings(&report);
        }
        print_summary(&report, start.elapsed(), cli.dry_run);
    }

    report.into_result().map(|_| ())
}

fn print_tree(title: &str, tree: &FileTree) {
    print!("{} {}", title.bold(), tree);
}

fn print_listings(report: &SyncReport) {
    print_tree("Source", &report.source_tree);
    println!();
    print_tree("Destination", &report.destination_tree);
    println!();

    println!("{} ({} entries)", "Differences".bold(), report.diff.len());
    for item in &report.diff {
        match item.change {
            ChangeKind::Added => println!("  {} {}", "+".green(), item.entry.to_string().green()),
            ChangeKind::Changed => println!("  {} {}", "~".yellow(), item.entry.to_string().yellow()),
        }
    }
    println!();
}

fn print_summary(report: &SyncReport, elapsed: Duration, dry_run: bool) {
    let stats = report.diff.stats();
    let apply = &report.apply;
    // Whole milliseconds keep the duration readable
    let elapsed = Duration::from_millis(elapsed.as_millis() as u64);

    if !stats.has_changes() {
        println!(
            "{} Already in sync ({} entries checked in {})",
            "✓".green().bold(),
            report.source_entries,
            format_duration(elapsed)
        );
        return;
    }

    let heading = if dry_run { "Dry run" } else { "Synchronized" };
    println!("{} {} in {}", "✓".green().bold(), heading, format_duration(elapsed));
    println!("  Added: {}", stats.added.to_string().green());
    println!("  Changed: {}", stats.changed.to_string().yellow());
    println!(
        "  Directories {}: {}",
        if dry_run { "to create" } else { "created" },
        apply.directories_created
    );
    println!(
        "  Files {}: {} ({})",
        if dry_run { "to copy" } else { "copied" },
        apply.files_copied,
        format_bytes(apply.bytes_copied)
    );

    if let Some(shutdown) = &report.shutdown {
        println!("  Workers: {} (acknowledged {})", shutdown.workers, shutdown.acknowledged);
    }

    for warning in &apply.warnings {
        println!("  {} {}", "!".yellow().bold(), warning);
    }

    if !apply.failures.is_empty() {
        println!("\n{}", "Failures:".red().bold());
        for failure in &apply.failures {
            println!("  {} {}", "✗".red(), failure);
        }
    }
}
