//! # Clip Catalog CLI (`clipcat`)
//!
//! The `clipcat` binary walks a directory tree of audio clips and keeps a
//! SQLite catalog of them in sync: one row per clip with the formats present
//! on disk, plus the tags read from its canonical source file.
//!
//! ## Usage
//!
//! ```bash
//! clipcat --config ./config/clipcat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `clipcat init` | Create the SQLite database and schema |
//! | `clipcat scan [ROOT]` | Reconcile the catalog with the clips under `ROOT` |
//! | `clipcat list [PREFIX]` | Show cataloged clips whose key starts with `PREFIX` |
//! | `clipcat stats` | Show clip, format, and tag counts |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! clipcat init
//!
//! # Preview what a scan would change
//! clipcat scan /srv/clips --dry-run
//!
//! # Scan and re-read tags for every clip
//! clipcat scan /srv/clips --rescan-tags
//!
//! # Machine-readable report
//! clipcat scan --json --progress off
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use clip_catalog::progress::ProgressMode;
use clip_catalog::scan::{self, ScanOptions};
use clip_catalog::{config, list, migrate, stats};

/// Clip Catalog CLI: keep a SQLite catalog of an audio clip tree in sync.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/clipcat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "clipcat",
    about = "Clip Catalog — reconcile a directory of audio clips into a SQLite catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/clipcat.toml`.
    #[arg(long, global = true, default_value = "./config/clipcat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the `clips` and `tags` tables, and
    /// the tag search index. Safe to run more than once.
    Init,

    /// Reconcile the catalog with the clips on disk.
    ///
    /// Walks ROOT, groups files into clips by directory and stem, inserts new
    /// clips, updates format flags, deletes clips that are gone, and syncs
    /// tags from each clip's canonical source file.
    Scan {
        /// Clip root directory. Overrides `[scan].root` from the config.
        root: Option<PathBuf>,

        /// Re-extract tags for every clip found, not only new or changed ones.
        #[arg(long)]
        rescan_tags: bool,

        /// Compute and report decisions without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// List cataloged clips.
    List {
        /// Only show clips whose key starts with this prefix.
        prefix: Option<String>,

        /// Print clips as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show catalog statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan {
            root,
            rescan_tags,
            dry_run,
            json,
            progress,
        } => {
            let options = ScanOptions::from_config(&cfg, root, rescan_tags, dry_run)?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let summary = scan::run_scan_command(&cfg, &options, reporter.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                summary.print_human();
            }
        }
        Commands::List { prefix, json } => {
            list::run_list(&cfg, prefix.as_deref(), json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
