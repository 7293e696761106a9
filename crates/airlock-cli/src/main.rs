mod cmd;
mod output;
mod root;

use airlock_core::freshness::VerificationMethod;
use airlock_core::types::QueueStatus;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, crawl::CrawlSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "airlock",
    about = "Crawl scheduling and tolerance-gated promotion for scraped draw regulations",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .airlock/)
    #[arg(long, global = true, env = "AIRLOCK_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log pipeline activity at info level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    /// Act as of this instant (RFC 3339) instead of the current time
    #[arg(long, global = true, env = "AIRLOCK_NOW")]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .airlock/ with a default config and reference directory
    Init,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Stage a scraped batch of rows
    Ingest {
        #[arg(long)]
        state: String,
        #[arg(long)]
        batch: String,
        #[arg(long)]
        source_url: String,
        /// JSON array of rows
        #[arg(long)]
        rows: PathBuf,
    },

    /// Evaluate a staged batch against the live baseline
    Evaluate {
        #[arg(long)]
        state: String,
        #[arg(long)]
        batch: String,
    },

    /// Approve a quarantined batch and merge it into production
    Promote {
        batch: String,
        /// Reviewer recorded in the audit trail
        #[arg(long, default_value = "operator")]
        by: String,
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject a quarantined batch
    Reject {
        batch: String,
        #[arg(long, default_value = "operator")]
        by: String,
        #[arg(long)]
        note: Option<String>,
    },

    /// Evaluate every staged batch that has no queue record
    Reconcile,

    /// List evaluated batches
    Queue {
        /// auto_approved, quarantined, approved, or rejected
        #[arg(long)]
        status: Option<QueueStatus>,
    },

    /// Show the audit trail of a batch
    Audit { batch: String },

    /// Compare two batches of the same state
    Diff { older: String, newer: String },

    /// Compute the crawl schedule from deadline contexts
    Schedule {
        /// YAML list of per-state deadline contexts
        #[arg(long)]
        contexts: PathBuf,
    },

    /// Report crawl results for a state
    Crawl {
        #[command(subcommand)]
        subcommand: CrawlSubcommand,
    },

    /// Freshness label for one verified data point
    Freshness {
        #[arg(long)]
        state: String,
        #[arg(long)]
        field: String,
        #[arg(long)]
        verified_at: DateTime<Utc>,
        #[arg(long, default_value = "")]
        source_url: String,
        /// scraper, manual, or official_api
        #[arg(long, default_value = "scraper")]
        method: VerificationMethod,
    },

    /// Compile and save the weekly health digest
    Digest,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let now = cli.now.unwrap_or_else(Utc::now);
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
        Commands::Ingest {
            state,
            batch,
            source_url,
            rows,
        } => cmd::ingest::run(&root, &state, &batch, &source_url, &rows, now, json),
        Commands::Evaluate { state, batch } => cmd::evaluate::run(&root, &state, &batch, now, json),
        Commands::Promote { batch, by, note } => {
            cmd::resolve::promote(&root, &batch, &by, note.as_deref(), now, json)
        }
        Commands::Reject { batch, by, note } => {
            cmd::resolve::reject(&root, &batch, &by, note.as_deref(), now, json)
        }
        Commands::Reconcile => cmd::reconcile::run(&root, now, json),
        Commands::Queue { status } => cmd::queue::list(&root, status, json),
        Commands::Audit { batch } => cmd::queue::audit(&root, &batch, json),
        Commands::Diff { older, newer } => cmd::diff::run(&root, &older, &newer, now, json),
        Commands::Schedule { contexts } => cmd::schedule::run(&root, &contexts, now, json),
        Commands::Crawl { subcommand } => cmd::crawl::run(&root, subcommand, now, json),
        Commands::Freshness {
            state,
            field,
            verified_at,
            source_url,
            method,
        } => cmd::freshness::run(&state, &field, verified_at, &source_url, method, now, json),
        Commands::Digest => cmd::digest::run(&root, now, json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
