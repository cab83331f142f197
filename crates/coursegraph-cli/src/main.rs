//! Coursegraph CLI
//!
//! Command-line access to the prerequisite pipeline:
//! - `parse`: resolve one piece of prose into CNF groups
//! - `verify`: check calendar prose against a store, optionally applying changes
//! - `prereqs` / `tree`: read stored relationships back out

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use coursegraph_ingest_calendar::DEFAULT_CALENDAR_YEAR;
use coursegraph_storage::graph::{DEFAULT_FUTURE_DEPTH, DEFAULT_PREREQ_DEPTH};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod graph;
mod parse;
mod verify;

#[derive(Parser)]
#[command(name = "coursegraph")]
#[command(author, version, about = "Coursegraph: course prerequisites as CNF")]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse prerequisite prose and print the resolution as JSON.
    Parse {
        /// Prerequisite prose, e.g. "CS 245 or CS 240; MATH 239 or MATH 249"
        text: String,
        /// Known course codes for the model whitelist (default: codes in TEXT)
        #[arg(long, value_delimiter = ',')]
        known: Vec<String>,
        /// Never call a model
        #[arg(long)]
        heuristic_only: bool,
        /// Confidence needed to mark the resolution accepted
        #[arg(long, default_value_t = 0.75)]
        threshold: f64,
    },

    /// Verify calendar prerequisites against a store.
    #[command(group(ArgGroup::new("source").required(true).args(["html", "dept"])))]
    Verify {
        /// Store file (created if missing)
        #[arg(long)]
        store: PathBuf,
        /// Saved calendar page to read instead of downloading
        #[arg(long)]
        html: Option<PathBuf>,
        /// Department(s) to download, e.g. `--dept CS --dept MATH`
        #[arg(long)]
        dept: Vec<String>,
        /// Calendar year path segment
        #[arg(long, default_value = DEFAULT_CALENDAR_YEAR)]
        year: String,
        /// Write changes (default is a dry run)
        #[arg(long)]
        apply: bool,
        /// Minimum confidence for a write
        #[arg(long)]
        threshold: Option<f64>,
        /// Only verify this course
        #[arg(long)]
        only_course: Option<String>,
        /// Append decision records (NDJSON) to this file
        #[arg(long)]
        log: Option<PathBuf>,
        /// Courses processed at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Heuristic parsing only
        #[arg(long)]
        no_llm: bool,
        /// JSON verify config; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show a course's stored prerequisite groups.
    Prereqs {
        #[arg(long)]
        store: PathBuf,
        course: String,
    },

    /// Show prerequisite and dependent trees for a course.
    Tree {
        #[arg(long)]
        store: PathBuf,
        course: String,
        #[arg(long, default_value_t = DEFAULT_PREREQ_DEPTH)]
        prereq_depth: u32,
        #[arg(long, default_value_t = DEFAULT_FUTURE_DEPTH)]
        future_depth: u32,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Parse {
            text,
            known,
            heuristic_only,
            threshold,
        } => parse::cmd_parse(&text, &known, heuristic_only, threshold).await,
        Commands::Verify {
            store,
            html,
            dept,
            year,
            apply,
            threshold,
            only_course,
            log,
            concurrency,
            no_llm,
            config,
        } => {
            let args = verify::VerifyArgs {
                store,
                html,
                departments: dept,
                year,
                apply,
                threshold,
                only_course,
                log,
                concurrency,
                no_llm,
                config,
            };
            verify::cmd_verify(args).await
        }
        Commands::Prereqs { store, course } => graph::cmd_prereqs(&store, &course),
        Commands::Tree {
            store,
            course,
            prereq_depth,
            future_depth,
        } => graph::cmd_tree(&store, &course, prereq_depth, future_depth),
    }
}
