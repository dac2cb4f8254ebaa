//! RevDB CLI
//!
//! Command-line tools for RevDB repositories.
//!
//! # Commands
//!
//! - `inspect` - Display repository statistics
//! - `branches` - List the branch tree
//! - `history` - List the commits that touched an entity
//! - `compare` - Summarize how one branch differs from another
//! - `merge` / `rebase` - Bring changes between branches
//! - `purge` - Compact branch history
//! - `optimize` - Flush and rewrite the document store
//! - `reindex` - Re-save documents written since a timestamp
//! - `repos` - List repositories under a directory
//! - `dump-wal` - Dump write-ahead log records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RevDB command-line repository tools.
#[derive(Parser)]
#[command(name = "revdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the repository directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display repository statistics
    Inspect,

    /// List the branch tree
    Branches {
        /// Include deleted branches
        #[arg(short, long)]
        all: bool,
    },

    /// List the commits that touched an entity, newest first
    History {
        /// Entity id
        entity: String,

        /// Branch to read
        #[arg(short, long, default_value = "MAIN")]
        branch: String,
    },

    /// Summarize how COMPARE differs from BASE
    Compare {
        /// Base branch
        base: String,

        /// Branch to compare
        compare: String,

        /// Maximum ids listed per type and category
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Merge SOURCE into TARGET
    Merge {
        /// Branch whose changes are brought over
        source: String,

        /// Branch receiving the changes
        target: String,

        /// Copy the changes as a single commit instead of joining history
        #[arg(short, long)]
        squash: bool,

        /// Commit author
        #[arg(short, long, default_value = "revdb")]
        author: String,

        /// Commit comment
        #[arg(short, long, default_value = "")]
        comment: String,
    },

    /// Rebase a branch onto the head of its parent
    Rebase {
        /// Branch to rebase
        branch: String,

        /// Parent to rebase onto (defaults to the branch's parent)
        #[arg(long)]
        onto: Option<String>,

        /// Commit author
        #[arg(short, long, default_value = "revdb")]
        author: String,

        /// Commit comment
        #[arg(short, long, default_value = "")]
        comment: String,
    },

    /// Compact the history of a branch
    Purge {
        /// Branch to purge
        branch: String,

        /// Strategy (all, latest, history)
        #[arg(short, long, default_value = "latest")]
        strategy: String,
    },

    /// Flush and rewrite the document store
    Optimize,

    /// Re-save every document written since a point in time
    Reindex {
        /// Milliseconds since the epoch, or an RFC 3339 date
        #[arg(long)]
        from: String,
    },

    /// List repositories under the given path
    Repos,

    /// Dump WAL records for debugging
    DumpWal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("RevDB CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Repository path required (--path)")?;
    let format = cli.format.as_str();
    match cli.command {
        Commands::Inspect => commands::inspect::run(&path, format)?,
        Commands::Branches { all } => commands::branches::run(&path, all, format)?,
        Commands::History { entity, branch } => {
            commands::history::run(&path, &branch, &entity, format)?;
        }
        Commands::Compare {
            base,
            compare,
            limit,
        } => commands::compare::run(&path, &base, &compare, limit, format)?,
        Commands::Merge {
            source,
            target,
            squash,
            author,
            comment,
        } => {
            let request = commands::merge::Request::Merge {
                source: &source,
                target: &target,
                squash,
            };
            commands::merge::run(&path, request, &author, &comment, format)?;
        }
        Commands::Rebase {
            branch,
            onto,
            author,
            comment,
        } => {
            let request = commands::merge::Request::Rebase {
                branch: &branch,
                onto: onto.as_deref(),
            };
            commands::merge::run(&path, request, &author, &comment, format)?;
        }
        Commands::Purge { branch, strategy } => {
            commands::purge::run(&path, &branch, &strategy, format)?;
        }
        Commands::Optimize => commands::optimize::run(&path, format)?,
        Commands::Reindex { from } => commands::reindex::run(&path, &from, format)?,
        Commands::Repos => commands::repos::run(&path, format)?,
        Commands::DumpWal { limit } => commands::dump_wal::run(&path, limit, format)?,
        Commands::Version => {}
    }

    Ok(())
}
