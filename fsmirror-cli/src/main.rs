// SPDX-License-Identifier: AGPL-3.0-or-later
//! fsmirror CLI
//!
//! Copies, dumps and archives directory trees between storage devices.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::commands::Context;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "fsmirror")]
#[command(author, version, about = "fsmirror - Mirror directory trees across storage devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List directory contents
    #[command(alias = "dir")]
    Ls {
        /// Path to list, as `device:/path`
        #[arg(default_value = "sdmc:/")]
        path: String,

        /// Long format with details
        #[arg(short, long)]
        long: bool,

        /// Human-readable sizes
        #[arg(short = 'H', long)]
        human: bool,
    },

    /// Copy a file or directory tree
    #[command(alias = "cp")]
    Copy {
        /// Source path
        source: String,

        /// Destination path
        dest: String,
    },

    /// Replace a destination tree with a fresh copy of the source
    Dump {
        /// Source directory
        source: String,

        /// Destination directory
        dest: String,
    },

    /// Remove files or directories
    Rm {
        /// Path(s) to remove
        #[arg(required = true)]
        paths: Vec<String>,

        /// Recursive removal for directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Write a directory tree into a zip archive
    Archive {
        /// Source directory
        source: String,

        /// Archive file to create
        archive: String,
    },

    /// Create directories
    Mkdir {
        /// Directory path(s) to create
        #[arg(required = true)]
        paths: Vec<String>,

        /// Create parent directories as needed
        #[arg(short, long)]
        parents: bool,
    },

    /// Show file or directory information
    Stat {
        /// Path to inspect
        path: String,
    },

    /// List configured devices
    Devices,

    /// Show storage space information
    Df {
        /// Device to query
        #[arg(default_value = "sdmc")]
        device: String,
    },

    /// Persist pending writes on a transactional device
    Commit {
        /// Device to commit
        device: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = AppConfig::load(cli.config.as_deref())
        .and_then(|config| Context::new(config, cli.json))
        .and_then(|ctx| match cli.command {
            Commands::Ls { path, long, human } => commands::ls(&ctx, &path, long, human),
            Commands::Copy { source, dest } => commands::copy(&ctx, &source, &dest),
            Commands::Dump { source, dest } => commands::dump(&ctx, &source, &dest),
            Commands::Rm { paths, recursive } => commands::rm(&ctx, &paths, recursive),
            Commands::Archive { source, archive } => commands::archive(&ctx, &source, &archive),
            Commands::Mkdir { paths, parents } => commands::mkdir(&ctx, &paths, parents),
            Commands::Stat { path } => commands::stat(&ctx, &path),
            Commands::Devices => commands::devices(&ctx),
            Commands::Df { device } => commands::df(&ctx, &device),
            Commands::Commit { device } => commands::commit(&ctx, &device),
        });

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
