//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod init;
mod inspect;
mod process;
mod status;
mod tools;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "scansplit")]
#[command(about = "Split scanned PDF batches into documents at barcode separator pages")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 't', global = true, env = "SCANSPLIT_TARGET")]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Split one or more PDFs into groups
    Process {
        /// PDF files to process
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,
        /// Owner recorded on the upload and its groups
        #[arg(long, default_value = "local")]
        owner: String,
        /// Upload ID to (re)process; only valid with a single PDF
        #[arg(long)]
        upload_id: Option<String>,
        /// Number of PDFs processed concurrently
        #[arg(short, long, default_value = "2")]
        workers: usize,
    },

    /// Show how a PDF would be split, without writing anything
    Inspect {
        /// PDF file to inspect
        pdf: PathBuf,
    },

    /// Show an upload's status and groups
    Status {
        /// Upload ID
        upload_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check which external tools are installed
    Tools,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.target,
    };
    let settings = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Process {
            pdfs,
            owner,
            upload_id,
            workers,
        } => process::cmd_process(&settings, pdfs, &owner, upload_id, workers).await,
        Commands::Inspect { pdf } => inspect::cmd_inspect(&settings, pdf).await,
        Commands::Status { upload_id, json } => {
            status::cmd_status(&settings, &upload_id, json).await
        }
        Commands::Tools => tools::cmd_tools(&settings).await,
    }
}
