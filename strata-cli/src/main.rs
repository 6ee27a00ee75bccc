//! Strata CLI - Command-line interface for plugin-driven site builds
//!
//! Runs the build orchestrator over a site directory and reports cache and
//! phase status.

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::*;
use output::{OutputConfig, OutputFormat};

/// Plugin-driven site builds with incremental caching.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version)]
#[command(about = "Plugin-driven site builds with incremental caching")]
#[command(propagate_version = true)]
#[command(after_help = "Examples:
  strata build              Build the site in the current directory
  strata build site --production
  strata status             Show whether the cache is still valid
  strata clean              Delete the build cache")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Single-line JSON output
    #[arg(long, global = true)]
    compact: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every build phase over a site
    #[command(visible_alias = "b")]
    Build {
        /// Site root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Production build: delete stale HTML and CSS from the public directory
        #[arg(long)]
        production: bool,
    },

    /// Show configuration and cache status
    #[command(visible_alias = "st")]
    Status {
        /// Site root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Delete the build cache
    Clean {
        /// Site root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    let mut output = OutputConfig::auto_detect(cli.format);
    if cli.compact {
        output = output.compact();
    }

    match command {
        Commands::Build { path, production } => build::run(&path, production, output).await,
        Commands::Status { path } => status::run(&path, output).await,
        Commands::Clean { path } => clean::run(&path, output).await,
    }
}
