//! Command-line interface for contentql.
//!
//! # Usage
//!
//! ```bash
//! # Execute a request against a content fixture
//! contentql run --fixture content.json --request request.json
//!
//! # Same, with a content config and cache metadata in the response
//! contentql run -f content.json -r request.json --config content.config.json --cache
//!
//! # Validate a content config
//! contentql check-config content.config.json
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use contentql_content::{ConfigError, ContentConfig, ContentGraph, InMemoryContentStore, StorageError};
use contentql_runtime::{ExecutorConfig, Request};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid request document {path}: {source}")]
    Request {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot print response: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "contentql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a request document against a content fixture
    Run {
        /// Content fixture (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Request document (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Content configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Add collected cache metadata to the response extensions
        #[arg(long)]
        cache: bool,

        /// Maximum selection depth
        #[arg(long, default_value = "10")]
        max_depth: usize,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Validate a content configuration file
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },

    /// Print version information
    Version,
}

/// Runs a command and returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Run {
            fixture,
            request,
            config,
            cache,
            max_depth,
            compact,
        } => {
            let executor_config = ExecutorConfig {
                max_depth,
                expose_cache_metadata: cache,
                ..ExecutorConfig::default()
            };
            run_request(&fixture, &request, config.as_deref(), executor_config, compact, cli.verbose)
                .await
        }
        Commands::CheckConfig { file } => check_config(&file, cli.verbose),
        Commands::Version => {
            println!("contentql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn read_request(path: &Path) -> Result<Request, CliError> {
    let source = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| CliError::Request {
        path: path.to_path_buf(),
        source,
    })
}

async fn run_request(
    fixture: &Path,
    request: &Path,
    config: Option<&Path>,
    executor_config: ExecutorConfig,
    compact: bool,
    verbose: bool,
) -> Result<i32, CliError> {
    let config = match config {
        Some(path) => ContentConfig::from_file(path)?,
        None => ContentConfig::default(),
    };
    let store = Arc::new(InMemoryContentStore::from_file(fixture)?);
    let graph = ContentGraph::builder()
        .config(config)
        .executor_config(executor_config)
        .collaborators(Arc::clone(&store))
        .build()?;
    let request = read_request(request)?;
    debug!(fields = request.query.len(), "request loaded");

    let response = graph.execute(&request).await;

    let output = if compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{output}");

    if verbose {
        eprintln!("{} {} storage call(s)", "Info:".blue(), store.calls().len());
    }
    if let Some(errors) = &response.errors {
        eprintln!("{} {} field error(s)", "Warning:".yellow().bold(), errors.len());
    }
    Ok(0)
}

fn check_config(file: &Path, verbose: bool) -> Result<i32, CliError> {
    if verbose {
        println!("{} {}", "Checking".blue(), file.display());
    }

    match ContentConfig::from_file(file) {
        Ok(config) => {
            println!(
                "{} {} content type(s) on '{}'",
                "Success:".green().bold(),
                config.types.len(),
                config.interface
            );
            Ok(0)
        }
        Err(ConfigError::Io(source)) => Err(CliError::Io {
            path: file.to_path_buf(),
            source,
        }),
        Err(error) => {
            eprintln!("{} {}", "Error".red().bold(), file.display());
            eprintln!("  {} {}", "-->".blue(), error);
            Ok(1)
        }
    }
}
