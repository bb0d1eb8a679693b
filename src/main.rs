use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plp_bookstore::config::{ConfigLoader, ConfigOverrides, RunnerConfig};
use plp_bookstore::database::{DatabaseEngine, MongoEngine};
use plp_bookstore::logging::init_logging;
use plp_bookstore::runner::QueryRunner;
use plp_bookstore::seed;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

/// Runs the bookstore query sequence against MongoDB
#[derive(Debug, Parser)]
#[command(name = "bookstore-queries", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Connection string
    #[arg(long, global = true, env = "BOOKSTORE_URI", value_name = "URI")]
    uri: Option<String>,

    /// Database name
    #[arg(long, global = true, value_name = "NAME")]
    database: Option<String>,

    /// Collection name
    #[arg(long, global = true, value_name = "NAME")]
    collection: Option<String>,

    /// Log level or filter directive
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format (human, json)
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute the query sequence (default)
    Run,
    /// Insert the sample books
    Seed {
        /// Delete existing books first
        #[arg(long)]
        reset: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            uri: self.uri.clone(),
            database_name: self.database.clone(),
            collection_name: self.collection.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = ConfigLoader::new()
        .load_from_file(cli.config.clone())
        .load_from_env()
        .with_overrides(cli.overrides())
        .build()?;

    // Keep the guard alive so the file writer flushes on exit
    let _guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_queries(config).await,
        Command::Seed { reset } => seed_books(config, reset).await,
    }
}

async fn run_queries(config: RunnerConfig) -> Result<ExitCode> {
    let runner = QueryRunner::new(config, MongoEngine::new());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match runner.run(&mut out).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            eprintln!("Error running queries: {}", failure.source);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn seed_books(config: RunnerConfig, reset: bool) -> Result<ExitCode> {
    let engine = MongoEngine::new();
    let collection = match engine.connect(&config).await {
        Ok(collection) => collection,
        Err(err) => {
            eprintln!("Error seeding books: {}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let outcome = seed::seed_collection(collection.as_ref(), &seed::sample_books(), reset).await;

    if let Err(err) = collection.close().await {
        warn!(error = %err, "failed to close connection");
    }

    match outcome {
        Ok(outcome) => {
            info!(namespace = %config.namespace(), "seed complete");
            println!(
                "Inserted {} books into {}",
                outcome.inserted_count,
                config.namespace()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Error seeding books: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}
