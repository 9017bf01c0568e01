//! Testdeck CLI - Main Entry Point
//!
//! Runs test cases and project sweeps from the terminal, manages the
//! runner configuration, and inspects execution history.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{config, history, run, seed, Context};

/// Testdeck - browser e2e test execution platform
#[derive(Parser)]
#[command(name = "testdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path
    #[arg(long, env = "TESTDECK_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Runner project directory
    #[arg(long, env = "TESTDECK_PROJECT_DIR", default_value = ".", global = true)]
    project_dir: PathBuf,

    /// Durable video storage directory
    #[arg(long, env = "TESTDECK_STORAGE_DIR", global = true)]
    storage_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single test case
    Run(run::RunArgs),

    /// Execute every test in a project
    RunAll(run::RunAllArgs),

    /// Manage the runner configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show execution history
    History(history::HistoryArgs),

    /// Create a sample project with a test case and steps
    Seed(seed::SeedArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let context = Context::open(
        cli.db,
        cli.project_dir,
        cli.storage_dir,
        cli.format,
    )?;

    match cli.command {
        Commands::Run(args) => run::execute_one(&context, args).await,
        Commands::RunAll(args) => run::execute_all(&context, args).await,
        Commands::Config(command) => config::handle(&context, command),
        Commands::History(args) => history::handle(&context, args),
        Commands::Seed(args) => seed::handle(&context, args),
    }
}
