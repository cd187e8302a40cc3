use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_cli::commands::{identity, import, summary, util};
use tally_cli::{Cli, Commands, Config};

/// Open the database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<tally_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    tally_db::Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Some(Commands::Summary(args)) => {
            let requester = util::requester(cli.requester.as_deref(), &config)?;
            let db = open_database(&config)?;
            summary::run(&mut stdout, db, &config, requester, args)?;
        }
        Some(Commands::Import(args)) => {
            let db = open_database(&config)?;
            let default_user = args
                .user
                .as_deref()
                .or(cli.requester.as_deref())
                .or(config.user.as_deref());
            import::run(io::stdin().lock(), &mut stdout, &db, default_user)?;
        }
        Some(Commands::Identity(action)) => {
            let db = open_database(&config)?;
            identity::run(&mut stdout, &db, action)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }
    stdout.flush()?;

    Ok(())
}
