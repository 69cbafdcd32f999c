//! `simplebank` binary: serves the bank or runs migrations by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simplebank_server::config::Config;
use simplebank_server::migrate::{self, MigrationOutcome, MigrationRunner};
use simplebank_server::store::Database;
use simplebank_server::supervisor;
use simplebank_server::telemetry::{init_tracing, LogFormat};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "simplebank", version, about = "SimpleBank RPC server and HTTP gateway")]
struct Cli {
    /// Directory containing `app.env`.
    #[arg(long, env = "SIMPLEBANK_CONFIG_DIR", default_value = ".", global = true)]
    config_dir: PathBuf,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate the schema, then serve RPC and HTTP (default).
    Serve,
    /// Run schema migrations without serving.
    #[command(subcommand)]
    Migrate(MigrateCommand),
}

#[derive(Debug, Subcommand)]
enum MigrateCommand {
    /// Apply every pending migration.
    Up,
    /// Revert migrations newer than `target`.
    Down {
        #[arg(long, default_value_t = 0)]
        target: i64,
    },
}

async fn migrate_by_hand(config_dir: &std::path::Path, command: MigrateCommand) -> anyhow::Result<()> {
    let config = Config::load(config_dir).context("cannot load config")?;
    let database = Database::connect(&config.db_driver, &config.db_source)
        .await
        .context("cannot connect to db")?;
    let engine = migrate::open(&config.migration_url, &database).await?;

    let outcome = match command {
        MigrateCommand::Up => MigrationRunner::run(engine.as_ref()).await?,
        MigrateCommand::Down { target } => MigrationRunner::rollback(engine.as_ref(), target).await?,
    };
    match outcome {
        MigrationOutcome::Changed(report) => {
            info!(versions = ?report.versions, version = ?report.current, "migration finished");
        }
        MigrationOutcome::NoChange => info!("no change"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => match supervisor::run(&cli.config_dir, std::future::pending()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(stage = %err.stage(), error = %err, "startup failed");
                ExitCode::FAILURE
            }
        },
        Command::Migrate(command) => match migrate_by_hand(&cli.config_dir, command).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("migration failed: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
