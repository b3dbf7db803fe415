//! `sorsync`: trigger hash and query passes for configured Systems of Record.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use serde::Serialize;
use sorsync_config::Config;
use sorsync_reconcile::error::Result as PassResult;
use sorsync_reconcile::{Reconciler, TriggerRequest};
use sorsync_registry::Database;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// `EX_TEMPFAIL`: the pass may succeed if run again later.
const EXIT_TEMPFAIL: u8 = 75;

#[derive(Parser)]
#[command(name = "sorsync", version, about = "Reconcile Systems of Record into a local registry")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, env = "SORSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Read from sources and the registry but write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh the checksum table of a SOR.
    Hash {
        sor: String,
        /// Rescan every entry instead of only those changed since the last pass.
        #[arg(long)]
        full: bool,
    },
    /// Bring the mirrored objects of a SOR in line with its checksums.
    Query {
        sor: String,
        /// Fetch every entry instead of only the keys that differ.
        #[arg(long)]
        full: bool,
    },
    /// Hash pass followed by query pass.
    Sync {
        sor: String,
        #[arg(long)]
        full: bool,
    },
    /// Print the stored object for one key.
    Show { sor: String, key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("{err:?}");
            if matches!(&*err, ErrorKind::Pass { retryable: true }) {
                ExitCode::from(EXIT_TEMPFAIL)
            } else {
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    config.registry.dry_run |= cli.dry_run;
    if config.registry.dry_run {
        info!("dry run: the registry will not be modified");
    }
    let database = Database::open(&config.registry).await.or_raise(|| ErrorKind::Registry)?;
    let outcome = execute(cli.command, cli.json, config, &database).await;
    database.close().await;
    outcome
}

async fn execute(command: Command, json: bool, config: Config, database: &Database) -> Result<()> {
    let reconciler = Reconciler::new(config, database.clone());
    match command {
        Command::Hash { sor, full } => {
            let result = pass(reconciler.hash(&TriggerRequest::new(sor).full(full)).await)?;
            emit(&result, json)
        },
        Command::Query { sor, full } => {
            let result = pass(reconciler.query(&TriggerRequest::new(sor).full(full)).await)?;
            emit(&result, json)
        },
        Command::Sync { sor, full } => {
            let result = pass(reconciler.sync(&TriggerRequest::new(sor).full(full)).await)?;
            emit(&result, json)
        },
        Command::Show { sor, key } => {
            let not_found = || ErrorKind::NotFound {
                sor: sor.clone(),
                key: key.clone(),
            };
            let sor_id = database
                .sors()
                .find(&sor)
                .await
                .or_raise(|| ErrorKind::Registry)?
                .ok_or_raise(not_found)?;
            let object = database
                .objects()
                .get(sor_id, &key)
                .await
                .or_raise(|| ErrorKind::Registry)?
                .ok_or_raise(not_found)?;
            let text = serde_json::to_string_pretty(&object).or_raise(|| ErrorKind::Output)?;
            println!("{text}");
            Ok(())
        },
    }
}

fn pass<T>(result: PassResult<T>) -> Result<T> {
    let retryable = result.as_ref().is_err_and(|err| err.is_retryable());
    result.or_raise(|| ErrorKind::Pass { retryable })
}

fn emit<T: Serialize + Display>(result: &T, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string(result).or_raise(|| ErrorKind::Output)?;
        println!("{text}");
    } else {
        println!("{result}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sorsync_reconcile::error::ErrorKind as PassErrorKind;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_pass_failures_carry_retryability() {
        let err = pass::<()>(Err(exn::Exn::from(PassErrorKind::Search("hr".to_string())))).unwrap_err();
        assert_eq!(*err, ErrorKind::Pass { retryable: true });
        let err = pass::<()>(Err(exn::Exn::from(PassErrorKind::Configuration("hr".to_string())))).unwrap_err();
        assert_eq!(*err, ErrorKind::Pass { retryable: false });
    }
}
