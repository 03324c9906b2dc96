use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use assoc_migrate_core::{catalog, DumpSource, RowSource};
use assoc_migrate_orchestrator::{
    MigrationOptions, MigrationSummary, Migrator, SourceInfo, DEFAULT_MAX_FAILURES_REPORTED,
};
use assoc_migrate_store_sqlite::{SqliteSource, SqliteStore};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "assoc-migrate")]
#[command(about = "Migrate legacy association data into the new schema")]
struct Cli {
    /// Target `SQLite` database; created when missing.
    #[arg(long, env = "ASSOC_MIGRATE_TARGET", default_value = "./assoc_migrate.sqlite3", global = true)]
    target: PathBuf,

    /// Log filter such as `info` or `assoc_migrate_orchestrator=debug`. Falls back to `RUST_LOG`.
    #[arg(long, env = "ASSOC_MIGRATE_LOG", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate a dump file or a legacy database into the target.
    Run(RunArgs),
    /// Print the fixed table catalog in load order.
    Catalog,
    /// Print the target's integrity report.
    Verify,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["dump", "source_db"])))]
struct RunArgs {
    #[arg(long)]
    dump: Option<PathBuf>,
    #[arg(long)]
    source_db: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_MAX_FAILURES_REPORTED)]
    max_failures_reported: usize,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

/// Logs go to stderr; stdout carries only the JSON result.
fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("invalid log filter: {level}"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install logger: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Run(args) => {
            let summary = run_migration(&cli.target, args)?;
            let mut value = serde_json::to_value(summary)?;
            if let Value::Object(object) = &mut value {
                object.insert("target".to_string(), Value::String(cli.target.display().to_string()));
            }
            emit_json(value)
        }
        Command::Catalog => emit_json(json!({ "tables": catalog::describe() })),
        Command::Verify => {
            if !cli.target.exists() {
                return Err(anyhow!("target database does not exist: {}", cli.target.display()));
            }
            let store = SqliteStore::open(&cli.target)?;
            emit_json(serde_json::to_value(store.integrity_report()?)?)
        }
    }
}

fn run_migration(target: &Path, args: RunArgs) -> Result<MigrationSummary> {
    let mut migrator = Migrator::new(MigrationOptions {
        max_failures_reported: args.max_failures_reported,
    });

    if let Some(dump) = args.dump {
        let bytes = fs::read(&dump)
            .with_context(|| format!("failed to read dump file {}", dump.display()))?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let text = String::from_utf8_lossy(&bytes);
        let mut source = DumpSource::from_catalog(&text);
        tracing::info!(path = %dump.display(), rows = source.row_count(), "parsed dump");
        let info = SourceInfo {
            kind: source.kind().to_string(),
            location: dump.display().to_string(),
            sha256: Some(sha256),
        };
        return migrator.run_into_sqlite(&mut source, info, target);
    }

    if let Some(source_db) = args.source_db {
        let mut source = SqliteSource::open(&source_db)?;
        let info = SourceInfo {
            kind: source.kind().to_string(),
            location: source_db.display().to_string(),
            sha256: None,
        };
        return migrator.run_into_sqlite(&mut source, info, target);
    }

    Err(anyhow!("either --dump or --source-db is required"))
}
