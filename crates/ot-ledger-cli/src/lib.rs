//! Command surface for the ledger read model.
//!
//! Embedders can call:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_ledger_with_db`] for a [`LedgerCommand`] against a DB path.
//! - [`run_ledger`] against an already open [`SqliteLedgerStore`].
//!
//! Every command prints one pretty JSON document on stdout. Logs go to stderr.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ot_ledger_core::{ChainEvent, U256};
use ot_ledger_store_sqlite::SqliteLedgerStore;
use serde_json::{json, Value};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "otl")]
#[command(about = "Mission/solution event ledger CLI")]
pub struct Cli {
    #[arg(long, env = "OT_LEDGER_DB", default_value = "./ot_ledger.sqlite3")]
    db: PathBuf,

    /// Log filter, e.g. `info` or `ot_ledger_store_sqlite=debug`. Falls back
    /// to `RUST_LOG`, then `warn`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    Migrate,
    /// Applies JSON-lines events and advances the checkpoint. Ctrl-C stops the
    /// run after the event in flight.
    Ingest(IngestArgs),
    /// Applies a single JSON event without moving the checkpoint.
    Apply(ApplyArgs),
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    Missions {
        #[command(subcommand)]
        command: MissionsCommand,
    },
    Solutions(SolutionsArgs),
    Process(ProcessArgs),
    Status,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// File of one event per line, or `-` for stdin.
    #[arg(long)]
    events: String,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    #[arg(long)]
    event: String,
}

#[derive(Debug, Subcommand)]
pub enum CheckpointCommand {
    Get,
    Set {
        #[arg(long)]
        block: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum MissionsCommand {
    List(PageArgs),
    Unsolved(PageArgs),
    ByPublisher {
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 30)]
        limit: u64,
    },
    Get {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[arg(long, default_value_t = 0)]
    offset: u64,
    #[arg(long, default_value_t = 30)]
    limit: u64,
}

#[derive(Debug, Args)]
pub struct SolutionsArgs {
    #[arg(long = "mission")]
    missions: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[arg(long = "solution")]
    solutions: Vec<String>,
    /// Restrict to `accept` or `reject`; both when omitted.
    #[arg(long)]
    status: Option<String>,
}

/// Executes a fully parsed CLI invocation.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(cli.log_level.as_deref());
    run_ledger_with_db(&cli.db, cli.command)
}

/// Executes `command` against the database at `db_path`, migrating it first.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_ledger_with_db(db_path: &Path, command: LedgerCommand) -> Result<()> {
    debug!(db = %db_path.display(), "opening ledger store");
    let mut store = SqliteLedgerStore::open(db_path)?;
    store.migrate()?;
    run_ledger(command, &mut store)
}

/// Executes `command` against an open store and prints its JSON result.
///
/// # Errors
/// Returns an error when argument validation or a store operation fails.
pub fn run_ledger(command: LedgerCommand, store: &mut SqliteLedgerStore) -> Result<()> {
    let output = execute(command, store)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn execute(command: LedgerCommand, store: &mut SqliteLedgerStore) -> Result<Value> {
    match command {
        LedgerCommand::Migrate => Ok(serde_json::to_value(store.ledger_status()?)?),
        LedgerCommand::Ingest(args) => {
            let events = read_events(&args.events)?;
            debug!(count = events.len(), source = %args.events, "decoded event batch");
            let shutdown = shutdown_flag()?;
            let report = store.ingest(events, &shutdown)?;
            Ok(serde_json::to_value(report)?)
        }
        LedgerCommand::Apply(args) => {
            let event: ChainEvent =
                serde_json::from_str(&args.event).context("failed to parse --event JSON")?;
            store.apply(&event)?;
            Ok(json!({ "applied": event.kind(), "block": event.block() }))
        }
        LedgerCommand::Checkpoint { command } => match command {
            CheckpointCommand::Get => Ok(json!({ "from": store.get_from()?.to_string() })),
            CheckpointCommand::Set { block } => {
                let height = parse_block(&block)?;
                store.set_from(height)?;
                Ok(json!({ "from": height.to_string() }))
            }
        },
        LedgerCommand::Missions { command } => run_missions(command, store),
        LedgerCommand::Solutions(args) => {
            if args.missions.is_empty() {
                return Err(anyhow!("at least one --mission is required"));
            }
            Ok(serde_json::to_value(store.get_solutions(&args.missions)?)?)
        }
        LedgerCommand::Process(args) => {
            if args.solutions.is_empty() {
                return Err(anyhow!("at least one --solution is required"));
            }
            let lookup = match args.status.as_deref() {
                Some(status) => store.get_processed(&args.solutions, status)?,
                None => store.get_process(&args.solutions)?,
            };
            Ok(serde_json::to_value(lookup)?)
        }
        LedgerCommand::Status => Ok(serde_json::to_value(store.ledger_status()?)?),
    }
}

fn run_missions(command: MissionsCommand, store: &SqliteLedgerStore) -> Result<Value> {
    match command {
        MissionsCommand::List(page) => Ok(serde_json::to_value(
            store.list_missions(page.offset, page.limit)?,
        )?),
        MissionsCommand::Unsolved(page) => Ok(serde_json::to_value(
            store.list_unsolved_missions(page.offset, page.limit)?,
        )?),
        MissionsCommand::ByPublisher { address, limit } => Ok(serde_json::to_value(
            store.list_missions_by_publisher(&address, limit)?,
        )?),
        MissionsCommand::Get { id } => match store.get_one_mission(&id)? {
            Some(view) => Ok(serde_json::to_value(view)?),
            None => Err(anyhow!("mission not found: {id}")),
        },
    }
}

/// Decodes every line before anything is applied, so a malformed line never
/// leaves a half-ingested file behind.
fn read_events(source: &str) -> Result<Vec<ChainEvent>> {
    let reader: Box<dyn BufRead> = if source == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file =
            File::open(source).with_context(|| format!("failed to open events file {source}"))?;
        Box::new(BufReader::new(file))
    };

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read events line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Flag raised by SIGINT or SIGTERM, checked by ingestion between events.
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .with_context(|| format!("failed to install handler for signal {signal}"))?;
    }
    Ok(flag)
}

fn parse_block(raw: &str) -> Result<U256> {
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(anyhow!("block MUST be a base-10 integer, got {raw:?}"));
    }
    U256::from_dec_str(raw).map_err(|err| anyhow!("invalid block {raw:?}: {err:?}"))
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
