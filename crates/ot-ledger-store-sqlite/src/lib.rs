#![allow(clippy::missing_errors_doc)]

//! SQLite read model for the mission/solution event ledger.
//!
//! Writers apply one decoded chain event at a time; readers open their own
//! store on the same file and observe whatever has been committed so far.

mod applier;
mod checkpoint;
mod ingest;
mod query;

use std::path::Path;

use ot_ledger_core::{format_rfc3339, LedgerError, U256};
use rusqlite::{Connection, Params, Row, Rows};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

pub use ingest::IngestReport;
pub use query::{ProcessLookup, SolutionLookup};

const LEDGER_MIGRATION_VERSION: i64 = 1;

const SCHEMA_LEDGER_V1: &str = r"
CREATE TABLE IF NOT EXISTS mission (
  mission_id TEXT NOT NULL,
  reward TEXT,
  context TEXT NOT NULL DEFAULT '',
  publisher TEXT NOT NULL,
  block INTEGER NOT NULL,
  tx TEXT NOT NULL,
  tx_time INTEGER NOT NULL,
  solution_num INTEGER NOT NULL DEFAULT 0,
  solved INTEGER NOT NULL DEFAULT 0 CHECK (solved IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_mission_mission_id ON mission(mission_id);
CREATE INDEX IF NOT EXISTS idx_mission_publisher ON mission(publisher);
CREATE INDEX IF NOT EXISTS idx_mission_solved ON mission(solved);

CREATE TABLE IF NOT EXISTS solution (
  solution_id TEXT NOT NULL,
  mission_id TEXT NOT NULL,
  context TEXT NOT NULL DEFAULT '',
  solver TEXT NOT NULL,
  block INTEGER NOT NULL,
  tx TEXT NOT NULL,
  tx_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_solution_solution_id ON solution(solution_id);
CREATE INDEX IF NOT EXISTS idx_solution_mission_id ON solution(mission_id);

CREATE TABLE IF NOT EXISTS accept (
  solution_id TEXT NOT NULL,
  block INTEGER NOT NULL,
  tx TEXT NOT NULL,
  tx_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accept_solution_id ON accept(solution_id);

CREATE TABLE IF NOT EXISTS reject (
  solution_id TEXT NOT NULL,
  block INTEGER NOT NULL,
  tx TEXT NOT NULL,
  tx_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reject_solution_id ON reject(solution_id);

CREATE TABLE IF NOT EXISTS confirm (
  solution_id TEXT NOT NULL,
  arbitration_id TEXT NOT NULL,
  block INTEGER NOT NULL,
  tx TEXT NOT NULL,
  tx_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_confirm_solution_id ON confirm(solution_id);

CREATE TABLE IF NOT EXISTS config (
  k TEXT PRIMARY KEY,
  v TEXT
);

CREATE TRIGGER IF NOT EXISTS trg_solution_no_update
BEFORE UPDATE ON solution
BEGIN
  SELECT RAISE(FAIL, 'solution is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_solution_no_delete
BEFORE DELETE ON solution
BEGIN
  SELECT RAISE(FAIL, 'solution is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_accept_no_update
BEFORE UPDATE ON accept
BEGIN
  SELECT RAISE(FAIL, 'accept is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_accept_no_delete
BEFORE DELETE ON accept
BEGIN
  SELECT RAISE(FAIL, 'accept is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_reject_no_update
BEFORE UPDATE ON reject
BEGIN
  SELECT RAISE(FAIL, 'reject is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_reject_no_delete
BEFORE DELETE ON reject
BEGIN
  SELECT RAISE(FAIL, 'reject is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_confirm_no_update
BEFORE UPDATE ON confirm
BEGIN
  SELECT RAISE(FAIL, 'confirm is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_confirm_no_delete
BEFORE DELETE ON confirm
BEGIN
  SELECT RAISE(FAIL, 'confirm is append-only');
END;
";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open sqlite database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to prepare {operation}: {source}")]
    Prepare {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to execute {operation}: {source}")]
    Exec {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{0} set MUST be non-empty")]
    EmptySet(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Validation(#[from] LedgerError),
}

impl StoreError {
    /// True for storage faults, the class that must halt ingestion.
    #[must_use]
    pub fn is_write_error(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Prepare { .. } | Self::Exec { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LedgerStatus {
    pub schema_version: i64,
    pub missions: u64,
    pub solved_missions: u64,
    pub solutions: u64,
    pub accepts: u64,
    pub rejects: u64,
    pub confirms: u64,
    #[serde(with = "ot_ledger_core::dec_u256")]
    pub checkpoint: U256,
}

pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|source| StoreError::Exec {
            operation: "configure sqlite pragmas",
            source,
        })?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .map_err(|source| StoreError::Exec {
                operation: "ensure schema_migrations",
                source,
            })?;

        self.conn
            .execute_batch(SCHEMA_LEDGER_V1)
            .map_err(|source| StoreError::Exec {
                operation: "apply ledger schema",
                source,
            })?;

        let now = format_rfc3339(OffsetDateTime::now_utc())?;
        execute(
            &self.conn,
            "register ledger migration",
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![LEDGER_MIGRATION_VERSION, now],
        )?;

        Ok(())
    }

    pub fn ledger_status(&self) -> Result<LedgerStatus> {
        let schema_version = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|source| StoreError::Exec {
                operation: "read schema version",
                source,
            })?;

        Ok(LedgerStatus {
            schema_version,
            missions: self.count("SELECT COUNT(*) FROM mission")?,
            solved_missions: self.count("SELECT COUNT(*) FROM mission WHERE solved = 1")?,
            solutions: self.count("SELECT COUNT(*) FROM solution")?,
            accepts: self.count("SELECT COUNT(*) FROM accept")?,
            rejects: self.count("SELECT COUNT(*) FROM reject")?,
            confirms: self.count("SELECT COUNT(*) FROM confirm")?,
            checkpoint: self.get_from()?,
        })
    }

    fn count(&self, sql: &'static str) -> Result<u64> {
        let count = self
            .conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map_err(|source| StoreError::Exec {
                operation: "count rows",
                source,
            })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Prepares and executes one statement, keeping the two failure points apart.
fn execute<P: Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> Result<usize> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|source| StoreError::Prepare { operation, source })?;
    stmt.execute(params)
        .map_err(|source| StoreError::Exec { operation, source })
}

/// Drains `rows`, skipping (and logging) any row `parse` rejects.
fn collect_lenient<T>(
    rows: &mut Rows<'_>,
    operation: &'static str,
    parse: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|source| StoreError::Exec { operation, source })?
    {
        match parse(row) {
            Ok(value) => values.push(value),
            Err(err) => warn!(operation, error = %err, "skipping malformed row"),
        }
    }
    Ok(values)
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Integer,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn get_u64(row: &Row<'_>, index: usize, column: &str) -> rusqlite::Result<u64> {
    let value: i64 = row.get(index)?;
    u64::try_from(value).map_err(|_| invalid_column(index, format!("invalid {column}: {value}")))
}

fn get_time(row: &Row<'_>, index: usize) -> rusqlite::Result<OffsetDateTime> {
    let value: i64 = row.get(index)?;
    ot_ledger_core::from_unix_seconds(value).map_err(|err| invalid_column(index, err.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use ot_ledger_core::{
        from_unix_seconds, AcceptEvent, ConfirmEvent, PublishEvent, RejectEvent, SolveEvent, U256,
    };
    use time::OffsetDateTime;

    use crate::{Result, SqliteLedgerStore};

    pub fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    pub fn fixture_store() -> SqliteLedgerStore {
        let store = must(SqliteLedgerStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    pub fn fixture_time(offset: i64) -> OffsetDateTime {
        match from_unix_seconds(1_700_000_000 + offset) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture timestamp: {err}"),
        }
    }

    pub fn publish(mission_id: &str, reward: u64, block: u64) -> PublishEvent {
        PublishEvent {
            mission_id: mission_id.to_string(),
            reward: U256::from(reward),
            context: format!("context for {mission_id}"),
            publisher: "0xpublisher".to_string(),
            block,
            tx: format!("0xtx-publish-{mission_id}"),
            tx_time: fixture_time(0),
        }
    }

    pub fn solve(solution_id: &str, mission_id: &str, block: u64) -> SolveEvent {
        SolveEvent {
            solution_id: solution_id.to_string(),
            mission_id: mission_id.to_string(),
            context: format!("answer {solution_id}"),
            solver: "0xsolver".to_string(),
            block,
            tx: format!("0xtx-solve-{solution_id}"),
            tx_time: fixture_time(60),
        }
    }

    pub fn accept(solution_id: &str, block: u64) -> AcceptEvent {
        AcceptEvent {
            solution_id: solution_id.to_string(),
            block,
            tx: format!("0xtx-accept-{solution_id}"),
            tx_time: fixture_time(120),
        }
    }

    pub fn reject(solution_id: &str, block: u64) -> RejectEvent {
        RejectEvent {
            solution_id: solution_id.to_string(),
            block,
            tx: format!("0xtx-reject-{solution_id}"),
            tx_time: fixture_time(120),
        }
    }

    pub fn confirm(solution_id: &str, arbitration_id: &str, block: u64) -> ConfirmEvent {
        ConfirmEvent {
            solution_id: solution_id.to_string(),
            arbitration_id: arbitration_id.to_string(),
            block,
            tx: format!("0xtx-confirm-{solution_id}"),
            tx_time: fixture_time(180),
        }
    }
}
