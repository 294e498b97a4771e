use std::collections::HashSet;

use ot_ledger_core::{
    MissionStatus, MissionView, ProcessKind, ProcessView, RewardAmount, SolutionView,
};
use rusqlite::{params, params_from_iter, Params, Row};
use serde::Serialize;
use tracing::warn;

use crate::{collect_lenient, get_time, get_u64, Result, SqliteLedgerStore, StoreError};

const MISSION_COLUMNS: &str =
    "mission_id, reward, context, publisher, block, tx, tx_time, solution_num, solved";

// The per-publisher listing leaves the context payload out.
const MISSION_SUMMARY_COLUMNS: &str =
    "mission_id, reward, NULL, publisher, block, tx, tx_time, solution_num, solved";

const SOLUTION_COLUMNS: [&str; 7] = [
    "solution_id",
    "mission_id",
    "context",
    "solver",
    "block",
    "tx",
    "tx_time",
];

const PROCESS_COLUMNS: [&str; 4] = ["solution_id", "block", "tx", "tx_time"];

/// Largest id list bound into one `IN (...)` clause.
const MAX_BOUND_IDS: usize = 500;

/// Solutions found for a set of missions, with their ids in the same order.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SolutionLookup {
    pub solutions: Vec<SolutionView>,
    pub solution_ids: Vec<String>,
}

/// Accept/reject outcomes for a set of solutions, accepts first.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProcessLookup {
    pub process: Vec<ProcessView>,
    pub solution_ids: Vec<String>,
}

impl SqliteLedgerStore {
    /// Pages through every mission in insertion order.
    pub fn list_missions(&self, offset: u64, limit: u64) -> Result<Vec<MissionView>> {
        let sql = format!(
            "SELECT {MISSION_COLUMNS} FROM mission ORDER BY rowid LIMIT ?1 OFFSET ?2"
        );
        self.query_missions("list missions", &sql, params![to_sql(limit), to_sql(offset)])
    }

    /// Summary listing for one publisher; `context` is always `None`.
    pub fn list_missions_by_publisher(
        &self,
        publisher: &str,
        limit: u64,
    ) -> Result<Vec<MissionView>> {
        let sql = format!(
            "SELECT {MISSION_SUMMARY_COLUMNS} FROM mission
             WHERE publisher = ?1
             ORDER BY rowid
             LIMIT ?2"
        );
        self.query_missions(
            "list missions by publisher",
            &sql,
            params![publisher, to_sql(limit)],
        )
    }

    pub fn list_unsolved_missions(&self, offset: u64, limit: u64) -> Result<Vec<MissionView>> {
        let sql = format!(
            "SELECT {MISSION_COLUMNS} FROM mission
             WHERE solved = 0
             ORDER BY rowid
             LIMIT ?1 OFFSET ?2"
        );
        self.query_missions(
            "list unsolved missions",
            &sql,
            params![to_sql(limit), to_sql(offset)],
        )
    }

    /// First readable mission row carrying `mission_id`. Duplicates exist, so
    /// this is not "the" mission, only the earliest one stored.
    pub fn get_one_mission(&self, mission_id: &str) -> Result<Option<MissionView>> {
        let sql = format!(
            "SELECT {MISSION_COLUMNS} FROM mission
             WHERE mission_id = ?1
             ORDER BY rowid"
        );
        let operation = "get mission";
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|source| StoreError::Prepare { operation, source })?;
        let mut rows = stmt
            .query(params![mission_id])
            .map_err(|source| StoreError::Exec { operation, source })?;

        while let Some(row) = rows
            .next()
            .map_err(|source| StoreError::Exec { operation, source })?
        {
            match parse_mission_row(row) {
                Ok(view) => return Ok(Some(view)),
                Err(err) => warn!(operation, error = %err, "skipping malformed row"),
            }
        }
        Ok(None)
    }

    /// All solutions whose `mission_id` is in `mission_ids`.
    pub fn get_solutions(&self, mission_ids: &[String]) -> Result<SolutionLookup> {
        if mission_ids.is_empty() {
            return Err(StoreError::EmptySet("mission_id"));
        }

        let solutions = self.select_by_ids(
            "get solutions",
            "solution",
            &SOLUTION_COLUMNS,
            "mission_id",
            mission_ids,
            parse_solution_row,
        )?;
        let solution_ids = solutions
            .iter()
            .map(|solution| solution.solution_id.clone())
            .collect();
        Ok(SolutionLookup {
            solutions,
            solution_ids,
        })
    }

    /// Outcomes of one kind, named by `status` (`accept` or `reject`, any case).
    pub fn get_processed(&self, solution_ids: &[String], status: &str) -> Result<ProcessLookup> {
        if solution_ids.is_empty() {
            return Err(StoreError::EmptySet("solution_id"));
        }
        let kind = ProcessKind::parse(status).ok_or_else(|| {
            StoreError::InvalidArgument(format!(
                "status MUST be 'accept' or 'reject', got {status:?}"
            ))
        })?;
        self.get_processed_kind(solution_ids, kind)
    }

    /// Accepted outcomes followed by rejected ones. Any failed lookup fails
    /// the whole call; there are no partial results.
    pub fn get_process(&self, solution_ids: &[String]) -> Result<ProcessLookup> {
        if solution_ids.is_empty() {
            return Err(StoreError::EmptySet("solution_id"));
        }

        let mut merged = self.get_processed_kind(solution_ids, ProcessKind::Accept)?;
        let rejected = self.get_processed_kind(solution_ids, ProcessKind::Reject)?;
        merged.process.extend(rejected.process);
        merged.solution_ids.extend(rejected.solution_ids);
        Ok(merged)
    }

    fn get_processed_kind(
        &self,
        solution_ids: &[String],
        kind: ProcessKind,
    ) -> Result<ProcessLookup> {
        let operation = match kind {
            ProcessKind::Accept => "get accepted",
            ProcessKind::Reject => "get rejected",
        };
        let process = self.select_by_ids(
            operation,
            kind.table(),
            &PROCESS_COLUMNS,
            "solution_id",
            solution_ids,
            |row| parse_process_row(row, kind),
        )?;
        let solution_ids = process.iter().map(|item| item.solution_id.clone()).collect();
        Ok(ProcessLookup {
            process,
            solution_ids,
        })
    }

    /// Rows of `table` whose `key` is in `ids`, in `rowid` order.
    ///
    /// Ids are deduplicated and bound at most [`MAX_BOUND_IDS`] per statement,
    /// so arbitrarily large sets stay under SQLite's host parameter limit.
    fn select_by_ids<T>(
        &self,
        operation: &'static str,
        table: &str,
        columns: &[&str],
        key: &str,
        ids: &[String],
        parse: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        let rowid_index = columns.len();

        let mut ordered = Vec::new();
        for chunk in unique.chunks(MAX_BOUND_IDS) {
            let sql = format!(
                "SELECT {}, rowid FROM {table} WHERE {key} IN ({}) ORDER BY rowid",
                columns.join(", "),
                placeholders(chunk.len())
            );
            let mut stmt = self
                .conn
                .prepare(&sql)
                .map_err(|source| StoreError::Prepare { operation, source })?;
            let mut rows = stmt
                .query(params_from_iter(chunk.iter()))
                .map_err(|source| StoreError::Exec { operation, source })?;
            ordered.extend(collect_lenient(&mut rows, operation, |row| {
                Ok((row.get::<_, i64>(rowid_index)?, parse(row)?))
            })?);
        }

        ordered.sort_by_key(|(rowid, _)| *rowid);
        Ok(ordered.into_iter().map(|(_, value)| value).collect())
    }

    fn query_missions<P: Params>(
        &self,
        operation: &'static str,
        sql: &str,
        params: P,
    ) -> Result<Vec<MissionView>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|source| StoreError::Prepare { operation, source })?;
        let mut rows = stmt
            .query(params)
            .map_err(|source| StoreError::Exec { operation, source })?;
        collect_lenient(&mut rows, operation, parse_mission_row)
    }
}

fn parse_mission_row(row: &Row<'_>) -> rusqlite::Result<MissionView> {
    let reward = RewardAmount::from_text(row.get::<_, Option<String>>(1)?.as_deref());
    let solved: i64 = row.get(8)?;

    Ok(MissionView {
        mission_id: row.get(0)?,
        reward: reward.exact(),
        reward_in_det: reward.in_det(),
        context: row.get(2)?,
        publisher: row.get(3)?,
        block: get_u64(row, 4, "block")?,
        tx: row.get(5)?,
        tx_time: get_time(row, 6)?,
        solution_num: get_u64(row, 7, "solution_num")?,
        status: MissionStatus::from_solved(solved != 0),
    })
}

fn parse_solution_row(row: &Row<'_>) -> rusqlite::Result<SolutionView> {
    Ok(SolutionView {
        solution_id: row.get(0)?,
        mission_id: row.get(1)?,
        context: row.get(2)?,
        solver: row.get(3)?,
        block: get_u64(row, 4, "block")?,
        tx: row.get(5)?,
        tx_time: get_time(row, 6)?,
    })
}

fn parse_process_row(row: &Row<'_>, kind: ProcessKind) -> rusqlite::Result<ProcessView> {
    Ok(ProcessView {
        solution_id: row.get(0)?,
        status: kind,
        block: get_u64(row, 1, "block")?,
        tx: row.get(2)?,
        tx_time: get_time(row, 3)?,
    })
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
