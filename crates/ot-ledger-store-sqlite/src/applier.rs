use ot_ledger_core::{
    block_to_sql, AcceptEvent, ChainEvent, ConfirmEvent, PublishEvent, RejectEvent, SolveEvent,
};
use rusqlite::params;
use tracing::{debug, warn};

use crate::{execute, Result, SqliteLedgerStore, StoreError};

impl SqliteLedgerStore {
    /// Applies one decoded event through the matching operation.
    pub fn apply(&mut self, event: &ChainEvent) -> Result<()> {
        match event {
            ChainEvent::Publish(inner) => self.publish(inner),
            ChainEvent::Solve(inner) => self.solve(inner),
            ChainEvent::Accept(inner) => self.accept(inner),
            ChainEvent::Reject(inner) => self.reject(inner),
            ChainEvent::Confirm(inner) => self.confirm(inner),
        }
    }

    /// Inserts a mission row. A repeated `mission_id` is stored again.
    ///
    /// `solution_num` and `solved` start from whatever solutions and accepts
    /// for this mission were ingested ahead of it, which is zero and false
    /// when events arrive in order.
    pub fn publish(&mut self, event: &PublishEvent) -> Result<()> {
        event.validate()?;
        execute(
            &self.conn,
            "insert mission",
            "INSERT INTO mission (
                mission_id, reward, context, publisher, block, tx, tx_time,
                solution_num, solved
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                (SELECT COUNT(*) FROM solution WHERE mission_id = ?1),
                EXISTS (
                    SELECT 1
                    FROM accept
                    JOIN solution ON solution.solution_id = accept.solution_id
                    WHERE solution.mission_id = ?1
                )
             )",
            params![
                event.mission_id,
                event.reward.to_string(),
                event.context,
                event.publisher,
                block_to_sql(event.block)?,
                event.tx,
                event.tx_time.unix_timestamp(),
            ],
        )?;

        debug!(mission_id = %event.mission_id, block = event.block, "applied publish");
        Ok(())
    }

    /// Inserts a solution row and bumps its mission's `solution_num`, in one
    /// transaction.
    pub fn solve(&mut self, event: &SolveEvent) -> Result<()> {
        event.validate()?;
        let tx = self.conn.transaction().map_err(|source| StoreError::Exec {
            operation: "begin solve transaction",
            source,
        })?;

        execute(
            &tx,
            "insert solution",
            "INSERT INTO solution (
                solution_id, mission_id, context, solver, block, tx, tx_time
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.solution_id,
                event.mission_id,
                event.context,
                event.solver,
                block_to_sql(event.block)?,
                event.tx,
                event.tx_time.unix_timestamp(),
            ],
        )?;

        let bumped = execute(
            &tx,
            "increment solution_num",
            "UPDATE mission
             SET solution_num = solution_num + 1
             WHERE mission_id = ?1",
            params![event.mission_id],
        )?;

        // An accept for this solution may already be on file.
        execute(
            &tx,
            "mark mission solved",
            "UPDATE mission
             SET solved = 1
             WHERE mission_id = ?1
               AND solved = 0
               AND EXISTS (SELECT 1 FROM accept WHERE solution_id = ?2)",
            params![event.mission_id, event.solution_id],
        )?;

        tx.commit().map_err(|source| StoreError::Exec {
            operation: "commit solve transaction",
            source,
        })?;

        if bumped == 0 {
            warn!(
                solution_id = %event.solution_id,
                mission_id = %event.mission_id,
                "solve references a mission that is not ingested yet"
            );
        }
        debug!(solution_id = %event.solution_id, block = event.block, "applied solve");
        Ok(())
    }

    /// Inserts an accept row and marks the owning mission solved, in one
    /// transaction. `solved` never reverts.
    pub fn accept(&mut self, event: &AcceptEvent) -> Result<()> {
        event.validate()?;
        let tx = self.conn.transaction().map_err(|source| StoreError::Exec {
            operation: "begin accept transaction",
            source,
        })?;

        execute(
            &tx,
            "insert accept",
            "INSERT INTO accept (solution_id, block, tx, tx_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.solution_id,
                block_to_sql(event.block)?,
                event.tx,
                event.tx_time.unix_timestamp(),
            ],
        )?;

        let marked = execute(
            &tx,
            "mark mission solved",
            "UPDATE mission
             SET solved = 1
             WHERE mission_id IN (
                SELECT mission_id
                FROM solution
                WHERE solution_id = ?1
             )",
            params![event.solution_id],
        )?;

        tx.commit().map_err(|source| StoreError::Exec {
            operation: "commit accept transaction",
            source,
        })?;

        if marked == 0 {
            warn!(
                solution_id = %event.solution_id,
                "accept references a solution or mission that is not ingested yet"
            );
        }
        debug!(solution_id = %event.solution_id, block = event.block, "applied accept");
        Ok(())
    }

    /// Records a rejection. Mission state is left to arbitration.
    pub fn reject(&mut self, event: &RejectEvent) -> Result<()> {
        event.validate()?;
        execute(
            &self.conn,
            "insert reject",
            "INSERT INTO reject (solution_id, block, tx, tx_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.solution_id,
                block_to_sql(event.block)?,
                event.tx,
                event.tx_time.unix_timestamp(),
            ],
        )?;

        debug!(solution_id = %event.solution_id, block = event.block, "applied reject");
        Ok(())
    }

    pub fn confirm(&mut self, event: &ConfirmEvent) -> Result<()> {
        event.validate()?;
        execute(
            &self.conn,
            "insert confirm",
            "INSERT INTO confirm (
                solution_id, arbitration_id, block, tx, tx_time
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.solution_id,
                event.arbitration_id,
                block_to_sql(event.block)?,
                event.tx,
                event.tx_time.unix_timestamp(),
            ],
        )?;

        debug!(
            solution_id = %event.solution_id,
            arbitration_id = %event.arbitration_id,
            block = event.block,
            "applied confirm"
        );
        Ok(())
    }
}
