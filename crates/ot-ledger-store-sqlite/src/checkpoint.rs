use ot_ledger_core::{parse_height, U256};
use rusqlite::params;
use tracing::{info, warn};

use crate::{execute, Result, SqliteLedgerStore, StoreError};

const CHECKPOINT_KEY: &str = "from";

impl SqliteLedgerStore {
    /// Records `height` as the last fully applied block.
    pub fn set_from(&self, height: U256) -> Result<()> {
        execute(
            &self.conn,
            "upsert checkpoint",
            "INSERT INTO config (k, v) VALUES (?1, ?2)
             ON CONFLICT(k) DO UPDATE SET v = excluded.v",
            params![CHECKPOINT_KEY, height.to_string()],
        )?;
        info!(checkpoint = %height, "checkpoint advanced");
        Ok(())
    }

    /// Last applied block, or zero when none is stored or it does not parse.
    pub fn get_from(&self) -> Result<U256> {
        let operation = "read checkpoint";
        let mut stmt = self
            .conn
            .prepare("SELECT v FROM config WHERE k = ?1 LIMIT 1")
            .map_err(|source| StoreError::Prepare { operation, source })?;
        let mut rows = stmt
            .query(params![CHECKPOINT_KEY])
            .map_err(|source| StoreError::Exec { operation, source })?;

        let Some(row) = rows
            .next()
            .map_err(|source| StoreError::Exec { operation, source })?
        else {
            return Ok(U256::zero());
        };

        match row.get::<_, Option<String>>(0) {
            Ok(value) => Ok(parse_height(value.as_deref())),
            Err(err) => {
                warn!(error = %err, "unreadable checkpoint, starting from genesis");
                Ok(U256::zero())
            }
        }
    }
}
