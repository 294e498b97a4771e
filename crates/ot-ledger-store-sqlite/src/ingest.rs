use std::sync::atomic::{AtomicBool, Ordering};

use ot_ledger_core::{ChainEvent, U256};
use serde::Serialize;
use tracing::{error, info};

use crate::{Result, SqliteLedgerStore};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub skipped: usize,
    #[serde(with = "ot_ledger_core::dec_u256")]
    pub checkpoint: U256,
    pub interrupted: bool,
}

impl SqliteLedgerStore {
    /// Applies `events` one at a time in delivery order.
    ///
    /// Events from blocks below the checkpoint found at start are treated as
    /// already applied. Events from the checkpoint block itself are applied
    /// again. `shutdown` is consulted between events, never during one.
    ///
    /// The checkpoint is a low-water mark written once per run: the highest
    /// applied block when the run ends or is interrupted, and the lower of that
    /// and the failing event's block when an apply fails. A run that dies
    /// part way leaves the previous checkpoint in place, so its events are
    /// replayed rather than skipped.
    pub fn ingest<I>(&mut self, events: I, shutdown: &AtomicBool) -> Result<IngestReport>
    where
        I: IntoIterator<Item = ChainEvent>,
    {
        let resume_from = self.get_from()?;
        let mut high_water = resume_from;
        let mut applied = 0_usize;
        let mut skipped = 0_usize;
        let mut interrupted = false;

        for event in events {
            if shutdown.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }

            let block = U256::from(event.block());
            if block < resume_from {
                skipped += 1;
                continue;
            }

            if let Err(err) = self.apply(&event) {
                let hold_at = high_water.min(block);
                error!(
                    kind = event.kind(),
                    block = event.block(),
                    tx = event.tx(),
                    checkpoint = %hold_at,
                    error = %err,
                    "event apply failed, checkpoint held"
                );
                if hold_at != resume_from {
                    self.set_from(hold_at)?;
                }
                return Err(err);
            }
            applied += 1;
            high_water = high_water.max(block);
        }

        if high_water != resume_from {
            self.set_from(high_water)?;
        }
        info!(applied, skipped, checkpoint = %high_water, interrupted, "ingestion pass finished");
        Ok(IngestReport {
            applied,
            skipped,
            checkpoint: high_water,
            interrupted,
        })
    }
}
