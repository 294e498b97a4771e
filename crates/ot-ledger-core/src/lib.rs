//! Domain model for the mission/solution event ledger.
//!
//! Events arrive already decoded from chain logs. Every identifier is supplied
//! by the chain and none of them is guaranteed unique: a replayed log produces
//! a second, identical event.

mod amount;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

pub use amount::{parse_height, RewardAmount, TokenDecimal, TOKEN_DECIMALS, WEI_PER_TOKEN};
pub use primitive_types::U256;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Unsolved,
    Solved,
}

impl MissionStatus {
    #[must_use]
    pub fn from_solved(solved: bool) -> Self {
        if solved {
            Self::Solved
        } else {
            Self::Unsolved
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsolved => "unsolved",
            Self::Solved => "solved",
        }
    }
}

/// Outcome recorded against a solution. Each kind owns exactly one table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Accept,
    Reject,
}

impl ProcessKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }

    #[must_use]
    pub fn table(self) -> &'static str {
        self.as_str()
    }

    /// Case-insensitive; anything other than `accept` or `reject` is `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishEvent {
    pub mission_id: String,
    #[serde(with = "dec_u256")]
    pub reward: U256,
    pub context: String,
    pub publisher: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolveEvent {
    pub solution_id: String,
    pub mission_id: String,
    pub context: String,
    pub solver: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptEvent {
    pub solution_id: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectEvent {
    pub solution_id: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

/// Arbitration ruling on a solution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmEvent {
    pub solution_id: String,
    pub arbitration_id: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    Publish(PublishEvent),
    Solve(SolveEvent),
    Accept(AcceptEvent),
    Reject(RejectEvent),
    Confirm(ConfirmEvent),
}

impl ChainEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Publish(_) => "publish",
            Self::Solve(_) => "solve",
            Self::Accept(_) => "accept",
            Self::Reject(_) => "reject",
            Self::Confirm(_) => "confirm",
        }
    }

    #[must_use]
    pub fn block(&self) -> u64 {
        match self {
            Self::Publish(event) => event.block,
            Self::Solve(event) => event.block,
            Self::Accept(event) => event.block,
            Self::Reject(event) => event.block,
            Self::Confirm(event) => event.block,
        }
    }

    #[must_use]
    pub fn tx(&self) -> &str {
        match self {
            Self::Publish(event) => &event.tx,
            Self::Solve(event) => &event.tx,
            Self::Accept(event) => &event.tx,
            Self::Reject(event) => &event.tx,
            Self::Confirm(event) => &event.tx,
        }
    }

    /// Checks that the event can be stored. Identifier fields are kept as the
    /// chain emitted them, blank ones included.
    ///
    /// # Errors
    /// Returns [`LedgerError::Validation`] for a block height that does not fit
    /// a signed 64-bit column.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self {
            Self::Publish(event) => event.validate(),
            Self::Solve(event) => event.validate(),
            Self::Accept(event) => event.validate(),
            Self::Reject(event) => event.validate(),
            Self::Confirm(event) => event.validate(),
        }
    }
}

impl PublishEvent {
    /// # Errors
    /// See [`ChainEvent::validate`].
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_block(self.block)
    }
}

impl SolveEvent {
    /// # Errors
    /// See [`ChainEvent::validate`].
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_block(self.block)
    }
}

impl AcceptEvent {
    /// # Errors
    /// See [`ChainEvent::validate`].
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_block(self.block)
    }
}

impl RejectEvent {
    /// # Errors
    /// See [`ChainEvent::validate`].
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_block(self.block)
    }
}

impl ConfirmEvent {
    /// # Errors
    /// See [`ChainEvent::validate`].
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_block(self.block)
    }
}

impl From<PublishEvent> for ChainEvent {
    fn from(event: PublishEvent) -> Self {
        Self::Publish(event)
    }
}

impl From<SolveEvent> for ChainEvent {
    fn from(event: SolveEvent) -> Self {
        Self::Solve(event)
    }
}

impl From<AcceptEvent> for ChainEvent {
    fn from(event: AcceptEvent) -> Self {
        Self::Accept(event)
    }
}

impl From<RejectEvent> for ChainEvent {
    fn from(event: RejectEvent) -> Self {
        Self::Reject(event)
    }
}

impl From<ConfirmEvent> for ChainEvent {
    fn from(event: ConfirmEvent) -> Self {
        Self::Confirm(event)
    }
}

/// Read-model view of one mission row.
///
/// `context` is `None` in the lighter per-publisher listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissionView {
    pub mission_id: String,
    #[serde(with = "dec_u256")]
    pub reward: U256,
    pub reward_in_det: TokenDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub publisher: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
    pub solution_num: u64,
    pub status: MissionStatus,
}

impl MissionView {
    #[must_use]
    pub fn reward_amount(&self) -> RewardAmount {
        RewardAmount::new(self.reward)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SolutionView {
    pub solution_id: String,
    pub mission_id: String,
    pub context: String,
    pub solver: String,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessView {
    pub solution_id: String,
    pub status: ProcessKind,
    pub block: u64,
    pub tx: String,
    #[serde(with = "time::serde::timestamp")]
    pub tx_time: OffsetDateTime,
}

/// Converts a block height to the signed column type used by the store.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when `block` exceeds `i64::MAX`.
pub fn block_to_sql(block: u64) -> Result<i64, LedgerError> {
    i64::try_from(block)
        .map_err(|_| LedgerError::Validation(format!("block {block} exceeds storage range")))
}

/// Converts a stored unix timestamp back into a UTC instant.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when the value is outside the
/// representable range.
pub fn from_unix_seconds(value: i64) -> Result<OffsetDateTime, LedgerError> {
    OffsetDateTime::from_unix_timestamp(value)
        .map_err(|err| LedgerError::Validation(format!("invalid unix timestamp {value}: {err}")))
}

/// # Errors
/// Returns [`LedgerError::Validation`] if formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, LedgerError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| LedgerError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

fn check_block(block: u64) -> Result<(), LedgerError> {
    block_to_sql(block).map(|_| ())
}

/// Serde adapter carrying a [`U256`] as a base-10 string.
pub mod dec_u256 {
    use primitive_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    /// # Errors
    /// Fails on anything that is not an unsigned base-10 integer below `2^256`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(serde::de::Error::custom(format!(
                "expected a base-10 integer, got {raw:?}"
            )));
        }
        U256::from_dec_str(&raw)
            .map_err(|err| serde::de::Error::custom(format!("invalid integer {raw:?}: {err:?}")))
    }
}
