//! Error types for consensus validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Structural predicate failure, never retried.
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    /// An input's source transaction is not known yet (orphan).
    #[error("Missing inputs: {0}")]
    MissingInputs(String),

    #[error("Double spend: {0}")]
    DoubleSpend(String),

    /// Asset conservation or fee minimum violated.
    #[error("Value imbalance: {0}")]
    ValueImbalance(String),

    /// Already known: a confirmed or pooled transaction, or a registration
    /// colliding with an existing one.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Valid but refused by relay policy; carries the short reason.
    #[error("Non-standard transaction: {0}")]
    NonStandard(&'static str),

    #[error("Amount out of range: {0}")]
    Range(#[from] RangeError),

    #[error("Block validation failed: {0}")]
    BlockValidation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl ConsensusError {
    /// DoS score a peer earns for relaying data that fails with this error.
    pub fn misbehavior_score(&self) -> u32 {
        match self {
            ConsensusError::MissingInputs(_)
            | ConsensusError::Storage(_)
            | ConsensusError::Duplicate(_)
            | ConsensusError::NonStandard(_) => 0,
            _ => 100,
        }
    }

    /// True when the same data may validate later without being changed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsensusError::MissingInputs(_) | ConsensusError::Storage(_)
        )
    }
}

/// Amount arithmetic outside `[0, MAX_MONEY]`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    #[error("negative amount {0}")]
    Negative(i64),
    #[error("amount {0} above maximum")]
    AboveMax(i64),
    #[error("amount sum overflow")]
    Overflow,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Per-session validation state kept alongside, never inside, a transaction.
#[derive(Debug, Default, Clone)]
pub struct ValidationState {
    misbehavior: u32,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated misbehaviour; only ever grows.
    pub fn misbehavior(&self) -> u32 {
        self.misbehavior
    }

    pub fn record(&mut self, err: &ConsensusError) {
        self.misbehavior = self.misbehavior.saturating_add(err.misbehavior_score());
    }

    /// Passes `result` through, scoring it on failure.
    pub fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.record(err);
        }
        result
    }
}
