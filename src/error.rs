use thiserror::Error;

use crate::account::types::{Address, Amount, TokenId};

/// Every failure the ledger core can report.
///
/// Validation errors are returned to the caller unchanged. `Busy` may be
/// retried with backoff. `StorageUnavailable` is fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Amount, requested: Amount },
    #[error("Allowance exceeded: limit {limit}, requested {requested}")]
    AllowanceExceeded { limit: Amount, requested: Amount },
    #[error("Account is frozen: {0}")]
    AccountFrozen(Address),
    #[error("Supply cap exceeded: max {max}, would have {would_have}")]
    SupplyCapExceeded { max: Amount, would_have: Amount },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Stake position is locked until {unlocks_at}")]
    StillLocked { unlocks_at: chrono::DateTime<chrono::Utc> },
    #[error("Proposal {0} was already executed")]
    AlreadyExecuted(u64),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Token is paused: {0}")]
    Paused(TokenId),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Busy: {0}")]
    Busy(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    /// Stable name used as the `kind` field of API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::AllowanceExceeded { .. } => "AllowanceExceeded",
            LedgerError::AccountFrozen(_) => "AccountFrozen",
            LedgerError::SupplyCapExceeded { .. } => "SupplyCapExceeded",
            LedgerError::Unauthorized(_) => "Unauthorized",
            LedgerError::StillLocked { .. } => "StillLocked",
            LedgerError::AlreadyExecuted(_) => "AlreadyExecuted",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::Paused(_) => "Paused",
            LedgerError::InvalidState(_) => "InvalidState",
            LedgerError::InvalidArgument(_) => "InvalidArgument",
            LedgerError::Busy(_) => "Busy",
            LedgerError::StorageUnavailable(_) => "StorageUnavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Busy(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::StorageUnavailable(err.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::StorageUnavailable(format!("codec: {}", err))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_retry_policy() {
        let busy = LedgerError::Busy("alice".to_string());
        assert_eq!(busy.kind(), "Busy");
        assert!(busy.is_retryable());
        assert!(!busy.is_fatal());

        let down = LedgerError::StorageUnavailable("disk".to_string());
        assert!(down.is_fatal());
        assert!(!down.is_retryable());

        let funds = LedgerError::InsufficientFunds {
            available: Amount::from(5u32),
            requested: Amount::from(9u32),
        };
        assert_eq!(funds.kind(), "InsufficientFunds");
        assert!(!funds.is_retryable());
        assert_eq!(funds.to_string(), "Insufficient funds: available 5, requested 9");
    }
}
