//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero, negative or finer than cents
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Source and destination of a transfer are the same wallet
    #[error("Cannot transfer to the same wallet")]
    SameWalletTransfer,

    /// Malformed caller input (empty name, bad idempotency key, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Withdrawal or transfer larger than the locked balance
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount requested
        required: Decimal,
        /// Balance at the time of the locked read
        available: Decimal,
    },

    /// Uniqueness violation (second wallet for a user, duplicate id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store transaction could not begin, lock or commit
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error (PostgreSQL)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to pick a response class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller sent something unacceptable
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Request is well-formed but violates a ledger rule
    BusinessRule,
    /// Uniqueness violation
    Conflict,
    /// Store or runtime failure
    Infrastructure,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_) | Error::SameWalletTransfer | Error::InvalidInput(_) => {
                ErrorKind::Validation
            }
            Error::WalletNotFound(_) | Error::UserNotFound(_) => ErrorKind::NotFound,
            Error::InsufficientFunds { .. } => ErrorKind::BusinessRule,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::TransactionFailed(_)
            | Error::Storage(_)
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "INVALID_AMOUNT",
            Error::SameWalletTransfer => "SAME_WALLET_TRANSFER",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Error::UserNotFound(_) => "USER_NOT_FOUND",
            Error::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Error::Conflict(_) => "CONFLICT",
            Error::TransactionFailed(_) => "TRANSACTION_FAILED",
            Error::Storage(_) | Error::Database(_) => "DATABASE_CONNECTION",
            Error::Serialization(_) | Error::Config(_) | Error::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::BusinessRule => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Infrastructure => 500,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let err = Error::InsufficientFunds {
            required: Decimal::new(1000, 2),
            available: Decimal::new(550, 2),
        };
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(err.http_status(), 400);

        assert_eq!(Error::WalletNotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(Error::Conflict("dup".into()).http_status(), 409);
        assert_eq!(Error::Storage("down".into()).code(), "DATABASE_CONNECTION");
        assert_eq!(Error::TransactionFailed("x".into()).http_status(), 500);
        assert_eq!(Error::SameWalletTransfer.code(), "SAME_WALLET_TRANSFER");
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = Error::InsufficientFunds {
            required: Decimal::new(1000, 2),
            available: Decimal::new(550, 2),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: required 10.00, available 5.50"
        );
    }
}
