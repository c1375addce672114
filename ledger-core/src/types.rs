//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode on disk, JSON on the wire)
//! - Exact arithmetic (Decimal for money)
//! - Time-ordered identifiers (UUIDv7)

use crate::amount::{Amount, MONEY_SCALE};
use crate::error::Error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account holder. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub id: Uuid,

    /// Display name (trimmed, non-empty)
    pub name: String,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl User {
    /// New user with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// The single wallet owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: Uuid,

    /// Owner (unique across wallets)
    pub user_id: Uuid,

    /// Current balance, never negative at a committed state
    pub balance: Amount,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet for `user_id`
    pub fn new(user_id: Uuid) -> Self {
        let mut balance = Decimal::ZERO;
        balance.rescale(MONEY_SCALE);
        Self {
            id: Uuid::now_v7(),
            user_id,
            balance,
            created_at: Utc::now(),
        }
    }
}

/// Kind of balance movement recorded by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money in from outside the ledger
    Deposit,
    /// Money out of the ledger
    Withdraw,
    /// Credit side of a transfer
    TransferIn,
    /// Debit side of a transfer
    TransferOut,
}

impl TransactionKind {
    /// Stable string form, as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::TransferOut => "transfer_out",
        }
    }

    /// Is this a credit to the wallet?
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::TransferIn)
    }

    /// Balance delta produced by an entry of this kind
    pub fn signed(&self, amount: Amount) -> Amount {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdraw" => Ok(TransactionKind::Withdraw),
            "transfer_in" => Ok(TransactionKind::TransferIn),
            "transfer_out" => Ok(TransactionKind::TransferOut),
            other => Err(Error::InvalidInput(format!(
                "Unknown transaction kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one balance movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Wallet whose balance moved
    pub wallet_id: Uuid,

    /// Movement kind
    #[serde(rename = "type")]
    pub kind: TransactionKind,

    /// Always positive; direction comes from `kind`
    pub amount: Amount,

    /// Shared by both legs of a transfer
    pub reference_id: Option<Uuid>,

    /// Free text supplied with a transfer
    pub description: Option<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl TransactionEntry {
    /// New entry stamped now
    pub fn new(
        wallet_id: Uuid,
        kind: TransactionKind,
        amount: Amount,
        reference_id: Option<Uuid>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            wallet_id,
            kind,
            amount,
            reference_id,
            description,
            created_at: Utc::now(),
        }
    }

    /// Signed balance delta of this entry
    pub fn delta(&self) -> Amount {
        self.kind.signed(self.amount)
    }
}

/// A user together with its wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithWallet {
    /// User ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// The user's wallet
    pub wallet: Wallet,

    /// User creation time
    pub created_at: DateTime<Utc>,
}

impl UserWithWallet {
    /// Combine a user with its wallet
    pub fn new(user: User, wallet: Wallet) -> Self {
        Self {
            id: user.id,
            name: user.name,
            wallet,
            created_at: user.created_at,
        }
    }
}

/// Stored balance compared with the balance rebuilt from entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Wallet checked
    pub wallet_id: Uuid,

    /// Balance column
    pub balance: Amount,

    /// Σ credits − Σ debits over all entries
    pub derived_balance: Amount,

    /// Number of entries replayed
    pub entry_count: usize,
}

impl Reconciliation {
    /// Do the stored and derived balances agree?
    pub fn is_consistent(&self) -> bool {
        self.balance == self.derived_balance
    }
}
