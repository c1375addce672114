//! Ledger Store contract
//!
//! The engine talks to storage only through [`LedgerStore`] and the
//! [`UnitOfWork`] it hands out. A unit of work is one store transaction:
//! locked reads and writes made through it become visible together on
//! [`UnitOfWork::commit`], or not at all.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process maps, used by tests and the `memory` backend
//! - [`RocksStore`] - RocksDB column families with atomic write batches
//! - [`PostgresStore`] - PostgreSQL via sqlx, `SELECT ... FOR UPDATE` row locks
//!
//! # Locking
//!
//! Wallet rows are the unit of locking. A lock taken by
//! [`UnitOfWork::lock_wallet`] is exclusive and held until the unit commits,
//! rolls back or is dropped. Re-locking a wallet the unit already holds
//! returns immediately.

use crate::amount::Amount;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{TransactionEntry, User, UserWithWallet, Wallet};
use async_trait::async_trait;
use uuid::Uuid;

pub mod locks;
pub mod memory;
pub mod postgres;
pub mod rocks;

pub use locks::{HeldLocks, RowLocks};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use rocks::RocksStore;

/// Persistent storage for users, wallets and transaction entries
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Store transaction type
    type UnitOfWork: UnitOfWork;

    /// Open a unit of work
    async fn begin(&self) -> Result<Self::UnitOfWork>;

    /// Unlocked wallet read
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet>;

    /// Unlocked read of the wallet owned by `user_id`
    async fn get_wallet_by_user(&self, user_id: Uuid) -> Result<Wallet>;

    /// User joined with its wallet
    async fn get_user_with_wallet(&self, user_id: Uuid) -> Result<UserWithWallet>;

    /// All entries of a wallet, newest first
    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>>;

    /// Health probe
    async fn ping(&self) -> Result<()>;
}

/// One store transaction.
///
/// Dropping a unit without committing discards its writes and releases
/// its locks.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read a wallet and hold its row lock until the unit ends
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Wallet>;

    /// Overwrite a wallet balance. A missing row is `WalletNotFound`.
    async fn update_balance(&mut self, wallet_id: Uuid, balance: Amount) -> Result<()>;

    /// Append an audit entry
    async fn append_entry(&mut self, entry: &TransactionEntry) -> Result<()>;

    /// Insert a new user
    async fn insert_user(&mut self, user: &User) -> Result<()>;

    /// Insert a new wallet. A second wallet for the same user is a `Conflict`.
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()>;

    /// Make all writes visible atomically and release locks
    async fn commit(self) -> Result<()>;

    /// Discard all writes and release locks
    async fn rollback(self) -> Result<()>;
}

/// Commit `tx` if `result` is Ok, otherwise roll it back and return the
/// original error.
///
/// Infrastructure failures during commit surface as `TransactionFailed`.
pub async fn finish<U: UnitOfWork, T>(tx: U, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(|err| match err.kind() {
                ErrorKind::Infrastructure => match err {
                    Error::TransactionFailed(_) => err,
                    other => Error::TransactionFailed(other.to_string()),
                },
                _ => err,
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            tracing::warn!(error = %err, code = err.code(), "Unit of work rolled back");
            Err(err)
        }
    }
}
