//! Ledger Store on PostgreSQL
//!
//! A unit of work is a database transaction. Locked reads use
//! `SELECT ... FOR UPDATE` and lock waits are bounded per transaction
//! with `SET LOCAL lock_timeout`.

use super::{LedgerStore, UnitOfWork};
use crate::amount::Amount;
use crate::error::{Error, Result};
use crate::types::{TransactionEntry, User, UserWithWallet, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance: Amount,
    created_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            id: row.id,
            user_id: row.user_id,
            balance: row.balance,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    wallet_id: Uuid,
    #[sqlx(rename = "type")]
    kind: String,
    amount: Amount,
    reference_id: Option<Uuid>,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for TransactionEntry {
    type Error = Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(TransactionEntry {
            id: row.id,
            wallet_id: row.wallet_id,
            kind: row.kind.parse()?,
            amount: row.amount,
            reference_id: row.reference_id,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserWalletRow {
    user_id: Uuid,
    name: String,
    user_created_at: DateTime<Utc>,
    wallet_id: Uuid,
    balance: Amount,
    wallet_created_at: DateTime<Utc>,
}

/// Ledger Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Connect a pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");

        Ok(Self::from_pool(pool, lock_timeout))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Create tables and indexes if missing
    pub async fn migrate(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await?;
        tracing::info!("Ledger schema applied");
        Ok(())
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map driver errors that carry ledger meaning
fn map_db_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return Error::Conflict(db_err.message().to_string()),
            Some(NUMERIC_VALUE_OUT_OF_RANGE) => {
                return Error::InvalidAmount(format!("Out of range: {}", db_err.message()))
            }
            Some(LOCK_NOT_AVAILABLE) => {
                return Error::TransactionFailed(format!("Lock wait timed out: {}", db_err.message()))
            }
            _ => {}
        }
    }
    Error::Database(err)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

#[async_trait]
impl LedgerStore for PostgresStore {
    type UnitOfWork = PostgresUnit;

    async fn begin(&self) -> Result<PostgresUnit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::TransactionFailed(format!("Failed to begin transaction: {}", e)))?;

        // SET does not accept bind parameters
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        Ok(PostgresUnit { tx })
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, created_at FROM wallets WHERE id = $1",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Wallet::from)
        .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn get_wallet_by_user(&self, user_id: Uuid) -> Result<Wallet> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, created_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Wallet::from)
        .ok_or(Error::UserNotFound(user_id))
    }

    async fn get_user_with_wallet(&self, user_id: Uuid) -> Result<UserWithWallet> {
        let row = sqlx::query_as::<_, UserWalletRow>(
            r#"
            SELECT u.id AS user_id, u.name, u.created_at AS user_created_at,
                   w.id AS wallet_id, w.balance, w.created_at AS wallet_created_at
            FROM users u
            JOIN wallets w ON w.user_id = u.id
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::UserNotFound(user_id))?;

        Ok(UserWithWallet {
            id: row.user_id,
            name: row.name,
            wallet: Wallet {
                id: row.wallet_id,
                user_id: row.user_id,
                balance: row.balance,
                created_at: row.wallet_created_at,
            },
            created_at: row.user_created_at,
        })
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, wallet_id, type, amount, reference_id, description, created_at
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionEntry::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Unit of work over a [`PostgresStore`]
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUnit").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Wallet> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, created_at FROM wallets WHERE id = $1 FOR UPDATE",
        )
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?
        .map(Wallet::from)
        .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn update_balance(&mut self, wallet_id: Uuid, balance: Amount) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(wallet_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::WalletNotFound(wallet_id));
        }
        Ok(())
    }

    async fn append_entry(&mut self, entry: &TransactionEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, wallet_id, type, amount, reference_id, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.wallet_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.reference_id)
        .bind(entry.description.as_deref())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::WalletNotFound(entry.wallet_id)
            } else {
                map_db_error(e)
            }
        })?;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.name)
            .bind(user.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallets (id, user_id, balance, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::UserNotFound(wallet.user_id)
            } else {
                map_db_error(e)
            }
        })?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::TransactionFailed(format!("Commit failed: {}", e)))
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(Error::from)
    }
}
