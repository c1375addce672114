//! Ledger Engine
//!
//! Deposits, withdrawals and transfers against a [`LedgerStore`]. Every
//! mutating operation has the same shape:
//!
//! 1. validate arguments (no store access yet)
//! 2. begin a unit of work
//! 3. lock-read the wallet rows involved
//! 4. compute new balances from the locked reads
//! 5. write balances and append entries
//! 6. commit, or roll back on any error
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Ledger, MemoryStore};
//! use rust_decimal::Decimal;
//! # use uuid::Uuid;
//!
//! # async fn run(wallet_id: Uuid) -> ledger_core::Result<()> {
//! let ledger = Ledger::new(MemoryStore::default());
//! let wallet = ledger.deposit(wallet_id, Decimal::new(10050, 2)).await?;
//! assert_eq!(wallet.balance, Decimal::new(10050, 2));
//! # Ok(())
//! # }
//! ```

use crate::{
    amount::{credit, to_money, validate_amount, Amount},
    metrics::Metrics,
    store::{finish, LedgerStore, UnitOfWork},
    types::{Reconciliation, TransactionEntry, TransactionKind, Wallet},
    Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger<S: LedgerStore> {
    store: Arc<S>,
    metrics: Option<Metrics>,
}

impl<S: LedgerStore> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: LedgerStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Ledger over `store`
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Ledger over a store shared with other components
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Record operation counts and latencies
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Credit `amount` to a wallet and return the updated wallet
    #[instrument(skip(self))]
    pub async fn deposit(&self, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
        let started = Instant::now();
        let result = self.run_deposit(wallet_id, amount).await;
        self.record("deposit", started, result.is_ok());
        result
    }

    /// Debit `amount` from a wallet and return the updated wallet
    #[instrument(skip(self))]
    pub async fn withdraw(&self, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
        let started = Instant::now();
        let result = self.run_withdraw(wallet_id, amount).await;
        self.record("withdraw", started, result.is_ok());
        result
    }

    /// Move `amount` between two wallets as one double entry
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
        amount: Amount,
        description: Option<String>,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self
            .run_transfer(from_wallet_id, to_wallet_id, amount, description)
            .await;
        self.record("transfer", started, result.is_ok());
        result
    }

    /// Current wallet snapshot (unlocked read)
    #[instrument(skip(self))]
    pub async fn get_balance(&self, wallet_id: Uuid) -> Result<Wallet> {
        let started = Instant::now();
        let result = self.store.get_wallet(wallet_id).await;
        self.record("get_balance", started, result.is_ok());
        result
    }

    /// Wallet entries, newest first
    #[instrument(skip(self))]
    pub async fn get_history(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>> {
        let started = Instant::now();
        let result = self.run_history(wallet_id).await;
        self.record("get_history", started, result.is_ok());
        result
    }

    /// The wallet owned by `user_id`
    #[instrument(skip(self))]
    pub async fn get_wallet_by_user(&self, user_id: Uuid) -> Result<Wallet> {
        self.store.get_wallet_by_user(user_id).await
    }

    /// Rebuild the balance from the wallet's entries and compare it with
    /// the stored balance.
    ///
    /// The wallet row is locked while reading so no entry can land between
    /// the two reads.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, wallet_id: Uuid) -> Result<Reconciliation> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let wallet = tx.lock_wallet(wallet_id).await?;
            let entries = self.store.list_entries(wallet_id).await?;
            let derived_balance = entries
                .iter()
                .try_fold(Decimal::ZERO, |sum, entry| sum.checked_add(entry.delta()))
                .ok_or_else(|| {
                    Error::Storage(format!("Derived balance of wallet {} overflows", wallet_id))
                })?;
            Ok::<_, Error>(Reconciliation {
                wallet_id,
                balance: wallet.balance,
                derived_balance,
                entry_count: entries.len(),
            })
        }
        .await;
        let report = finish(tx, result).await?;

        if !report.is_consistent() {
            tracing::error!(
                wallet_id = %wallet_id,
                balance = %report.balance,
                derived_balance = %report.derived_balance,
                "Wallet balance does not match its entries"
            );
        }
        Ok(report)
    }

    // Operation bodies

    async fn run_history(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>> {
        self.store.get_wallet(wallet_id).await?;
        self.store.list_entries(wallet_id).await
    }

    async fn run_deposit(&self, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
        validate_amount(amount)?;
        let amount = to_money(amount);

        let mut tx = self.store.begin().await?;
        let result = apply_deposit(&mut tx, wallet_id, amount).await;
        let wallet = finish(tx, result).await?;

        tracing::info!(
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %wallet.balance,
            "Deposit committed"
        );
        Ok(wallet)
    }

    async fn run_withdraw(&self, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
        validate_amount(amount)?;
        let amount = to_money(amount);

        let mut tx = self.store.begin().await?;
        let result = apply_withdraw(&mut tx, wallet_id, amount).await;
        let wallet = finish(tx, result).await?;

        tracing::info!(
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %wallet.balance,
            "Withdrawal committed"
        );
        Ok(wallet)
    }

    async fn run_transfer(
        &self,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
        amount: Amount,
        description: Option<String>,
    ) -> Result<()> {
        if from_wallet_id == to_wallet_id {
            return Err(Error::SameWalletTransfer);
        }
        validate_amount(amount)?;
        let amount = to_money(amount);
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let mut tx = self.store.begin().await?;
        let result = apply_transfer(
            &mut tx,
            from_wallet_id,
            to_wallet_id,
            amount,
            description,
        )
        .await;
        let reference_id = finish(tx, result).await?;

        tracing::info!(
            from_wallet_id = %from_wallet_id,
            to_wallet_id = %to_wallet_id,
            amount = %amount,
            reference_id = %reference_id,
            "Transfer committed"
        );
        Ok(())
    }

    fn record(&self, operation: &str, started: Instant, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, success, started.elapsed().as_secs_f64());
        }
    }
}

async fn apply_deposit<U: UnitOfWork>(tx: &mut U, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
    let mut wallet = tx.lock_wallet(wallet_id).await?;
    wallet.balance = credit(wallet.balance, amount)?;

    tx.update_balance(wallet_id, wallet.balance).await?;
    tx.append_entry(&TransactionEntry::new(
        wallet_id,
        TransactionKind::Deposit,
        amount,
        None,
        None,
    ))
    .await?;

    Ok(wallet)
}

async fn apply_withdraw<U: UnitOfWork>(tx: &mut U, wallet_id: Uuid, amount: Amount) -> Result<Wallet> {
    // Balance check must use the locked read
    let mut wallet = tx.lock_wallet(wallet_id).await?;
    if wallet.balance < amount {
        return Err(Error::InsufficientFunds {
            required: amount,
            available: wallet.balance,
        });
    }
    wallet.balance -= amount;

    tx.update_balance(wallet_id, wallet.balance).await?;
    tx.append_entry(&TransactionEntry::new(
        wallet_id,
        TransactionKind::Withdraw,
        amount,
        None,
        None,
    ))
    .await?;

    Ok(wallet)
}

/// Returns the reference id shared by both legs
async fn apply_transfer<U: UnitOfWork>(
    tx: &mut U,
    from_wallet_id: Uuid,
    to_wallet_id: Uuid,
    amount: Amount,
    description: Option<String>,
) -> Result<Uuid> {
    // Lock in ascending id order so opposite transfers cannot deadlock
    let (first, second) = if from_wallet_id < to_wallet_id {
        (from_wallet_id, to_wallet_id)
    } else {
        (to_wallet_id, from_wallet_id)
    };
    let first = tx.lock_wallet(first).await?;
    let second = tx.lock_wallet(second).await?;
    let (mut source, mut destination) = if first.id == from_wallet_id {
        (first, second)
    } else {
        (second, first)
    };

    if source.balance < amount {
        return Err(Error::InsufficientFunds {
            required: amount,
            available: source.balance,
        });
    }
    destination.balance = credit(destination.balance, amount)?;
    source.balance -= amount;

    tx.update_balance(source.id, source.balance).await?;
    tx.update_balance(destination.id, destination.balance).await?;

    let reference_id = Uuid::now_v7();
    tx.append_entry(&TransactionEntry::new(
        source.id,
        TransactionKind::TransferOut,
        amount,
        Some(reference_id),
        description.clone(),
    ))
    .await?;
    tx.append_entry(&TransactionEntry::new(
        destination.id,
        TransactionKind::TransferIn,
        amount,
        Some(reference_id),
        description,
    ))
    .await?;

    Ok(reference_id)
}
