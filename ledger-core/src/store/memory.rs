//! In-memory Ledger Store
//!
//! Committed state lives behind one `RwLock`. A unit of work keeps its
//! writes in a private overlay and applies them under the write lock at
//! commit, so readers never see half of a unit.

use super::locks::{HeldLocks, RowLocks};
use super::{LedgerStore, UnitOfWork};
use crate::amount::Amount;
use crate::error::{Error, Result};
use crate::types::{TransactionEntry, User, UserWithWallet, Wallet};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, User>,
    wallets: HashMap<Uuid, Wallet>,
    wallet_by_user: HashMap<Uuid, Uuid>,
    /// Entries per wallet in commit order
    entries: HashMap<Uuid, Vec<TransactionEntry>>,
}

/// In-memory store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    locks: RowLocks,
}

impl MemoryStore {
    /// Empty store with the given lock-wait timeout
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locks: RowLocks::new(lock_timeout),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type UnitOfWork = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            state: Arc::clone(&self.state),
            locks: self.locks.clone(),
            held: HeldLocks::default(),
            pending: Pending::default(),
        })
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.state
            .read()
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn get_wallet_by_user(&self, user_id: Uuid) -> Result<Wallet> {
        let state = self.state.read();
        state
            .wallet_by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
            .cloned()
            .ok_or(Error::UserNotFound(user_id))
    }

    async fn get_user_with_wallet(&self, user_id: Uuid) -> Result<UserWithWallet> {
        let state = self.state.read();
        let user = state
            .users
            .get(&user_id)
            .cloned()
            .ok_or(Error::UserNotFound(user_id))?;
        let wallet = state
            .wallet_by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
            .cloned()
            .ok_or(Error::UserNotFound(user_id))?;
        Ok(UserWithWallet::new(user, wallet))
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>> {
        let state = self.state.read();
        Ok(state
            .entries
            .get(&wallet_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Pending {
    users: HashMap<Uuid, User>,
    wallets: HashMap<Uuid, Wallet>,
    balances: HashMap<Uuid, Amount>,
    entries: Vec<TransactionEntry>,
}

/// Unit of work over a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryUnit {
    state: Arc<RwLock<State>>,
    locks: RowLocks,
    held: HeldLocks,
    pending: Pending,
}

impl MemoryUnit {
    /// Wallet as seen by this unit (committed state plus own writes)
    fn visible_wallet(&self, wallet_id: Uuid) -> Option<Wallet> {
        let mut wallet = match self.pending.wallets.get(&wallet_id) {
            Some(wallet) => wallet.clone(),
            None => self.state.read().wallets.get(&wallet_id)?.clone(),
        };
        if let Some(balance) = self.pending.balances.get(&wallet_id) {
            wallet.balance = *balance;
        }
        Some(wallet)
    }

    fn user_exists(&self, user_id: Uuid) -> bool {
        self.pending.users.contains_key(&user_id) || self.state.read().users.contains_key(&user_id)
    }

    fn user_has_wallet(&self, user_id: Uuid) -> bool {
        self.pending.wallets.values().any(|w| w.user_id == user_id)
            || self.state.read().wallet_by_user.contains_key(&user_id)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Wallet> {
        self.held.lock(&self.locks, wallet_id).await?;
        self.visible_wallet(wallet_id)
            .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn update_balance(&mut self, wallet_id: Uuid, balance: Amount) -> Result<()> {
        if self.visible_wallet(wallet_id).is_none() {
            return Err(Error::WalletNotFound(wallet_id));
        }
        self.pending.balances.insert(wallet_id, balance);
        Ok(())
    }

    async fn append_entry(&mut self, entry: &TransactionEntry) -> Result<()> {
        if self.visible_wallet(entry.wallet_id).is_none() {
            return Err(Error::WalletNotFound(entry.wallet_id));
        }
        self.pending.entries.push(entry.clone());
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.user_exists(user.id) {
            return Err(Error::Conflict(format!("User {} already exists", user.id)));
        }
        self.pending.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        if !self.user_exists(wallet.user_id) {
            return Err(Error::UserNotFound(wallet.user_id));
        }
        if self.user_has_wallet(wallet.user_id) || self.visible_wallet(wallet.id).is_some() {
            return Err(Error::Conflict(format!(
                "User {} already has a wallet",
                wallet.user_id
            )));
        }
        self.pending.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.state.write();

        // Inserts are re-checked under the write lock; another unit may
        // have committed the same user since our insert call.
        for user in pending.users.values() {
            if state.users.contains_key(&user.id) {
                return Err(Error::Conflict(format!("User {} already exists", user.id)));
            }
        }
        for wallet in pending.wallets.values() {
            if state.wallet_by_user.contains_key(&wallet.user_id) {
                return Err(Error::Conflict(format!(
                    "User {} already has a wallet",
                    wallet.user_id
                )));
            }
        }

        state.users.extend(pending.users);
        for (id, wallet) in pending.wallets {
            state.wallet_by_user.insert(wallet.user_id, id);
            state.wallets.insert(id, wallet);
        }
        for (id, balance) in pending.balances {
            if let Some(wallet) = state.wallets.get_mut(&id) {
                wallet.balance = balance;
            }
        }
        for entry in pending.entries {
            state.entries.entry(entry.wallet_id).or_default().push(entry);
        }

        drop(state);
        self.held.release();
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.pending = Pending::default();
        self.held.release();
        Ok(())
    }
}
