//! User and wallet provisioning
//!
//! A user and its single wallet are created in one unit of work: either
//! both rows exist afterwards or neither does.

use crate::{
    store::{finish, LedgerStore, UnitOfWork},
    types::{User, UserWithWallet, Wallet},
    Error, Result,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Longest accepted user name (characters)
pub const MAX_NAME_LENGTH: usize = 255;

/// Creates users together with their wallets
pub struct Provisioner<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> Clone for Provisioner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> std::fmt::Debug for Provisioner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").finish_non_exhaustive()
    }
}

impl<S: LedgerStore> Provisioner<S> {
    /// Provisioner over `store`
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Provisioner over a store shared with the ledger
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a user named `name` and a zero-balance wallet for it
    #[instrument(skip(self))]
    pub async fn create_user_with_wallet(&self, name: &str) -> Result<UserWithWallet> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }

        let user = User::new(name);
        let wallet = Wallet::new(user.id);

        let mut tx = self.store.begin().await?;
        let result = insert_both(&mut tx, &user, &wallet).await;
        finish(tx, result).await?;

        tracing::info!(user_id = %user.id, wallet_id = %wallet.id, "User and wallet created");

        Ok(UserWithWallet::new(user, wallet))
    }

    /// A user with its wallet
    #[instrument(skip(self))]
    pub async fn get_user_with_wallet(&self, user_id: Uuid) -> Result<UserWithWallet> {
        self.store.get_user_with_wallet(user_id).await
    }
}

async fn insert_both<U: UnitOfWork>(tx: &mut U, user: &User, wallet: &Wallet) -> Result<()> {
    tx.insert_user(user).await?;
    tx.insert_wallet(wallet).await
}
