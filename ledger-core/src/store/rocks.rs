//! Ledger Store on RocksDB
//!
//! # Column Families
//!
//! - `users` - Users (key: user_id)
//! - `wallets` - Wallets with current balance (key: wallet_id)
//! - `user_wallets` - Owner index (key: user_id, value: wallet_id)
//! - `entries` - Append-only transaction entries
//!   (key: wallet_id || created_at_nanos_be || entry_id)
//!
//! A unit of work buffers its puts and writes them with one atomic
//! `WriteBatch` at commit. Row locks come from the shared [`RowLocks`]
//! table.

use super::locks::{HeldLocks, RowLocks};
use super::{LedgerStore, UnitOfWork};
use crate::amount::Amount;
use crate::config::RocksDBConfig;
use crate::error::{Error, Result};
use crate::types::{TransactionEntry, User, UserWithWallet, Wallet};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, DBCompressionType,
    Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Column family names
const CF_USERS: &str = "users";
const CF_WALLETS: &str = "wallets";
const CF_USER_WALLETS: &str = "user_wallets";
const CF_ENTRIES: &str = "entries";

/// Ledger Store backed by RocksDB
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    locks: RowLocks,
    /// Serializes commits that insert users or wallets
    insert_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("locks", &self.locks)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(
        path: impl AsRef<Path>,
        tuning: &RocksDBConfig,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(tuning.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(tuning.max_write_buffer_number);
        db_opts.set_max_background_jobs(tuning.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if tuning.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_USER_WALLETS, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db: Arc::new(db),
            locks: RowLocks::new(lock_timeout),
            insert_lock: Arc::new(Mutex::new(())),
        })
    }

    // Column family options

    fn cf_options_lookup() -> Options {
        let mut opts = Options::default();
        // Point lookups dominate, use LZ4 and bloom filters
        opts.set_compression_type(DBCompressionType::Lz4);
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        // Append-only and rarely read, compress hard
        opts.set_compression_type(DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        cf_handle(&self.db, name)
    }

    fn read_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        read_value(&self.db, CF_WALLETS, wallet_id.as_bytes())
    }

    fn wallet_id_for_user(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_USER_WALLETS)?;
        match self.db.get_cf(cf, user_id.as_bytes())? {
            Some(bytes) => {
                let id = Uuid::from_slice(&bytes)
                    .map_err(|e| Error::Storage(format!("Corrupt owner index: {}", e)))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Entry key: wallet_id || created_at nanos (big endian) || entry_id
    fn entry_key(entry: &TransactionEntry) -> Vec<u8> {
        let nanos = entry.created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(entry.wallet_id.as_bytes());
        key.extend_from_slice(&(nanos as u64).to_be_bytes());
        key.extend_from_slice(entry.id.as_bytes());
        key
    }
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
}

fn read_value<T: serde::de::DeserializeOwned>(db: &DB, cf: &str, key: &[u8]) -> Result<Option<T>> {
    let cf = cf_handle(db, cf)?;
    match db.get_cf(cf, key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    type UnitOfWork = RocksUnit;

    async fn begin(&self) -> Result<RocksUnit> {
        Ok(RocksUnit {
            db: Arc::clone(&self.db),
            locks: self.locks.clone(),
            insert_lock: Arc::clone(&self.insert_lock),
            held: HeldLocks::default(),
            puts: Vec::new(),
            wallets: HashMap::new(),
            new_users: HashSet::new(),
            new_owners: HashSet::new(),
        })
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.read_wallet(wallet_id)?
            .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn get_wallet_by_user(&self, user_id: Uuid) -> Result<Wallet> {
        let wallet_id = self
            .wallet_id_for_user(user_id)?
            .ok_or(Error::UserNotFound(user_id))?;
        self.get_wallet(wallet_id).await
    }

    async fn get_user_with_wallet(&self, user_id: Uuid) -> Result<UserWithWallet> {
        let user: User = read_value(&self.db, CF_USERS, user_id.as_bytes())?
            .ok_or(Error::UserNotFound(user_id))?;
        let wallet = self.get_wallet_by_user(user_id).await?;
        Ok(UserWithWallet::new(user, wallet))
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<TransactionEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = wallet_id.as_bytes();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push(bincode::deserialize::<TransactionEntry>(&value)?);
        }

        // Keys sort oldest first
        entries.reverse();
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        self.cf_handle(CF_WALLETS)?;
        self.db
            .property_int_value("rocksdb.estimate-num-keys")
            .map(|_| ())
            .map_err(Error::from)
    }
}

/// Unit of work over a [`RocksStore`]
pub struct RocksUnit {
    db: Arc<DB>,
    locks: RowLocks,
    insert_lock: Arc<Mutex<()>>,
    held: HeldLocks,
    /// Buffered writes: (column family, key, value)
    puts: Vec<(&'static str, Vec<u8>, Vec<u8>)>,
    /// Wallets written by this unit
    wallets: HashMap<Uuid, Wallet>,
    new_users: HashSet<Uuid>,
    new_owners: HashSet<Uuid>,
}

impl std::fmt::Debug for RocksUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksUnit")
            .field("pending_writes", &self.puts.len())
            .field("held", &self.held)
            .finish()
    }
}

impl RocksUnit {
    fn visible_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        if let Some(wallet) = self.wallets.get(&wallet_id) {
            return Ok(Some(wallet.clone()));
        }
        read_value(&self.db, CF_WALLETS, wallet_id.as_bytes())
    }

    fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        if self.new_users.contains(&user_id) {
            return Ok(true);
        }
        let cf = cf_handle(&self.db, CF_USERS)?;
        Ok(self.db.get_cf(cf, user_id.as_bytes())?.is_some())
    }

    fn owner_taken(&self, user_id: Uuid) -> Result<bool> {
        if self.new_owners.contains(&user_id) {
            return Ok(true);
        }
        let cf = cf_handle(&self.db, CF_USER_WALLETS)?;
        Ok(self.db.get_cf(cf, user_id.as_bytes())?.is_some())
    }

    fn put_wallet(&mut self, wallet: Wallet) -> Result<()> {
        let value = bincode::serialize(&wallet)?;
        self.puts
            .push((CF_WALLETS, wallet.id.as_bytes().to_vec(), value));
        self.wallets.insert(wallet.id, wallet);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for RocksUnit {
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> Result<Wallet> {
        self.held.lock(&self.locks, wallet_id).await?;
        self.visible_wallet(wallet_id)?
            .ok_or(Error::WalletNotFound(wallet_id))
    }

    async fn update_balance(&mut self, wallet_id: Uuid, balance: Amount) -> Result<()> {
        let mut wallet = self
            .visible_wallet(wallet_id)?
            .ok_or(Error::WalletNotFound(wallet_id))?;
        wallet.balance = balance;
        self.put_wallet(wallet)
    }

    async fn append_entry(&mut self, entry: &TransactionEntry) -> Result<()> {
        if self.visible_wallet(entry.wallet_id)?.is_none() {
            return Err(Error::WalletNotFound(entry.wallet_id));
        }
        let value = bincode::serialize(entry)?;
        self.puts
            .push((CF_ENTRIES, RocksStore::entry_key(entry), value));
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.user_exists(user.id)? {
            return Err(Error::Conflict(format!("User {} already exists", user.id)));
        }
        let value = bincode::serialize(user)?;
        self.puts.push((CF_USERS, user.id.as_bytes().to_vec(), value));
        self.new_users.insert(user.id);
        Ok(())
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        if !self.user_exists(wallet.user_id)? {
            return Err(Error::UserNotFound(wallet.user_id));
        }
        if self.owner_taken(wallet.user_id)? || self.visible_wallet(wallet.id)?.is_some() {
            return Err(Error::Conflict(format!(
                "User {} already has a wallet",
                wallet.user_id
            )));
        }
        self.puts.push((
            CF_USER_WALLETS,
            wallet.user_id.as_bytes().to_vec(),
            wallet.id.as_bytes().to_vec(),
        ));
        self.new_owners.insert(wallet.user_id);
        self.put_wallet(wallet.clone())
    }

    async fn commit(mut self) -> Result<()> {
        let inserts = !self.new_users.is_empty() || !self.new_owners.is_empty();
        let _insert_guard = if inserts {
            Some(self.insert_lock.lock())
        } else {
            None
        };

        if inserts {
            let users = cf_handle(&self.db, CF_USERS)?;
            for id in &self.new_users {
                if self.db.get_cf(users, id.as_bytes())?.is_some() {
                    return Err(Error::Conflict(format!("User {} already exists", id)));
                }
            }
            let owners = cf_handle(&self.db, CF_USER_WALLETS)?;
            for id in &self.new_owners {
                if self.db.get_cf(owners, id.as_bytes())?.is_some() {
                    return Err(Error::Conflict(format!("User {} already has a wallet", id)));
                }
            }
        }

        let mut batch = WriteBatch::default();
        for (cf_name, key, value) in &self.puts {
            let cf = cf_handle(&self.db, cf_name)?;
            batch.put_cf(cf, key, value);
        }

        self.db
            .write(batch)
            .map_err(|e| Error::TransactionFailed(format!("RocksDB write failed: {}", e)))?;

        tracing::debug!(writes = self.puts.len(), "Unit of work committed");

        self.held.release();
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.puts.clear();
        self.held.release();
        Ok(())
    }
}
