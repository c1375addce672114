//! Wallet Ledger Core
//!
//! Transactional money ledger: users own exactly one wallet, wallets hold a
//! non-negative balance, and every balance change is recorded as an
//! immutable transaction entry.
//!
//! # Architecture
//!
//! - **Ledger Engine**: deposit, withdraw and transfer inside one store unit of work
//! - **Ledger Store**: locked reads and atomic commits (memory, RocksDB, PostgreSQL)
//! - **Idempotency Cache**: replays the first successful response for a retried request
//! - **Provisioner**: creates a user and its wallet atomically
//!
//! # Invariants
//!
//! - Reconstructible: balance == Σ(deposit + transfer_in) − Σ(withdraw + transfer_out)
//! - Non-negative: no committed balance is below zero
//! - Atomic: a balance write and its entries commit together or not at all
//! - Double entry: a transfer is two entries sharing one reference id

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod amount;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod metrics;
pub mod provisioner;
pub mod store;
pub mod types;

// Re-exports
pub use amount::{credit, validate_amount, Amount, MAX_AMOUNT, MONEY_SCALE};
pub use config::{Backend, Config};
pub use error::{Error, ErrorKind, Result};
pub use idempotency::{CachedResponse, IdempotencyCache, IdempotencyConfig};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use provisioner::Provisioner;
pub use store::{LedgerStore, MemoryStore, PostgresStore, RocksStore, UnitOfWork};
pub use types::{Reconciliation, TransactionEntry, TransactionKind, User, UserWithWallet, Wallet};
