//! Wallet row locks for the embedded backends

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Shared lock table keyed by wallet id.
///
/// Entries are created on first use and dropped again once no unit holds
/// or waits for them, so the table only tracks wallets in contention.
#[derive(Debug, Clone)]
pub struct RowLocks {
    table: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl RowLocks {
    /// Lock table whose waits give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Wait for the lock on `id`
    pub async fn acquire(&self, id: Uuid) -> Result<RowGuard> {
        let mutex = self
            .table
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(RowGuard {
                guard: Some(guard),
                table: Arc::clone(&self.table),
                id,
            }),
            Err(_) => {
                prune(&self.table, &id);
                tracing::warn!(wallet_id = %id, timeout_ms = self.timeout.as_millis() as u64, "Lock wait timed out");
                Err(Error::TransactionFailed(format!(
                    "Timed out waiting for lock on wallet {}",
                    id
                )))
            }
        }
    }

    /// Number of ids currently held or waited on
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if no id is held or waited on
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Drop the entry for `id` when the table holds the only reference
fn prune(table: &DashMap<Uuid, Arc<Mutex<()>>>, id: &Uuid) {
    table.remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Exclusive hold on one wallet row. Dropping it unlocks the row and
/// prunes the table entry if nobody else is waiting.
#[derive(Debug)]
pub struct RowGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    id: Uuid,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.table, &self.id);
    }
}

/// Locks held by one unit of work. Dropping releases them all.
#[derive(Debug, Default)]
pub struct HeldLocks {
    guards: HashMap<Uuid, RowGuard>,
}

impl HeldLocks {
    /// Take the lock on `id` unless already held
    pub async fn lock(&mut self, table: &RowLocks, id: Uuid) -> Result<()> {
        if self.guards.contains_key(&id) {
            return Ok(());
        }
        let guard = table.acquire(id).await?;
        self.guards.insert(id, guard);
        Ok(())
    }

    /// Is `id` held by this unit?
    pub fn holds(&self, id: &Uuid) -> bool {
        self.guards.contains_key(id)
    }

    /// Release everything
    pub fn release(&mut self) {
        self.guards.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relock_same_id_does_not_block() {
        let table = RowLocks::new(Duration::from_millis(100));
        let id = Uuid::now_v7();
        let mut held = HeldLocks::default();

        held.lock(&table, id).await.unwrap();
        held.lock(&table, id).await.unwrap();
        assert!(held.holds(&id));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let table = RowLocks::new(Duration::from_millis(50));
        let id = Uuid::now_v7();

        let mut first = HeldLocks::default();
        first.lock(&table, id).await.unwrap();

        let mut second = HeldLocks::default();
        let err = second.lock(&table, id).await.unwrap_err();
        assert!(matches!(err, Error::TransactionFailed(_)));

        first.release();
        second.lock(&table, id).await.unwrap();
        assert!(second.holds(&id));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_locks() {
        let table = RowLocks::new(Duration::from_millis(50));
        let id = Uuid::now_v7();

        {
            let mut held = HeldLocks::default();
            held.lock(&table, id).await.unwrap();
        }

        assert!(table.is_empty());

        let mut again = HeldLocks::default();
        again.lock(&table, id).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let table = RowLocks::new(Duration::from_millis(50));

        for _ in 0..1_000 {
            let mut held = HeldLocks::default();
            held.lock(&table, Uuid::now_v7()).await.unwrap();
        }

        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_pending() {
        let table = RowLocks::new(Duration::from_secs(5));
        let id = Uuid::now_v7();

        let mut first = HeldLocks::default();
        first.lock(&table, id).await.unwrap();

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let mut held = HeldLocks::default();
                held.lock(&table, id).await.unwrap();
                held
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.release();
        let second = waiter.await.unwrap();
        assert!(second.holds(&id));
        assert_eq!(table.len(), 1);

        drop(second);
        assert!(table.is_empty());
    }
}
