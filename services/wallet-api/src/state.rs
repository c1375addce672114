use crate::settings::AppEnvironment;
use ledger_core::{IdempotencyCache, IdempotencyConfig, Ledger, LedgerStore, Metrics, Provisioner};
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Debug)]
pub struct AppState<S: LedgerStore> {
    pub ledger: Ledger<S>,
    pub provisioner: Provisioner<S>,
    pub idempotency: IdempotencyCache,
    pub metrics: Metrics,
    pub environment: AppEnvironment,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(
        store: S,
        idempotency: IdempotencyConfig,
        environment: AppEnvironment,
    ) -> anyhow::Result<Self> {
        let metrics = Metrics::new()?;
        let store = Arc::new(store);

        Ok(Self {
            ledger: Ledger::from_shared(Arc::clone(&store)).with_metrics(metrics.clone()),
            provisioner: Provisioner::from_shared(store),
            idempotency: IdempotencyCache::new(idempotency).with_metrics(metrics.clone()),
            metrics,
            environment,
        })
    }
}
