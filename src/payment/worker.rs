//! Reconciliation Worker
//!
//! Background worker that settles transactions left `pending` by a lost
//! rail response, a crashed process or a missed webhook.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::orchestrator::{EXPIRED_REASON, PaymentOrchestrator};
use super::PaymentError;
use crate::ledger::{Transaction, TransactionKind};
use crate::profiles::ProfileService;
use crate::store::StoreError;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale transactions
    pub scan_interval: Duration,
    /// How long a transaction must sit in `pending` to be considered stale
    pub stale_threshold: Duration,
    /// Maximum transactions to process per scan
    pub batch_size: usize,
    /// Pending rows the rail has never heard of are failed after this long
    pub expire_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
            expire_after: Duration::from_secs(24 * 3600),
        }
    }
}

pub struct ReconciliationWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    profiles: Arc<ProfileService>,
    config: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        profiles: Arc<ProfileService>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            profiles,
            config,
        }
    }

    pub fn with_defaults(
        orchestrator: Arc<PaymentOrchestrator>,
        profiles: Arc<ProfileService>,
    ) -> Self {
        Self::new(orchestrator, profiles, WorkerConfig::default())
    }

    /// Run the worker loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            expire_after_secs = self.config.expire_after.as_secs(),
            "Starting reconciliation worker"
        );

        loop {
            if let Err(e) = self.scan_and_reconcile().await {
                error!(error = %e, "Reconciliation scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan; returns how many transactions reached a terminal state
    pub async fn scan_and_reconcile(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let older_than = ago(now, self.config.stale_threshold);
        let expire_before = ago(now, self.config.expire_after);

        let stale = self
            .orchestrator
            .ledger()
            .stale_pending(older_than, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale transactions found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale transactions to reconcile");

        let mut settled = 0;
        for tx in &stale {
            if tx.kind == TransactionKind::Payout {
                if self.reconcile_payout(tx, expire_before).await {
                    settled += 1;
                }
                continue;
            }

            match self.orchestrator.confirm(tx.id).await {
                Ok(receipt) if receipt.status.is_terminal() => {
                    info!(
                        transaction_id = %tx.id,
                        status = %receipt.status,
                        "Stale transaction settled"
                    );
                    settled += 1;
                }
                Ok(receipt) if receipt.intent_status.is_none() && tx.created_at < expire_before => {
                    match self.orchestrator.fail_attempt(tx, EXPIRED_REASON, None).await {
                        Ok(true) => {
                            info!(transaction_id = %tx.id, "Expired transaction with no rail trace");
                            settled += 1;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            error!(transaction_id = %tx.id, error = %e, "Failed to expire transaction")
                        }
                    }
                }
                Ok(receipt) => {
                    debug!(
                        transaction_id = %tx.id,
                        intent_status = ?receipt.intent_status,
                        "Transaction still pending on rail"
                    );
                }
                Err(PaymentError::ExternalRailRejected { code, .. }) => {
                    info!(transaction_id = %tx.id, code = %code, "Stale transaction failed on rail");
                    settled += 1;
                }
                Err(PaymentError::UnknownOutcome { detail, .. }) => {
                    warn!(transaction_id = %tx.id, detail = %detail, "Rail unreachable, will retry");
                }
                Err(e) => {
                    error!(transaction_id = %tx.id, error = %e, "Failed to reconcile transaction");
                }
            }
        }

        if settled > 0 {
            info!(count = settled, "Settled transactions this scan");
        }

        Ok(settled)
    }

    /// True when the payout row reached a terminal state
    async fn reconcile_payout(&self, tx: &Transaction, expire_before: DateTime<Utc>) -> bool {
        match self.profiles.reconcile_payout(tx, expire_before).await {
            Ok(status) if status.is_terminal() => {
                info!(transaction_id = %tx.id, status = %status, "Stale payout settled");
                true
            }
            Ok(_) => {
                debug!(transaction_id = %tx.id, "Payout still pending on rail");
                false
            }
            Err(e) if e.is_retryable() => {
                warn!(transaction_id = %tx.id, error = %e, "Payout lookup failed, will retry");
                false
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "Failed to reconcile payout");
                false
            }
        }
    }
}

/// `now - d`, saturating at the earliest representable instant
pub(crate) fn ago(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.expire_after, Duration::from_secs(86_400));
    }

    #[test]
    fn test_ago_saturates() {
        let now = Utc::now();
        assert_eq!(ago(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            ago(now, Duration::from_secs(5)),
            now - chrono::Duration::seconds(5)
        );
    }
}
