use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use poolgate_account::AccountPool;
use poolgate_store::{AccountRef, CreditsProbe, HealthStore};

/// Periodic health/usage probe over every pooled account.
///
/// Accounts are processed in small fixed-size batches with a pause between
/// batches, deliberately rate-limiting concurrent upstream probing instead
/// of firing everything at once.
pub struct UsageSweep {
    pool: Arc<AccountPool>,
    health: Arc<HealthStore>,
    batch_size: usize,
    batch_pause: Duration,
}

impl UsageSweep {
    pub fn new(
        pool: Arc<AccountPool>,
        health: Arc<HealthStore>,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            pool,
            health,
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    pub async fn run_once(&self) {
        let refs = self.pool.account_refs();
        info!(accounts = refs.len(), "starting usage sweep");
        let batches: Vec<&[AccountRef]> = refs.chunks(self.batch_size).collect();
        let last = batches.len().saturating_sub(1);
        for (index, batch) in batches.into_iter().enumerate() {
            join_all(batch.iter().map(|account| self.probe_one(account))).await;
            if index < last {
                tokio::time::sleep(self.batch_pause).await;
            }
        }
        info!("usage sweep finished");
    }

    pub async fn run(&self, interval: Duration) {
        loop {
            self.run_once().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn probe_one(&self, account: &AccountRef) {
        if let Err(err) = self
            .health
            .ensure_initialized(account.tier, account.idx, account.tier.known_models())
            .await
        {
            warn!(account = %account.id, %err, "health init failed during sweep");
            return;
        }
        match self.health.try_reactivate(account.tier, account.idx).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(account = %account.id, "account not usable; skipping probe");
                return;
            }
            Err(err) => {
                warn!(account = %account.id, %err, "reactivation check failed");
                return;
            }
        }

        let Some(credits) = self
            .pool
            .remaining_credits(account.tier, account.idx)
            .await
        else {
            debug!(account = %account.id, "credits probe unavailable");
            return;
        };
        if credits <= 0 {
            let now = SystemTime::now();
            for model in account.tier.known_models() {
                if let Err(err) = self
                    .health
                    .mark_limited(account.tier, account.idx, model, now)
                    .await
                {
                    warn!(account = %account.id, model, %err, "failed to mark account limited");
                }
            }
            return;
        }
        if let Err(err) = self
            .health
            .set_usage(account.tier, account.idx, credits)
            .await
        {
            warn!(account = %account.id, %err, "failed to record probed usage");
        }
    }
}
