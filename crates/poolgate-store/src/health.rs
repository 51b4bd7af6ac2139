use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use poolgate_common::Tier;

use crate::kv::{SharedKeyValue, StoreError};

/// Health state of one pooled account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Error,
    Busy,
    /// Some, but not all, tracked models are cooling down.
    PartCd,
    /// Cooling down; leaves only when every tracked model's window elapsed.
    Cd,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Error => "error",
            AccountStatus::Busy => "busy",
            AccountStatus::PartCd => "part_cd",
            AccountStatus::Cd => "cd",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "error" => Ok(AccountStatus::Error),
            "busy" => Ok(AccountStatus::Busy),
            "part_cd" => Ok(AccountStatus::PartCd),
            "cd" => Ok(AccountStatus::Cd),
            _ => Err(()),
        }
    }
}

/// Identity of one pooled account as the health store sees it.
#[derive(Debug, Clone)]
pub struct AccountRef {
    pub id: String,
    pub tier: Tier,
    pub idx: usize,
}

/// Row returned by [`HealthStore::snapshot_all`]. The tier is reported under
/// its external name ("normal" for basic).
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatusView {
    pub id: String,
    #[serde(rename = "type")]
    pub tier: String,
    pub idx: usize,
    pub usage: i64,
    pub status: AccountStatus,
}

/// Live "remaining credits" probe used to backfill usage counters.
#[async_trait]
pub trait CreditsProbe: Send + Sync {
    /// `None` when the account cannot be probed right now.
    async fn remaining_credits(&self, tier: Tier, idx: usize) -> Option<i64>;
}

pub fn status_key(tier: Tier, idx: usize) -> String {
    format!("status-{}-{}", tier.as_str(), idx)
}

pub fn usage_key(tier: Tier, idx: usize) -> String {
    format!("usage-{}-{}", tier.as_str(), idx)
}

pub fn cooldown_starts_key(tier: Tier, idx: usize) -> String {
    format!("{}:start_time", status_key(tier, idx))
}

fn unix_secs(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Durable per-account health and usage state, shared by all gateway
/// processes through the backing [`KeyValue`](crate::KeyValue) store.
///
/// No process-local lock is held across operations; every cross-process
/// invariant rests on single-key atomic store calls.
pub struct HealthStore {
    kv: SharedKeyValue,
    cooldown_window: Duration,
}

impl HealthStore {
    pub fn new(kv: SharedKeyValue, cooldown_window: Duration) -> Self {
        Self {
            kv,
            cooldown_window,
        }
    }

    pub fn cooldown_window(&self) -> Duration {
        self.cooldown_window
    }

    /// First-touch initialization: status=active, usage=0, and a cooldown
    /// start per tracked model. Best-effort idempotent; a race between two
    /// initializers resolves as last-write-wins on the cooldown blob.
    pub async fn ensure_initialized(
        &self,
        tier: Tier,
        idx: usize,
        known_models: &[&str],
    ) -> Result<(), StoreError> {
        let fresh = self
            .kv
            .set_nx(&status_key(tier, idx), AccountStatus::Active.as_str())
            .await?;
        let starts = self.cooldown_starts(tier, idx).await?;
        if fresh || starts.is_empty() {
            let now = unix_secs(SystemTime::now());
            let starts: HashMap<&str, f64> =
                known_models.iter().map(|model| (*model, now)).collect();
            let blob = serde_json::to_string(&starts).map_err(|source| StoreError::Corrupt {
                key: cooldown_starts_key(tier, idx),
                source,
            })?;
            self.kv.set(&cooldown_starts_key(tier, idx), &blob).await?;
            self.kv.set_nx(&usage_key(tier, idx), "0").await?;
            debug!(tier = %tier, idx, "initialized account health state");
        }
        Ok(())
    }

    pub async fn status(&self, tier: Tier, idx: usize) -> Result<Option<AccountStatus>, StoreError> {
        let raw = self.kv.get(&status_key(tier, idx)).await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }

    pub async fn set_status(
        &self,
        tier: Tier,
        idx: usize,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        self.kv.set(&status_key(tier, idx), status.as_str()).await
    }

    pub async fn mark_error(&self, tier: Tier, idx: usize) -> Result<(), StoreError> {
        self.set_status(tier, idx, AccountStatus::Error).await
    }

    pub async fn mark_active(&self, tier: Tier, idx: usize) -> Result<(), StoreError> {
        self.set_status(tier, idx, AccountStatus::Active).await
    }

    pub async fn get_usage(&self, tier: Tier, idx: usize) -> Result<i64, StoreError> {
        let raw = self.kv.get(&usage_key(tier, idx)).await?;
        Ok(raw.and_then(|value| value.parse().ok()).unwrap_or(0))
    }

    pub async fn set_usage(&self, tier: Tier, idx: usize, usage: i64) -> Result<(), StoreError> {
        self.kv.set(&usage_key(tier, idx), &usage.to_string()).await
    }

    /// Single atomic store operation; safe under concurrent callers.
    pub async fn increment_usage(&self, tier: Tier, idx: usize, by: i64) -> Result<i64, StoreError> {
        self.kv.incr_by(&usage_key(tier, idx), by).await
    }

    pub async fn reset_usage(&self, tier: Tier, idx: usize) -> Result<(), StoreError> {
        self.set_usage(tier, idx, 0).await
    }

    /// Puts the account into cooldown for `model`, recording `at` as the
    /// window start. A no-op when the account is already in `cd`, so an
    /// in-progress window is never clobbered.
    pub async fn mark_limited(
        &self,
        tier: Tier,
        idx: usize,
        model: &str,
        at: SystemTime,
    ) -> Result<(), StoreError> {
        if self.status(tier, idx).await? == Some(AccountStatus::Cd) {
            return Ok(());
        }
        self.set_status(tier, idx, AccountStatus::Cd).await?;
        let mut starts = self.cooldown_starts(tier, idx).await?;
        starts.insert(model.to_string(), unix_secs(at));
        let blob = serde_json::to_string(&starts).map_err(|source| StoreError::Corrupt {
            key: cooldown_starts_key(tier, idx),
            source,
        })?;
        self.kv.set(&cooldown_starts_key(tier, idx), &blob).await?;
        warn!(tier = %tier, idx, model, "account entered cooldown");
        Ok(())
    }

    /// Flips a cooled-down account back to active (resetting usage) once
    /// every tracked model's window has elapsed. Returns whether the account
    /// is usable afterwards; an already-active account reports true without
    /// side effects.
    pub async fn try_reactivate(&self, tier: Tier, idx: usize) -> Result<bool, StoreError> {
        match self.status(tier, idx).await? {
            Some(AccountStatus::Cd) => {
                let now = unix_secs(SystemTime::now());
                let starts = self.cooldown_starts(tier, idx).await?;
                let window = self.cooldown_window.as_secs_f64();
                for start in starts.values() {
                    if now - start <= window {
                        return Ok(false);
                    }
                }
                self.mark_active(tier, idx).await?;
                self.reset_usage(tier, idx).await?;
                debug!(tier = %tier, idx, "account left cooldown");
                Ok(true)
            }
            Some(AccountStatus::Active) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Operator-facing report of per-model cooldown remainders.
    pub async fn cooldown_report(
        &self,
        tier: Tier,
        idx: usize,
        now: SystemTime,
    ) -> Result<String, StoreError> {
        if self.status(tier, idx).await? == Some(AccountStatus::Error) {
            return Ok("account is in error state".to_string());
        }
        let starts = self.cooldown_starts(tier, idx).await?;
        let window = self.cooldown_window.as_secs_f64();
        let now = unix_secs(now);
        let mut report = String::new();
        for (model, start) in &starts {
            let remaining = (window - (now - start)) as i64;
            if remaining > 0 {
                report.push_str(&format!("{model}: ready in {remaining}s\n"));
            } else {
                report.push_str(&format!("{model}: available\n"));
            }
        }
        Ok(report)
    }

    /// One status row per known account. Ensures first-touch initialization
    /// and backfills the usage counter from the live credits probe only when
    /// the stored counter is still zero.
    pub async fn snapshot_all(
        &self,
        accounts: &[AccountRef],
        probe: &dyn CreditsProbe,
    ) -> Result<Vec<AccountStatusView>, StoreError> {
        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            self.ensure_initialized(account.tier, account.idx, account.tier.known_models())
                .await?;
            let mut usage = self.get_usage(account.tier, account.idx).await?;
            if usage == 0
                && let Some(actual) = probe.remaining_credits(account.tier, account.idx).await
            {
                self.set_usage(account.tier, account.idx, actual).await?;
                usage = actual;
            }
            let status = self
                .status(account.tier, account.idx)
                .await?
                .unwrap_or(AccountStatus::Active);
            views.push(AccountStatusView {
                id: account.id.clone(),
                tier: account.tier.external_name().to_string(),
                idx: account.idx,
                usage,
                status,
            });
        }
        Ok(views)
    }

    async fn cooldown_starts(
        &self,
        tier: Tier,
        idx: usize,
    ) -> Result<HashMap<String, f64>, StoreError> {
        let Some(raw) = self.kv.get(&cooldown_starts_key(tier, idx)).await? else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(starts) => Ok(starts),
            Err(error) => {
                warn!(tier = %tier, idx, %error, "discarding malformed cooldown blob");
                Ok(HashMap::new())
            }
        }
    }
}
