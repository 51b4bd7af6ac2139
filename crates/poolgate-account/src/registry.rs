use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, error, info};

use poolgate_common::Tier;
use poolgate_store::{AccountRef, CreditsProbe};

use crate::account::Account;
use crate::credential::SessionCredential;
use crate::upstream::{CredentialStore, Upstream, UpstreamError};

#[derive(Debug, Clone, Copy)]
pub struct RegisterOptions {
    /// Attempts granted to a credential whose preflight is transiently
    /// refused.
    pub retry_budget: u32,
    /// Pause between attempts.
    pub retry_wait: Duration,
}

/// Turns one stored credential into a live [`Account`].
///
/// A malformed blob fails immediately. A transient upstream refusal is
/// retried within the budget; anything else, or an exhausted budget, drops
/// the credential from the pool without failing the whole load.
pub async fn register(
    upstream: &dyn Upstream,
    credentials: &dyn CredentialStore,
    blob: &str,
    key: &str,
    tier: Tier,
    options: RegisterOptions,
) -> Option<Arc<Account>> {
    let credential = match SessionCredential::parse(blob) {
        Ok(credential) => credential,
        Err(err) => {
            error!(account = key, tier = %tier, %err, "dropping malformed credential");
            return None;
        }
    };

    let mut attempts_left = options.retry_budget.max(1);
    loop {
        match upstream.authenticate(&credential).await {
            Ok(()) => break,
            Err(UpstreamError::TemporarilyRefused(reason)) => {
                attempts_left -= 1;
                if attempts_left == 0 {
                    error!(
                        account = key,
                        tier = %tier,
                        reason,
                        "giving up on credential after exhausting the retry budget"
                    );
                    return None;
                }
                debug!(
                    account = key,
                    tier = %tier,
                    attempts_left,
                    "upstream temporarily refusing; will retry registration"
                );
                tokio::time::sleep(options.retry_wait).await;
            }
            Err(err) => {
                error!(account = key, tier = %tier, %err, "dropping credential");
                return None;
            }
        }
    }

    let account = Arc::new(Account::new(key, tier, credential));
    account.refresh_secondary_token(credentials).await;
    Some(account)
}

/// Live accounts per tier for one snapshot generation.
#[derive(Default)]
pub struct PoolSnapshot {
    pub basic: Vec<Arc<Account>>,
    pub plus: Vec<Arc<Account>>,
}

impl PoolSnapshot {
    pub fn tier(&self, tier: Tier) -> &[Arc<Account>] {
        match tier {
            Tier::Basic => &self.basic,
            Tier::Plus => &self.plus,
        }
    }
}

/// The registry of live accounts. Loads both tiers concurrently and swaps the
/// result in atomically; readers never block on a load.
pub struct AccountPool {
    upstream: Arc<dyn Upstream>,
    credentials: Arc<dyn CredentialStore>,
    snapshot: ArcSwap<PoolSnapshot>,
    register_wait: Duration,
    load_budget: u32,
    reload_budget: u32,
}

impl AccountPool {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        credentials: Arc<dyn CredentialStore>,
        register_wait: Duration,
        load_budget: u32,
        reload_budget: u32,
    ) -> Self {
        Self {
            upstream,
            credentials,
            snapshot: ArcSwap::new(Arc::new(PoolSnapshot::default())),
            register_wait,
            load_budget,
            reload_budget,
        }
    }

    /// Initial pool load: the small retry budget.
    pub async fn load(&self) {
        self.load_with(self.load_budget).await;
    }

    /// Admin-triggered reload: the larger retry budget.
    pub async fn reload(&self) {
        self.load_with(self.reload_budget).await;
    }

    async fn load_with(&self, retry_budget: u32) {
        let options = RegisterOptions {
            retry_budget,
            retry_wait: self.register_wait,
        };
        let basic = self.load_tier(Tier::Basic, options).await;
        let plus = self.load_tier(Tier::Plus, options).await;
        self.snapshot.store(Arc::new(PoolSnapshot { basic, plus }));
    }

    /// Registers every credential of a tier as an independent task and
    /// gathers the results; one slow or failing credential never blocks the
    /// others, and partial failure is the normal case.
    async fn load_tier(&self, tier: Tier, options: RegisterOptions) -> Vec<Arc<Account>> {
        let stored = self.credentials.list_credentials(tier).await;
        let total = stored.len();
        let mut tasks = Vec::with_capacity(total);
        for (blob, key) in stored {
            let upstream = self.upstream.clone();
            let credentials = self.credentials.clone();
            tasks.push(tokio::spawn(async move {
                register(
                    upstream.as_ref(),
                    credentials.as_ref(),
                    &blob,
                    &key,
                    tier,
                    options,
                )
                .await
            }));
        }

        let mut accounts = Vec::with_capacity(total);
        for task in tasks {
            match task.await {
                Ok(Some(account)) => accounts.push(account),
                Ok(None) => {}
                Err(err) => error!(tier = %tier, %err, "registration task panicked"),
            }
        }
        info!(tier = %tier, registered = accounts.len(), total, "tier registered");
        accounts
    }

    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, tier: Tier, slot: usize) -> Option<Arc<Account>> {
        self.snapshot.load().tier(tier).get(slot).cloned()
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Identity rows for the health snapshot, both tiers.
    pub fn account_refs(&self) -> Vec<AccountRef> {
        let snapshot = self.snapshot.load();
        let mut refs = Vec::new();
        for tier in [Tier::Plus, Tier::Basic] {
            for (idx, account) in snapshot.tier(tier).iter().enumerate() {
                refs.push(AccountRef {
                    id: account.key().to_string(),
                    tier,
                    idx,
                });
            }
        }
        refs
    }
}

#[async_trait]
impl CreditsProbe for AccountPool {
    async fn remaining_credits(&self, tier: Tier, idx: usize) -> Option<i64> {
        let account = self.get(tier, idx)?;
        match account
            .remaining_credits(self.upstream.as_ref(), self.credentials.as_ref())
            .await
        {
            Ok(credits) => Some(credits),
            Err(err) => {
                debug!(account = account.key(), %err, "credits probe failed");
                None
            }
        }
    }
}
