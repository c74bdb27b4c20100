//! Periodic pool maintenance
//!
//! One cycle is: health report, a verification pass over every `active`
//! account, and (every `purge_every_cycles` cycles) a purge of long-expired
//! rows. Accounts are verified one at a time with a pacing delay in between
//! so neither upstream sees a burst.
//!
//! Per-account verification:
//!
//! ```text
//! token fresh? ──yes──────────────────────────────┐
//!      │ no                                       ▼
//! cooldown elapsed? ──no──▶ Deferred         quota check
//!      │ yes                                  │        │
//!   refresh ──fail──▶ expired            >= min     < min / error
//!      │ ok                                  │            │
//!   persist + re-read ──────▶ quota check  Healthy    expired
//! ```
//!
//! Every failure for one account ends as a status demotion plus a counted
//! outcome. Nothing an account does can abort the pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use token_auth::{RefreshClient, TokenResponse};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account::{Account, AccountStatus};
use crate::error::{Error, Result};
use crate::health::{HealthReport, HealthReporter};
use crate::quota::{QuotaClient, QuotaInfo};
use crate::settings::MaintenanceSettings;
use crate::store::AccountStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exchanges a refresh token for a new id token.
///
/// Uses `Pin<Box<dyn Future>>` so the maintainer can hold `Arc<dyn TokenRefresher>`.
pub trait TokenRefresher: Send + Sync {
    fn exchange<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenResponse>>;
}

/// Reports the remaining request allowance for an id token.
pub trait QuotaSource: Send + Sync {
    fn lookup<'a>(&'a self, id_token: &'a str) -> BoxFuture<'a, Result<QuotaInfo>>;
}

impl TokenRefresher for RefreshClient {
    fn exchange<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move { Ok(self.refresh(refresh_token).await?) })
    }
}

impl QuotaSource for QuotaClient {
    fn lookup<'a>(&'a self, id_token: &'a str) -> BoxFuture<'a, Result<QuotaInfo>> {
        Box::pin(self.remaining_quota(id_token))
    }
}

/// Outcome of verifying one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Quota at or above the threshold. No change.
    Healthy { remaining: i64 },
    /// Quota below the threshold. Demoted to expired.
    LowQuota { remaining: i64 },
    /// Token expired but the refresh cooldown has not elapsed. No change,
    /// quota not checked.
    Deferred,
    /// Refresh exchange failed. Demoted to expired, tokens untouched.
    RefreshFailed(String),
    /// Quota lookup failed. Demoted to expired.
    QuotaFailed(String),
    /// The row disappeared while it was being verified.
    Vanished,
    /// Storage or other unexpected error. Demotion attempted.
    Faulted(String),
}

impl Verification {
    /// Metric and log label.
    pub fn label(&self) -> &'static str {
        match self {
            Verification::Healthy { .. } => "healthy",
            Verification::LowQuota { .. } => "low_quota",
            Verification::Deferred => "deferred",
            Verification::RefreshFailed(_) => "refresh_failed",
            Verification::QuotaFailed(_) => "quota_failed",
            Verification::Vanished => "vanished",
            Verification::Faulted(_) => "faulted",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Verification::RefreshFailed(_)
                | Verification::QuotaFailed(_)
                | Verification::Vanished
                | Verification::Faulted(_)
        )
    }
}

/// Outcome counts for one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub total: usize,
    pub healthy: usize,
    pub low_quota: usize,
    pub deferred: usize,
    pub failed: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: &Verification) {
        self.total += 1;
        match outcome {
            Verification::Healthy { .. } => self.healthy += 1,
            Verification::LowQuota { .. } => self.low_quota += 1,
            Verification::Deferred => self.deferred += 1,
            _ => self.failed += 1,
        }
    }
}

/// Drives verification, reporting and purging over one account store.
pub struct Maintainer {
    store: AccountStore,
    refresher: Arc<dyn TokenRefresher>,
    quota: Arc<dyn QuotaSource>,
    reporter: HealthReporter,
    settings: MaintenanceSettings,
    /// Held for the duration of a verification pass.
    single_flight: Mutex<()>,
}

impl Maintainer {
    pub fn new(
        store: AccountStore,
        refresher: Arc<dyn TokenRefresher>,
        quota: Arc<dyn QuotaSource>,
        settings: &MaintenanceSettings,
    ) -> Self {
        Self {
            reporter: HealthReporter::new(store.clone(), settings),
            store,
            refresher,
            quota,
            settings: settings.clone(),
            single_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &MaintenanceSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &HealthReporter {
        &self.reporter
    }

    /// Build a health report and log it, warning on shortfall or over capacity.
    pub async fn health_report(&self) -> Result<HealthReport> {
        let report = self.reporter.report().await?;
        info!(
            total = report.total,
            active = report.active,
            expired = report.expired,
            blocked = report.blocked,
            "pool health"
        );
        if report.shortfall {
            warn!(
                active = report.active,
                min_pool_size = report.min_pool_size,
                "active accounts below minimum pool size"
            );
        }
        if report.over_capacity {
            warn!(
                active = report.active,
                max_pool_size = report.max_pool_size,
                "active accounts above maximum pool size"
            );
        }
        Ok(report)
    }

    /// Verify every `active` account once, in order, pacing between accounts.
    ///
    /// Returns `CycleInProgress` if another pass is running.
    pub async fn verify_all(&self) -> Result<CycleSummary> {
        let _guard = self
            .single_flight
            .try_lock()
            .map_err(|_| Error::CycleInProgress)?;

        let accounts = self.store.list_by_status(Some(AccountStatus::Active)).await?;
        info!(accounts = accounts.len(), "starting verification pass");

        let mut summary = CycleSummary::default();
        for (index, account) in accounts.iter().enumerate() {
            if index > 0 && !self.settings.pacing_delay.is_zero() {
                tokio::time::sleep(self.settings.pacing_delay).await;
            }
            let outcome = self.settle(account).await;
            metrics::counter!("pool_verifications_total", "outcome" => outcome.label()).increment(1);
            summary.record(&outcome);
        }

        info!(
            total = summary.total,
            healthy = summary.healthy,
            low_quota = summary.low_quota,
            deferred = summary.deferred,
            failed = summary.failed,
            "verification pass complete"
        );
        Ok(summary)
    }

    /// Verify one account and turn any error into a demotion.
    async fn settle(&self, account: &Account) -> Verification {
        let outcome = match self.verify_account(account).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(demote) = self
                    .store
                    .update_status(&account.email, AccountStatus::Expired)
                    .await
                {
                    warn!(account = %account.email, error = %demote, "failed to demote faulted account");
                }
                Verification::Faulted(e.to_string())
            }
        };
        log_outcome(&account.email, &outcome);
        outcome
    }

    /// Run the verification state machine for one account.
    ///
    /// Errors returned here are storage failures; upstream failures are
    /// already folded into the returned `Verification`.
    pub async fn verify_account(&self, account: &Account) -> Result<Verification> {
        let settings = &self.settings;

        let id_token = if !account.token_expired(settings.expiry_buffer) {
            account.id_token.clone().unwrap_or_default()
        } else if !account.can_refresh(settings.refresh_cooldown) {
            return Ok(Verification::Deferred);
        } else {
            debug!(account = %account.email, "token expired, refreshing");
            let tokens = match self.refresher.exchange(&account.refresh_token).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    self.demote(&account.email).await?;
                    return Ok(Verification::RefreshFailed(e.to_string()));
                }
            };
            match self
                .store
                .update_tokens(
                    &account.email,
                    &tokens.id_token,
                    tokens.refresh_token.as_deref(),
                )
                .await
            {
                Ok(()) => {}
                Err(Error::NotFound(_)) => return Ok(Verification::Vanished),
                Err(e) => return Err(e),
            }
            match self.store.get_by_email(&account.email).await? {
                Some(refreshed) => refreshed.id_token.unwrap_or_default(),
                None => return Ok(Verification::Vanished),
            }
        };

        match self.quota.lookup(&id_token).await {
            Ok(info) if info.remaining >= settings.min_quota_threshold => {
                Ok(Verification::Healthy {
                    remaining: info.remaining,
                })
            }
            Ok(info) => {
                self.demote(&account.email).await?;
                Ok(Verification::LowQuota {
                    remaining: info.remaining,
                })
            }
            Err(e) => {
                self.demote(&account.email).await?;
                Ok(Verification::QuotaFailed(e.to_string()))
            }
        }
    }

    async fn demote(&self, email: &str) -> Result<()> {
        match self.store.update_status(email, AccountStatus::Expired).await {
            Err(Error::NotFound(_)) => {
                debug!(account = email, "account gone before demotion");
                Ok(())
            }
            other => other,
        }
    }

    /// Delete expired accounts last refreshed more than `days` ago.
    pub async fn purge(&self, days: u32) -> Result<u64> {
        let deleted = self.store.purge_expired_older_than(days).await?;
        metrics::counter!("pool_purged_accounts_total").increment(deleted);
        info!(deleted, retention_days = days, "purge complete");
        Ok(deleted)
    }

    /// One full cycle. `cycle` is 1-based; the purge runs when it is a
    /// multiple of `purge_every_cycles`.
    pub async fn run_cycle(&self, cycle: u64) -> Result<CycleSummary> {
        self.health_report().await?;
        let summary = self.verify_all().await?;
        if self.settings.purge_every_cycles > 0 && cycle % self.settings.purge_every_cycles == 0 {
            self.purge(self.settings.cycle_retention_days).await?;
        }
        metrics::counter!("pool_cycles_total").increment(1);
        Ok(summary)
    }

    /// Run cycles until `cancel` fires. A failed cycle is logged and the loop
    /// carries on. Cancellation never interrupts a cycle in flight.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(
            interval_secs = self.settings.cycle_interval.as_secs(),
            "maintenance loop started"
        );
        let mut cycle: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            cycle += 1;
            match self.run_cycle(cycle).await {
                Ok(summary) => debug!(cycle, total = summary.total, "cycle finished"),
                Err(e) => error!(cycle, error = %e, "maintenance cycle failed"),
            }

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.cycle_interval) => {}
            }
        }
        info!(cycles = cycle, "maintenance loop stopped");
    }
}

fn log_outcome(email: &str, outcome: &Verification) {
    match outcome {
        Verification::Healthy { remaining } => {
            info!(account = email, remaining, "account healthy")
        }
        Verification::LowQuota { remaining } => {
            warn!(account = email, remaining, "quota below threshold, marking expired")
        }
        Verification::Deferred => {
            info!(account = email, "token expired but refresh on cooldown, keeping account")
        }
        Verification::RefreshFailed(e) => {
            warn!(account = email, error = %e, "token refresh failed, marking expired")
        }
        Verification::QuotaFailed(e) => {
            warn!(account = email, error = %e, "quota check failed, marking expired")
        }
        Verification::Vanished => warn!(account = email, "account removed during verification"),
        Verification::Faulted(e) => {
            error!(account = email, error = %e, "verification faulted, marking expired")
        }
    }
}

/// Spawn the maintenance loop. The task ends once `cancel` fires and the
/// in-flight cycle finishes.
pub fn spawn_maintenance(
    maintainer: Arc<Maintainer>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { maintainer.run(&cancel).await })
}
