//! Pool size summary

use std::collections::BTreeMap;

use serde::Serialize;

use crate::account::AccountStatus;
use crate::error::Result;
use crate::settings::MaintenanceSettings;
use crate::store::{AccountStore, StatusCounts};

/// Point-in-time pool summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
    pub blocked: u64,
    /// Every status present in the table, including unrecognized ones.
    pub by_status: BTreeMap<String, u64>,
    pub min_pool_size: u64,
    pub max_pool_size: u64,
    /// Fewer active accounts than `min_pool_size`.
    pub shortfall: bool,
    /// More active accounts than `max_pool_size`.
    pub over_capacity: bool,
}

impl HealthReport {
    pub fn from_counts(counts: StatusCounts, min_pool_size: u64, max_pool_size: u64) -> Self {
        let active = counts.get(AccountStatus::Active);
        Self {
            total: counts.total,
            active,
            expired: counts.get(AccountStatus::Expired),
            blocked: counts.get(AccountStatus::Blocked),
            by_status: counts.by_status,
            min_pool_size,
            max_pool_size,
            shortfall: active < min_pool_size,
            over_capacity: active > max_pool_size,
        }
    }

    /// "healthy", or "degraded" while the pool is short.
    pub fn status(&self) -> &'static str {
        if self.shortfall { "degraded" } else { "healthy" }
    }
}

/// Builds health reports from the store.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    store: AccountStore,
    min_pool_size: u64,
    max_pool_size: u64,
}

impl HealthReporter {
    pub fn new(store: AccountStore, settings: &MaintenanceSettings) -> Self {
        Self {
            store,
            min_pool_size: settings.min_pool_size,
            max_pool_size: settings.max_pool_size,
        }
    }

    /// Read current counts and summarize them. Also refreshes the
    /// `pool_accounts` gauges.
    pub async fn report(&self) -> Result<HealthReport> {
        let counts = self.store.count_by_status().await?;
        let report = HealthReport::from_counts(counts, self.min_pool_size, self.max_pool_size);
        for status in AccountStatus::ALL {
            let count = report.by_status.get(status.as_str()).copied().unwrap_or(0);
            metrics::gauge!("pool_accounts", "status" => status.as_str()).set(count as f64);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::NewAccount;
    use crate::store::tests::test_store;

    fn counts(pairs: &[(&str, u64)]) -> StatusCounts {
        let by_status: BTreeMap<String, u64> =
            pairs.iter().map(|(s, n)| (s.to_string(), *n)).collect();
        StatusCounts {
            total: by_status.values().sum(),
            by_status,
        }
    }

    #[test]
    fn shortfall_below_minimum() {
        let report = HealthReport::from_counts(counts(&[("active", 24)]), 25, 60);
        assert!(report.shortfall);
        assert!(!report.over_capacity);
        assert_eq!(report.status(), "degraded");

        let report = HealthReport::from_counts(counts(&[("active", 25)]), 25, 60);
        assert!(!report.shortfall);
        assert_eq!(report.status(), "healthy");
    }

    #[test]
    fn over_capacity_above_maximum() {
        let report = HealthReport::from_counts(counts(&[("active", 61)]), 25, 60);
        assert!(report.over_capacity);
        assert_eq!(report.status(), "healthy");
    }

    #[test]
    fn empty_pool_is_short() {
        let report = HealthReport::from_counts(StatusCounts::default(), 1, 60);
        assert_eq!(report.total, 0);
        assert!(report.shortfall);
    }

    #[test]
    fn unknown_statuses_count_toward_total_only() {
        let report =
            HealthReport::from_counts(counts(&[("active", 2), ("frozen", 3)]), 1, 60);
        assert_eq!(report.total, 5);
        assert_eq!(report.active, 2);
        assert_eq!(report.by_status.get("frozen"), Some(&3));
    }

    #[test]
    fn report_serializes_counts_and_flags() {
        let report = HealthReport::from_counts(counts(&[("active", 3)]), 5, 10);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["active"], 3);
        assert_eq!(json["shortfall"], true);
        assert_eq!(json["by_status"]["active"], 3);
    }

    #[tokio::test]
    async fn report_reads_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let plan = [
            (AccountStatus::Active, 30),
            (AccountStatus::Expired, 5),
            (AccountStatus::Blocked, 1),
        ];
        for (status, n) in plan {
            for i in 0..n {
                store
                    .insert(&NewAccount {
                        status,
                        ..NewAccount::new(format!("{status}-{i}@example.com"), "rt")
                    })
                    .await
                    .unwrap();
            }
        }

        let settings = MaintenanceSettings {
            min_pool_size: 25,
            ..MaintenanceSettings::default()
        };
        let report = HealthReporter::new(store, &settings).report().await.unwrap();
        assert_eq!(report.total, 36);
        assert_eq!(report.active, 30);
        assert_eq!(report.expired, 5);
        assert_eq!(report.blocked, 1);
        assert!(!report.shortfall);
    }
}
