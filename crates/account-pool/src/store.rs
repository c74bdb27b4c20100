//! SQLite account store
//!
//! The `accounts` table is the single source of truth for the pool. Rows are
//! created by the registration tooling, mutated by the maintainer (tokens and
//! status), and deleted by the purge. Every operation here is a single
//! statement, so each read or write is atomic on its own; nothing spans rows.
//!
//! Timestamps are stored as RFC 3339 text. Comparisons go through SQLite's
//! `julianday()` so rows written with naive ISO-8601 timestamps compare
//! correctly too.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::account::{Account, AccountStatus, NewAccount, format_timestamp};
use crate::error::{Error, Result};

/// DDL for a fresh database. Existing databases are left as they are and
/// checked against `REQUIRED_COLUMNS` instead.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    email_password TEXT NULL,
    local_id TEXT NULL,
    id_token TEXT NULL,
    refresh_token TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NULL,      -- RFC 3339
    last_used TEXT NULL,       -- written by the request-serving side
    last_refresh_time TEXT NULL,
    use_count INTEGER NOT NULL DEFAULT 0,
    proxy_info TEXT NULL,
    user_agent TEXT NULL
)
"#;

const STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status)";

/// Columns the row decoder reads. Checked once when the store opens.
const REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "email",
    "email_password",
    "local_id",
    "id_token",
    "refresh_token",
    "status",
    "created_at",
    "last_used",
    "last_refresh_time",
    "use_count",
    "proxy_info",
    "user_agent",
];

const SELECT_ACCOUNT: &str = r#"SELECT id, email, email_password, local_id, id_token,
    refresh_token, status, created_at, last_used, last_refresh_time,
    use_count, proxy_info, user_agent FROM accounts"#;

/// Per-status row counts plus the table total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u64,
    /// Keyed by the raw column value so unexpected statuses still show up.
    pub by_status: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn get(&self, status: AccountStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Handle on the accounts database.
#[derive(Debug, Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    /// Open (or create) the database at `path`.
    ///
    /// `timeout` bounds both connection acquisition and how long a statement
    /// waits on a lock held by another process.
    pub async fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }

        info!(path = %path.display(), "opening account database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        store.check_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(STATUS_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    /// Fail fast when the table predates a column the decoder needs.
    async fn check_schema(&self) -> Result<()> {
        let present: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('accounts')")
                .fetch_all(&self.pool)
                .await?;
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !present.iter().any(|(name,)| name == col))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Schema(format!(
                "accounts table is missing columns: {}",
                missing.join(", ")
            )));
        }
        debug!("account schema verified");
        Ok(())
    }

    /// Insert a freshly registered account. Returns the row id.
    ///
    /// A duplicate email is rejected by the UNIQUE constraint.
    pub async fn insert(&self, account: &NewAccount) -> Result<i64> {
        let created_at = format_timestamp(account.created_at.unwrap_or_else(Utc::now));
        let result = sqlx::query(
            r#"INSERT INTO accounts (
                email, email_password, local_id, id_token, refresh_token,
                status, created_at, last_refresh_time, proxy_info, user_agent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&account.email)
        .bind(&account.email_password)
        .bind(&account.local_id)
        .bind(&account.id_token)
        .bind(&account.refresh_token)
        .bind(account.status.as_str())
        .bind(created_at)
        .bind(account.last_refresh_time.map(format_timestamp))
        .bind(&account.proxy_info)
        .bind(&account.user_agent)
        .execute(&self.pool)
        .await?;
        debug!(account = %account.email, "inserted account");
        Ok(result.last_insert_rowid())
    }

    /// All accounts, optionally only those with `status`, in insertion order.
    pub async fn list_by_status(&self, status: Option<AccountStatus>) -> Result<Vec<Account>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!("{SELECT_ACCOUNT} WHERE status = ? ORDER BY id"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{SELECT_ACCOUNT} ORDER BY id"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Account::from_row).collect()
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{SELECT_ACCOUNT} WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Account::from_row).transpose()
    }

    /// Store a refreshed id token and stamp `last_refresh_time`.
    ///
    /// The refresh token is replaced only when the endpoint issued a new one.
    /// `last_refresh_time` never moves backwards, even if the clock does.
    pub async fn update_tokens(
        &self,
        email: &str,
        id_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"UPDATE accounts SET
                id_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                last_refresh_time = CASE
                    WHEN last_refresh_time IS NOT NULL
                         AND julianday(last_refresh_time) > julianday(?)
                    THEN last_refresh_time
                    ELSE ?
                END
              WHERE email = ?"#,
        )
        .bind(id_token)
        .bind(refresh_token)
        .bind(&now)
        .bind(&now)
        .bind(email)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(email.to_string()));
        }
        debug!(
            account = email,
            rotated_refresh_token = refresh_token.is_some(),
            "updated tokens"
        );
        Ok(())
    }

    pub async fn update_status(&self, email: &str, status: AccountStatus) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET status = ? WHERE email = ?")
            .bind(status.as_str())
            .bind(email)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(email.to_string()));
        }
        info!(account = email, status = %status, "updated account status");
        Ok(())
    }

    /// Row counts grouped by status.
    pub async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM accounts GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let by_status: BTreeMap<String, u64> = rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect();
        Ok(StatusCounts {
            total: by_status.values().sum(),
            by_status,
        })
    }

    /// Delete expired accounts whose last refresh is older than `days`.
    pub async fn purge_expired_older_than(&self, days: u32) -> Result<u64> {
        let Some(cutoff) = Utc::now().checked_sub_signed(TimeDelta::days(i64::from(days))) else {
            debug!(
                retention_days = days,
                "retention reaches past the earliest date, nothing to purge"
            );
            return Ok(0);
        };
        self.purge_expired_before(cutoff).await
    }

    /// Delete expired accounts last refreshed before `cutoff`.
    ///
    /// Rows that were never refreshed have no age to compare and are kept.
    pub async fn purge_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM accounts
               WHERE status = ?
                 AND last_refresh_time IS NOT NULL
                 AND julianday(last_refresh_time) < julianday(?)"#,
        )
        .bind(AccountStatus::Expired.as_str())
        .bind(format_timestamp(cutoff))
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "purged expired accounts");
        }
        Ok(deleted)
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn test_store(dir: &tempfile::TempDir) -> AccountStore {
        AccountStore::open(dir.path().join("accounts.db"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    /// Execute raw SQL against the store's pool (triggers, out-of-band deletes).
    pub(crate) async fn run_sql(store: &AccountStore, sql: &str) {
        sqlx::query(sql).execute(&store.pool).await.unwrap();
    }

    fn days_ago(days: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() - TimeDelta::days(days))
    }

    #[tokio::test]
    async fn insert_and_get_by_email() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let id = store
            .insert(&NewAccount {
                id_token: Some("it_1".into()),
                proxy_info: Some("socks5://10.0.0.1:1080".into()),
                ..NewAccount::new("a@example.com", "rt_1")
            })
            .await
            .unwrap();

        let account = store.get_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(account.id, id);
        assert_eq!(account.id_token.as_deref(), Some("it_1"));
        assert_eq!(account.refresh_token, "rt_1");
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.use_count, 0);
        assert_eq!(account.proxy_info.as_deref(), Some("socks5://10.0.0.1:1080"));
        assert!(account.created_at.is_some());
        assert!(account.last_refresh_time.is_none());

        assert!(store.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store.insert(&NewAccount::new("a@example.com", "rt_1")).await.unwrap();
        let err = store
            .insert(&NewAccount::new("a@example.com", "rt_2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        for (email, status) in [
            ("a@example.com", AccountStatus::Active),
            ("b@example.com", AccountStatus::Expired),
            ("c@example.com", AccountStatus::Blocked),
            ("d@example.com", AccountStatus::Active),
        ] {
            store
                .insert(&NewAccount {
                    status,
                    ..NewAccount::new(email, "rt")
                })
                .await
                .unwrap();
        }

        let active: Vec<String> = store
            .list_by_status(Some(AccountStatus::Active))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert_eq!(active, vec!["a@example.com", "d@example.com"]);

        let all = store.list_by_status(None).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn update_tokens_keeps_refresh_token_when_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.insert(&NewAccount::new("a@example.com", "rt_old")).await.unwrap();

        store
            .update_tokens("a@example.com", "it_new", None)
            .await
            .unwrap();
        let account = store.get_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(account.id_token.as_deref(), Some("it_new"));
        assert_eq!(account.refresh_token, "rt_old");
        assert!(account.last_refresh_time.is_some());

        store
            .update_tokens("a@example.com", "it_newer", Some("rt_new"))
            .await
            .unwrap();
        let account = store.get_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(account.id_token.as_deref(), Some("it_newer"));
        assert_eq!(account.refresh_token, "rt_new");
    }

    #[tokio::test]
    async fn last_refresh_time_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let future = Utc::now() + TimeDelta::days(1);
        store
            .insert(&NewAccount {
                last_refresh_time: Some(future),
                ..NewAccount::new("a@example.com", "rt")
            })
            .await
            .unwrap();

        store.update_tokens("a@example.com", "it", None).await.unwrap();
        let account = store.get_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(
            account.last_refresh_time.unwrap().timestamp_millis(),
            future.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn updates_on_unknown_account_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let err = store.update_tokens("ghost@example.com", "it", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store
            .update_status("ghost@example.com", AccountStatus::Expired)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_status_changes_only_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store
            .insert(&NewAccount {
                id_token: Some("it".into()),
                ..NewAccount::new("a@example.com", "rt")
            })
            .await
            .unwrap();

        store
            .update_status("a@example.com", AccountStatus::Expired)
            .await
            .unwrap();
        let account = store.get_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Expired);
        assert_eq!(account.id_token.as_deref(), Some("it"));
        assert!(account.last_refresh_time.is_none());
    }

    #[tokio::test]
    async fn counts_group_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        for (i, status) in [
            AccountStatus::Active,
            AccountStatus::Active,
            AccountStatus::Expired,
            AccountStatus::Blocked,
        ]
        .into_iter()
        .enumerate()
        {
            store
                .insert(&NewAccount {
                    status,
                    ..NewAccount::new(format!("{i}@example.com"), "rt")
                })
                .await
                .unwrap();
        }

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.get(AccountStatus::Active), 2);
        assert_eq!(counts.get(AccountStatus::Expired), 1);
        assert_eq!(counts.get(AccountStatus::Blocked), 1);
    }

    #[tokio::test]
    async fn empty_store_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts, StatusCounts::default());
    }

    #[tokio::test]
    async fn purge_deletes_only_old_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        for (email, status, refreshed) in [
            ("old@example.com", AccountStatus::Expired, days_ago(10)),
            ("recent@example.com", AccountStatus::Expired, days_ago(3)),
            ("active@example.com", AccountStatus::Active, days_ago(40)),
            ("blocked@example.com", AccountStatus::Blocked, days_ago(40)),
            ("never@example.com", AccountStatus::Expired, None),
        ] {
            store
                .insert(&NewAccount {
                    status,
                    last_refresh_time: refreshed,
                    ..NewAccount::new(email, "rt")
                })
                .await
                .unwrap();
        }

        let deleted = store.purge_expired_older_than(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_by_email("old@example.com").await.unwrap().is_none());
        assert!(store.get_by_email("recent@example.com").await.unwrap().is_some());
        assert!(store.get_by_email("active@example.com").await.unwrap().is_some());
        assert!(store.get_by_email("blocked@example.com").await.unwrap().is_some());
        assert!(store.get_by_email("never@example.com").await.unwrap().is_some());

        assert_eq!(store.purge_expired_older_than(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_with_unbounded_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store
            .insert(&NewAccount {
                status: AccountStatus::Expired,
                last_refresh_time: days_ago(3650),
                ..NewAccount::new("old@example.com", "rt")
            })
            .await
            .unwrap();

        assert_eq!(store.purge_expired_older_than(u32::MAX).await.unwrap(), 0);
        assert!(store.get_by_email("old@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_compares_naive_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.insert(&NewAccount::new("a@example.com", "rt")).await.unwrap();
        store.insert(&NewAccount::new("b@example.com", "rt")).await.unwrap();

        // Registration tooling writes naive local ISO timestamps.
        let old = (Utc::now() - TimeDelta::days(12)).naive_utc();
        let recent = (Utc::now() - TimeDelta::days(2)).naive_utc();
        for (email, ts) in [("a@example.com", old), ("b@example.com", recent)] {
            sqlx::query(
                "UPDATE accounts SET status = 'expired', last_refresh_time = ? WHERE email = ?",
            )
            .bind(ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
            .bind(email)
            .execute(&store.pool)
            .await
            .unwrap();
        }

        let b = store.get_by_email("b@example.com").await.unwrap().unwrap();
        assert_eq!(
            b.last_refresh_time.unwrap().timestamp(),
            recent.and_utc().timestamp()
        );

        assert_eq!(store.purge_expired_older_than(7).await.unwrap(), 1);
        assert!(store.get_by_email("a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.insert(&NewAccount::new("a@example.com", "rt")).await.unwrap();
        store.close().await;

        let reopened = test_store(&dir).await;
        assert!(reopened.get_by_email("a@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn open_rejects_table_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT NOT NULL, status TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let err = AccountStore::open(&path, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "got {err:?}");
        assert!(err.to_string().contains("refresh_token"), "got {err}");
    }

    #[tokio::test]
    async fn unknown_status_value_fails_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.insert(&NewAccount::new("a@example.com", "rt")).await.unwrap();
        sqlx::query("UPDATE accounts SET status = 'frozen'")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get_by_email("a@example.com").await.unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
