//! Pooled account entity and its lifecycle status
//!
//! Rows are decoded column by column against a fixed contract: each column is
//! either required (NULL is a schema error) or optional. A column missing
//! from the row entirely is always a schema error, never a silent `None`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use crate::error::{Error, Result};

/// Lifecycle status stored in the `status` column.
///
/// Transitions made by this crate:
/// - Active → Expired (refresh failure, quota failure, quota below threshold)
/// - Expired → (deleted by purge after the retention window)
///
/// `Blocked` is only ever set by other tooling; the maintainer reads and
/// preserves it but never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Blocked,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 3] = [
        AccountStatus::Active,
        AccountStatus::Expired,
        AccountStatus::Blocked,
    ];

    /// Column value and log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "expired" => Ok(AccountStatus::Expired),
            "blocked" => Ok(AccountStatus::Blocked),
            other => Err(Error::Schema(format!("unknown account status `{other}`"))),
        }
    }
}

/// One pooled account as stored in the `accounts` table.
///
/// `email` is the stable identity. `last_used` and `use_count` belong to the
/// request-serving side and are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub email_password: Option<String>,
    pub local_id: Option<String>,
    /// Short-lived bearer token (JWT). `None` until the first refresh.
    pub id_token: Option<String>,
    /// Long-lived secret exchanged for new id tokens.
    pub refresh_token: String,
    pub status: AccountStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    /// Set only by a successful refresh.
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub use_count: i64,
    pub proxy_info: Option<String>,
    pub user_agent: Option<String>,
}

impl Account {
    /// Whether the id token is missing, undecodable, or expires within `buffer`.
    pub fn token_expired(&self, buffer: Duration) -> bool {
        token_auth::is_expired(self.id_token.as_deref().unwrap_or_default(), buffer)
    }

    /// Whether the refresh cooldown has elapsed for this account.
    pub fn can_refresh(&self, cooldown: Duration) -> bool {
        token_auth::can_refresh(self.last_refresh_time, cooldown)
    }

    /// Decode one `accounts` row.
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = required(row, "status")?;
        Ok(Self {
            id: required(row, "id")?,
            email: required(row, "email")?,
            email_password: optional(row, "email_password")?,
            local_id: optional(row, "local_id")?,
            id_token: optional::<String>(row, "id_token")?.filter(|t| !t.is_empty()),
            refresh_token: required(row, "refresh_token")?,
            status: status.parse()?,
            created_at: optional_timestamp(row, "created_at")?,
            last_used: optional_timestamp(row, "last_used")?,
            last_refresh_time: optional_timestamp(row, "last_refresh_time")?,
            use_count: optional(row, "use_count")?.unwrap_or(0),
            proxy_info: optional(row, "proxy_info")?,
            user_agent: optional(row, "user_agent")?,
        })
    }
}

/// A row handed to the store by the registration side.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub email: String,
    pub email_password: Option<String>,
    pub local_id: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: String,
    pub status: AccountStatus,
    /// Defaults to the insertion time.
    pub created_at: Option<DateTime<Utc>>,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub proxy_info: Option<String>,
    pub user_agent: Option<String>,
}

impl NewAccount {
    /// An active account with only identity and refresh token set.
    pub fn new(email: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            email_password: None,
            local_id: None,
            id_token: None,
            refresh_token: refresh_token.into(),
            status: AccountStatus::Active,
            created_at: None,
            last_refresh_time: None,
            proxy_info: None,
            user_agent: None,
        }
    }
}

/// Render a timestamp the way this crate stores it (RFC 3339, UTC, millis).
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and naive ISO-8601 (no offset, read as UTC), which is
/// what the registration tooling writes.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::Schema(format!("unparsable timestamp `{raw}`")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<Option<T>, _>(name).map_err(|e| match e {
        sqlx::Error::ColumnNotFound(_) => {
            Error::Schema(format!("accounts row has no column `{name}`"))
        }
        other => Error::Schema(format!("column `{name}`: {other}")),
    })
}

fn required<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    column(row, name)?.ok_or_else(|| Error::Schema(format!("column `{name}` is NULL")))
}

fn optional<'r, T>(row: &'r SqliteRow, name: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    column(row, name)
}

fn optional_timestamp(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>> {
    optional::<String>(row, name)?
        .filter(|raw| !raw.is_empty())
        .map(|raw| parse_timestamp(&raw))
        .transpose()
}
