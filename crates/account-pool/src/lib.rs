//! Account pool storage and maintenance
//!
//! The pool lives in a SQLite `accounts` table written by an external
//! registration tool and read by the request-serving side. This crate keeps
//! it usable:
//!
//! - `store`: typed access to the table (list, lookup, token/status writes,
//!   per-status counts, purge of long-expired rows)
//! - `quota`: remaining-request lookup per account
//! - `health`: pool size summary against the configured bounds
//! - `maintenance`: the periodic verify/report/purge loop
//!
//! Only the maintainer moves accounts from `active` to `expired`. Nothing here
//! ever reactivates an account or sets `blocked`.

pub mod account;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod quota;
pub mod settings;
pub mod store;

pub use account::{Account, AccountStatus, NewAccount};
pub use error::{Error, Result};
pub use health::{HealthReport, HealthReporter};
pub use maintenance::{
    CycleSummary, Maintainer, QuotaSource, TokenRefresher, Verification, spawn_maintenance,
};
pub use quota::{QuotaClient, QuotaInfo, parse_quota_response};
pub use settings::MaintenanceSettings;
pub use store::{AccountStore, StatusCounts};
