//! Prometheus metrics exposition
//!
//! The pool crate records through the `metrics` facade; this module installs
//! the recorder that turns those calls into Prometheus text:
//!
//! - `pool_accounts` (gauge): label `status`
//! - `pool_verifications_total` (counter): label `outcome`
//! - `pool_cycles_total` (counter)
//! - `pool_purged_accounts_total` (counter)

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// Only one global recorder may exist per process; call once from `main`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_gauge!("pool_accounts", "Accounts in the pool by status");
    metrics::describe_counter!(
        "pool_verifications_total",
        "Per-account verification outcomes"
    );
    metrics::describe_counter!("pool_cycles_total", "Completed maintenance cycles");
    metrics::describe_counter!(
        "pool_purged_accounts_total",
        "Expired accounts deleted by purges"
    );
}
