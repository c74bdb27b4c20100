//! Id token expiry and refresh cooldown checks
//!
//! Pure functions, no I/O. The id token is a JWT: three dot-separated
//! base64url segments, the middle one a JSON object with an `exp` claim in
//! unix seconds. Anything that does not decode to that shape is treated as
//! expired so the caller falls through to a refresh (or a cooldown wait)
//! instead of presenting a broken token upstream.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Read the `exp` claim (unix seconds) from a JWT without verifying it.
pub fn decode_expiry(token: &str) -> Result<i64> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::Decode(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::Decode(format!("payload is not base64url: {e}")))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Decode(format!("payload is not JSON: {e}")))?;

    let exp = claims
        .get("exp")
        .ok_or_else(|| Error::Decode("payload has no exp claim".into()))?;
    if let Some(secs) = exp.as_i64() {
        return Ok(secs);
    }
    match exp.as_f64() {
        // i64::MAX as f64 is 2^63, one past the range.
        Some(secs) if secs.is_finite() && secs >= i64::MIN as f64 && secs < i64::MAX as f64 => {
            Ok(secs as i64)
        }
        Some(_) => Err(Error::Decode(format!("exp claim out of range: {exp}"))),
        None => Err(Error::Decode(format!("exp claim is not numeric: {exp}"))),
    }
}

/// Whether `token` expires within `buffer` of the current time.
///
/// Decode failures count as expired.
pub fn is_expired(token: &str, buffer: Duration) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let now = i64::try_from(now).unwrap_or(i64::MAX);
    is_expired_at(token, buffer, now)
}

/// `is_expired` against an explicit clock (unix seconds).
pub fn is_expired_at(token: &str, buffer: Duration, now: i64) -> bool {
    match decode_expiry(token) {
        Ok(exp) => {
            let buffer = i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX);
            exp.saturating_sub(now) <= buffer
        }
        Err(e) => {
            debug!(error = %e, "treating undecodable bearer token as expired");
            true
        }
    }
}

/// Whether the refresh cooldown has elapsed since `last_refresh`.
///
/// An account that has never been refreshed may always refresh.
pub fn can_refresh(last_refresh: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    can_refresh_at(last_refresh, cooldown, Utc::now())
}

/// `can_refresh` against an explicit clock.
pub fn can_refresh_at(
    last_refresh: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_refresh else {
        return true;
    };
    let cooldown = TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX);
    now - last >= cooldown
}
