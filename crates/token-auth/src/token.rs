//! Refresh token exchange
//!
//! One POST per call: JSON body `{grant_type: "refresh_token", refresh_token}`
//! to the secure token endpoint with an API key in the `key` query parameter.
//! A 2xx answer must carry a new `id_token`; the `refresh_token` in the answer
//! is optional and, when absent, the caller keeps the one it already has.
//!
//! Failures are returned as-is and never retried here. The refresh endpoint
//! rate-limits per account and the pool maintainer decides what a failure
//! means for the account.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// New credentials issued by the refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub id_token: String,
    /// Replacement refresh token, when the endpoint rotated it.
    pub refresh_token: Option<String>,
}

/// Wire shape of the endpoint's answer. Every field is optional so a 2xx
/// without an id token surfaces as `InvalidResponse` rather than a JSON error.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

/// Exchange `refresh` for a new id token at `url` (API key already attached).
pub async fn refresh_token(
    client: &reqwest::Client,
    url: Url,
    refresh: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(&RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!("token refresh timed out after {timeout:?}"))
            } else {
                Error::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let raw = response
        .json::<RawTokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("unparsable refresh body: {e}")))?;

    let id_token = raw
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidResponse("response carried no id_token".into()))?;

    Ok(TokenResponse {
        id_token,
        refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
    })
}

/// Refresh client bound to one endpoint and a rotating set of API keys.
pub struct RefreshClient {
    http: reqwest::Client,
    endpoint: String,
    api_keys: Vec<Secret<String>>,
    next_key: AtomicUsize,
    timeout: Duration,
}

impl RefreshClient {
    /// Build a client. At least one API key is required.
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_keys: Vec<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        if api_keys.is_empty() {
            return Err(Error::MissingApiKey);
        }
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_keys,
            next_key: AtomicUsize::new(0),
            timeout,
        })
    }

    /// Exchange `refresh` for a new id token.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenResponse> {
        let (index, key) = self.next_api_key();
        let url = Url::parse_with_params(&self.endpoint, &[("key", key.expose().as_str())])
            .map_err(|e| Error::Http(format!("invalid refresh endpoint: {e}")))?;
        debug!(key_index = index, "exchanging refresh token");
        refresh_token(&self.http, url, refresh, self.timeout).await
    }

    /// Round-robin over the configured keys.
    fn next_api_key(&self) -> (usize, &Secret<String>) {
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        (index, &self.api_keys[index])
    }
}
