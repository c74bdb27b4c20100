//! Remaining-request lookup against the GraphQL quota endpoint
//!
//! One POST per account: the `GetRequestLimitInfo` operation with the id
//! token as bearer. Remaining quota is `requestLimit - requestsUsedSinceLastRefresh`
//! and may be negative when the upstream over-counts.

use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Value, json};
use token_auth::QUOTA_OPERATION;
use tracing::debug;

use crate::error::{Error, Result};

const QUOTA_QUERY: &str = "query GetRequestLimitInfo($requestContext: RequestContext!) {\n  user(requestContext: $requestContext) {\n    __typename\n    ... on UserOutput {\n      user {\n        requestLimitInfo {\n          requestLimit\n          requestsUsedSinceLastRefresh\n        }\n      }\n    }\n  }\n}\n";

/// Request allowance reported for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaInfo {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
}

/// Quota endpoint client sharing the service-wide HTTP client.
#[derive(Debug, Clone)]
pub struct QuotaClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl QuotaClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Remaining requests for the account holding `id_token`.
    ///
    /// An empty token fails without touching the network.
    pub async fn remaining_quota(&self, id_token: &str) -> Result<QuotaInfo> {
        if id_token.is_empty() {
            return Err(Error::Quota("missing token".into()));
        }
        let url = Url::parse_with_params(&self.endpoint, &[("op", QUOTA_OPERATION)])
            .map_err(|e| Error::Quota(format!("invalid quota endpoint: {e}")))?;

        let body = json!({
            "operationName": QUOTA_OPERATION,
            "variables": {
                "requestContext": {
                    "clientContext": {},
                    "osContext": {},
                }
            },
            "query": QUOTA_QUERY,
        });

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(id_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Quota(format!("timed out after {:?}", self.timeout))
                } else {
                    Error::Quota(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Quota(format!("HTTP {}", status.as_u16())));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Quota(format!("unparsable response: {e}")))?;
        let info = parse_quota_response(&payload)?;
        debug!(
            limit = info.limit,
            used = info.used,
            remaining = info.remaining,
            "quota lookup succeeded"
        );
        Ok(info)
    }
}

/// Extract the request allowance from a GraphQL answer.
///
/// A non-empty `errors` array wins over any data present alongside it.
pub fn parse_quota_response(payload: &Value) -> Result<QuotaInfo> {
    let first_error = payload
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first());
    if let Some(error) = first_error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(Error::Quota(message.to_string()));
    }

    let info = payload
        .pointer("/data/user/user/requestLimitInfo")
        .ok_or_else(|| Error::Quota("malformed response".into()))?;
    let limit = info.get("requestLimit").and_then(Value::as_i64);
    let used = info
        .get("requestsUsedSinceLastRefresh")
        .and_then(Value::as_i64);

    let (Some(limit), Some(used)) = (limit, used) else {
        return Err(Error::Quota("malformed response".into()));
    };
    let remaining = limit
        .checked_sub(used)
        .ok_or_else(|| Error::Quota("malformed response".into()))?;
    Ok(QuotaInfo {
        limit,
        used,
        remaining,
    })
}
