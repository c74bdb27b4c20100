//! Upstream endpoints and default freshness policy

use std::time::Duration;

/// Secure token endpoint that exchanges a refresh token for a new id token.
/// The API key travels as the `key` query parameter.
pub const REFRESH_ENDPOINT: &str = "https://securetoken.googleapis.com/v1/token";

/// GraphQL endpoint reporting the per-account request allowance.
pub const QUOTA_ENDPOINT: &str = "https://app.warp.dev/graphql/v2";

/// GraphQL operation name for the quota lookup (also sent as `?op=`).
pub const QUOTA_OPERATION: &str = "GetRequestLimitInfo";

/// Tokens expiring within this window are treated as expired.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(10 * 60);

/// Minimum interval between two refreshes of the same account.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Per-request timeout for the refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
