//! Error types for token decoding and refresh

/// Errors from token decoding and the refresh exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure or timeout talking to the refresh endpoint.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The refresh endpoint answered with a non-2xx status.
    #[error("token refresh rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 2xx response that carried no usable id token.
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// The bearer token is not a decodable JWT with an `exp` claim.
    #[error("malformed bearer token: {0}")]
    Decode(String),

    #[error("no refresh API key configured")]
    MissingApiKey,
}

impl Error {
    /// HTTP status returned by the refresh endpoint, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;
