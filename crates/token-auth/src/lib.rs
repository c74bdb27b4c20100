//! Bearer token freshness and refresh for pooled accounts
//!
//! Each pooled account carries a long-lived refresh token and a short-lived
//! id token (a JWT whose payload carries an `exp` claim). This crate answers
//! two questions and performs one network call:
//!
//! 1. `claims::is_expired()`: is the id token expired or about to expire?
//! 2. `claims::can_refresh()`: has the refresh cooldown elapsed?
//! 3. `token::RefreshClient::refresh()`: trade the refresh token for a new id token
//!
//! The refresh endpoint rate-limits refreshes per account, so callers must
//! consult `can_refresh()` before every call to `refresh()`.

pub mod claims;
pub mod constants;
pub mod error;
pub mod token;

pub use claims::{can_refresh, can_refresh_at, decode_expiry, is_expired, is_expired_at};
pub use constants::*;
pub use error::{Error, Result};
pub use token::{RefreshClient, TokenResponse, refresh_token};
