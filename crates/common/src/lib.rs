//! Types shared by the account pool crates and the maintainer binary

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
