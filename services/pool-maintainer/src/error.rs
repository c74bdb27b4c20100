//! Service-specific error types

use thiserror::Error;

/// Operator-surface errors. Startup failures (config, database, HTTP
/// client) go through `anyhow` in `main` instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown mode `{0}` (expected run, status, verify, purge or interactive)")]
    UnknownMode(String),

    #[error("operator console I/O failed: {0}")]
    Console(#[from] std::io::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = Error::UnknownMode("serve".into());
        assert!(err.to_string().contains("`serve`"));
        assert!(err.to_string().contains("interactive"));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed");
        assert!(Error::from(io).to_string().contains("stdout closed"));
    }
}
