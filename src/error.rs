//! Application-wide error types.
//!
//! Library modules return a specific [`Error`] variant via `thiserror`; the
//! binary entry point (`main.rs`) wraps everything in `anyhow::Result` for
//! convenient `?`-propagation and top-level context.
//!
//! # Design
//!
//! - [`Error`]: top-level error enum aggregating every subsystem's failure
//!   modes named in the appliance's error handling design.
//! - All variants implement `std::error::Error` for compatibility.

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content store error
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Database migration failed
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Referenced entity absent from the content store
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-path or duplicate-insert violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// The external player connection could not be established
    #[error("player unreachable: {0}")]
    PlayerUnreachable(String),

    /// The external player returned an error for a specific command
    #[error("player rejected command: {0}")]
    PlayerRejected(String),

    /// A path the player does not yet recognise
    #[error("player does not recognise file: {0}")]
    Unrecognised(PathBuf),

    /// Capture subprocess failed to start or exited abnormally
    #[error("capture failed: {0}")]
    Capture(String),

    /// A capture is already running
    #[error("capture already in progress")]
    AlreadyCapturing,

    /// Cut/transcode subprocess failed
    #[error("cut failed: {0}")]
    Cut(String),

    /// Action invoked from a mode that does not permit it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A queue load found nothing eligible to play
    #[error("queue is empty")]
    Empty,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with added context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Storage(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("topic 42");
        assert!(err.to_string().contains("topic 42"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::Empty.context("loading global-topic queue");
        let msg = err.to_string();
        assert!(msg.contains("loading global-topic queue"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::AlreadyCapturing);
        let with_ctx = result.with_context("handling start-recording");
        assert!(with_ctx.unwrap_err().to_string().contains("handling start-recording"));
    }
}
