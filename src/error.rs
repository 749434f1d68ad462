//! Application-wide error types.
//!
//! This module provides a unified error hierarchy for the application.
//! Every module returns this `Error` type directly; there is no separate
//! top-level glue error, since every command surface handler degrades a
//! failure to a fallback or an exit code rather than propagating one out
//! of `main`.
//!
//! Most of these variants are never allowed to reach the caller of
//! `pick-next` unhandled — they are matched on and degraded to a fallback
//! path by the picker and command surface instead.

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store could not be opened or migrated at all.
    ///
    /// Callers fall back to a filesystem-only quick random dart rather
    /// than treating this as fatal.
    #[error("store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// A transient lock or disk-full condition during a write.
    ///
    /// Callers skip the optional write and still emit a path.
    #[error("store busy: {0}")]
    StoreBusy(sqlx::Error),

    /// Any other store-layer failure.
    #[error("store error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed during `open`.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The tag probe timed out, crashed, or produced unparseable output.
    ///
    /// Never propagated past the probe boundary — the file is still
    /// recorded with null tags and joins the unknown-artist bucket.
    #[error("probe failure for {path}: {reason}")]
    ProbeFailure { path: PathBuf, reason: String },

    /// Another scanner process holds a non-stale scan lock.
    #[error("scan lock held since {held_since}")]
    ScanLockHeld { held_since: i64 },

    /// The picker found nothing to play at all (empty library, empty dirs).
    #[error("no candidate tracks available")]
    NoCandidates,

    /// Configuration error (env var failed to parse).
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with attached context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a probe-failure error.
    pub fn probe_failure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProbeFailure {
            path: path.into(),
            reason: reason.into(),
        }
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

    /// True for conditions that should skip the optional write rather
    /// than fail the pick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreBusy(_) | Error::ScanLockHeld { .. })
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
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_failure_carries_path_and_reason() {
        let err = Error::probe_failure("/music/a.mp3", "timed out");
        let msg = err.to_string();
        assert!(msg.contains("a.mp3"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn context_wraps_source() {
        let err = Error::NoCandidates.context("during pick-next");
        assert!(err.to_string().contains("during pick-next"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::ScanLockHeld { held_since: 0 }.is_transient());
        assert!(!Error::NoCandidates.is_transient());
    }

    #[test]
    fn config_error_display() {
        let err = Error::config("LS_ARTIST_SEP_MIN must be an integer");
        assert!(err.to_string().contains("LS_ARTIST_SEP_MIN"));
    }
}
