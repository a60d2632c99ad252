//! Error types shared across the ingestion pipeline.

/// Errors that can cross an `async_trait` boundary in this workspace.
///
/// Per-item failures (a malformed row, a single failed batch insert) are
/// logged and contained at the call site rather than surfaced here; this
/// enum is for conditions that should abort the run.
#[derive(Debug, thiserror::Error)]
pub enum CnpjError {
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("month {0} is not available for download")]
    MonthUnavailable(String),

    #[error("{0} is not a valid MM/YYYY period")]
    InvalidPeriod(String),

    #[error("no target table matches archive stem '{0}'")]
    UnknownArchiveStem(String),

    #[error("local archive set does not match the remote set for {0}")]
    ValidationMismatch(String),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CnpjError>;
