//! Error taxonomy for the ingestion pipeline.
//!
//! Adapters raise `TransientFetch` and `Parse`; the ingestion engine alone
//! decides retry vs. abort. The persistence gateway wraps driver failures in
//! `Connectivity` with the driver's message preserved verbatim. Soft stops
//! are not errors; they travel through `FetchOutcome::NoDataYet`.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Source;

/// Earliest date the central-bank archive serves reference rates for.
pub const RBI_MIN_AVAILABLE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2022, 4, 12) {
    Some(d) => d,
    None => unreachable!(),
};

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network-level failure (timeout, refused connection, throttling).
    /// Retried with backoff up to the configured bound.
    #[error("transient fetch failure for {src}: {detail}")]
    TransientFetch { src: Source, detail: String },

    /// The upstream document exists but its structure does not match what
    /// the adapter expects. Hard failure; aborts the current batch.
    #[error("parse failure for {src} ({from} to {to}): {detail}")]
    Parse {
        src: Source,
        from: NaiveDate,
        to: NaiveDate,
        detail: String,
    },

    /// A parsed row failed schema/type checks. Reported per-row; the engine
    /// drops the row with a warning rather than propagating this.
    #[error("row validation failed: {0}")]
    Validation(String),

    /// The storage backend is unreachable or rejected the operation. The
    /// driver's own message is carried through untouched.
    #[error("backend connectivity failure: {0}")]
    Connectivity(String),

    #[error("start date must not be after end date")]
    InvalidWindow,

    #[error("RBI do not provide the data before 12/04/2022")]
    RbiMinDate,

    #[error("unsupported LME metal: {0}")]
    UnsupportedMetal(String),

    #[error("unsupported database URL scheme '{0}': use sqlite:, postgres:, or doc+postgres:")]
    UnsupportedBackend(String),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientFetch { .. })
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Connectivity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = IngestError::TransientFetch {
            src: Source::Rbi,
            detail: "timeout".into(),
        };
        assert!(err.is_transient());
        assert!(!IngestError::Connectivity("down".into()).is_transient());
    }

    #[test]
    fn min_date_message_matches_upstream_wording() {
        assert_eq!(
            IngestError::RbiMinDate.to_string(),
            "RBI do not provide the data before 12/04/2022"
        );
    }
}
