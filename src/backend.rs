//! Persistence gateway: the backend-agnostic storage contract.
//!
//! The ingestion engine, query engine, and migration runner depend only on
//! [`Backend`]; each storage flavor (embedded SQLite, relational Postgres,
//! document-store) implements it once. Business invariants (natural-key
//! uniqueness, checkpoint monotonicity relative to committed writes) are
//! enforced by the callers; the backend owns only the physical layout.
//!
//! # Ordering contract
//!
//! [`Backend::fetch_rates`] without a source filter returns bank-published
//! (SBI) rows before archive (RBI) rows for the same date, reflecting
//! publication-time precedence. Within a source, rows are ordered by
//! `rate_date` ascending.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    Checkpoint, CommodityObservation, Metal, PersistenceResult, RateObservation, Source,
};

/// Row count for one table/collection, used by `fxi stats` and migration
/// progress reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

/// A storage backend holding forex rows, commodity rows, and checkpoints.
///
/// Implementations must be `Send + Sync`; one backend instance wraps one
/// connection pool and is reused across calls. Callers wanting parallel
/// ingestion of independent sources should construct separate instances.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend flavor identifier (`"sqlite"`, `"postgres"`, `"document"`).
    fn name(&self) -> &'static str;

    /// Human-readable connection target (file path or redacted URL).
    fn describe(&self) -> String;

    /// Create tables/collections and indexes. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert-or-overwrite forex rows on `(source, rate_date, currency)`.
    async fn upsert_rates(&self, rows: &[RateObservation]) -> Result<PersistenceResult>;

    /// Insert-or-overwrite commodity rows on `(metal, rate_date)`.
    async fn upsert_commodities(&self, rows: &[CommodityObservation])
        -> Result<PersistenceResult>;

    /// Forex rows constrained by the optional date window and source filter.
    async fn fetch_rates(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        source: Option<Source>,
    ) -> Result<Vec<RateObservation>>;

    /// Commodity rows for one metal constrained by the optional window.
    async fn fetch_commodities(
        &self,
        metal: Metal,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CommodityObservation>>;

    /// Most recent `rate_date` with any committed row for `source`.
    async fn latest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>>;

    /// Oldest `rate_date` with any committed row for `source`. Used by the
    /// migration runner to bound its date-window chunks.
    async fn earliest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>>;

    async fn get_checkpoint(&self, source: Source) -> Result<Option<NaiveDate>>;

    /// Advance the checkpoint for `source`. Never moves the date backward:
    /// a `date` at or before the stored value is a no-op.
    async fn set_checkpoint(&self, source: Source, date: NaiveDate) -> Result<()>;

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>>;

    /// Row counts per table/collection.
    async fn table_counts(&self) -> Result<Vec<TableCount>>;

    /// Connectivity probe. Returns `(true, None)` or `(false, driver error
    /// text)`; never errors and never panics.
    async fn test_connection(&self) -> (bool, Option<String>);

    /// Release the underlying pool.
    async fn close(&self);
}
