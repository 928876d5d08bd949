//! Source adapter contract and dispatch.
//!
//! Adapters are stateless transformers: raw upstream documents in,
//! canonical rows out. They own no persisted state and never retry; the
//! ingestion engine drives retries, batching order, and checkpointing.
//!
//! Per-source quirks (single-day PDF vs. ranged workbook vs. full-history
//! table) live behind [`SourceAdapter::batches`], so the engine contains no
//! source-specific branching beyond constructing the right adapter.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::Config;
use crate::daterange::DateRange;
use crate::error::Result;
use crate::models::{CommodityObservation, Metal, RateObservation, Source};
use crate::source_lme::LmeAdapter;
use crate::source_rbi::RbiAdapter;
use crate::source_sbi::SbiAdapter;

/// Result of one `fetch_and_parse` call.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Forex rows. May legitimately be empty for an in-range holiday.
    Rates(Vec<RateObservation>),
    /// Commodity rows. An empty vector is an explicit "no rows in window"
    /// answer, distinct from a transport failure.
    Commodities(Vec<CommodityObservation>),
    /// The upstream explicitly has no data for the requested date yet
    /// (weekend, holiday, or same-day query before publication). Soft stop:
    /// the engine ends the run cleanly without treating it as a failure.
    NoDataYet,
}

/// A fetch-and-parse adapter for one upstream source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// One-line description shown by `fxi sources`.
    fn description(&self) -> String;

    /// Split the requested window into the fetch units this source supports
    /// (calendar months for the archive, single days for the bank PDF, the
    /// whole window for the exchange table). Returned batches are disjoint
    /// and ordered ascending.
    fn batches(&self, window: DateRange) -> Vec<DateRange>;

    /// Earliest date this source can serve when no checkpoint exists and the
    /// caller gave no explicit start.
    fn default_epoch(&self) -> NaiveDate;

    /// Reject windows this source can never serve (e.g. before the archive
    /// floor). Called by the engine before any fetch.
    fn validate_window(&self, _window: DateRange) -> Result<()> {
        Ok(())
    }

    /// Fetch the raw document(s) for `window` and parse them into canonical
    /// rows. Exactly one attempt; transient transport failures surface as
    /// [`crate::error::IngestError::TransientFetch`] for the engine to retry.
    async fn fetch_and_parse(&self, window: DateRange) -> Result<FetchOutcome>;
}

/// Construct the adapter for a source from configuration.
pub fn adapter_for(source: Source, config: &Config) -> Result<Box<dyn SourceAdapter>> {
    Ok(match source {
        Source::Rbi => Box::new(RbiAdapter::new(config)?),
        Source::Sbi => Box::new(SbiAdapter::new(config)?),
        Source::LmeCopper => Box::new(LmeAdapter::new(Metal::Copper, config)?),
        Source::LmeAluminum => Box::new(LmeAdapter::new(Metal::Aluminum, config)?),
    })
}
