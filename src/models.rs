//! Core data models shared across adapters, the ingestion engine, and the
//! persistence gateway.
//!
//! Rows are identified by natural keys: `(source, rate_date, currency)` for
//! forex observations, `(metal, rate_date)` for commodity observations.
//! Every write path upserts on that key, so re-ingestion never duplicates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A data source tracked by the ingestion engine.
///
/// The canonical string form (`as_str`) is the checkpoint key and the CLI
/// argument spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Rbi,
    Sbi,
    LmeCopper,
    LmeAluminum,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Rbi => "RBI",
            Source::Sbi => "SBI",
            Source::LmeCopper => "LME_COPPER",
            Source::LmeAluminum => "LME_ALUMINUM",
        }
    }

    /// Parse a user-supplied source name. Accepts the canonical forms plus
    /// the metal aliases the exchange data is commonly referred to by.
    pub fn parse(value: &str) -> Option<Source> {
        match value.to_ascii_uppercase().replace('-', "_").as_str() {
            "RBI" => Some(Source::Rbi),
            "SBI" => Some(Source::Sbi),
            "LME_COPPER" | "COPPER" | "CU" => Some(Source::LmeCopper),
            "LME_ALUMINUM" | "LME_ALUMINIUM" | "ALUMINUM" | "ALUMINIUM" | "AL" => {
                Some(Source::LmeAluminum)
            }
            _ => None,
        }
    }

    pub fn is_forex(&self) -> bool {
        matches!(self, Source::Rbi | Source::Sbi)
    }

    pub fn metal(&self) -> Option<Metal> {
        match self {
            Source::LmeCopper => Some(Metal::Copper),
            Source::LmeAluminum => Some(Metal::Aluminum),
            _ => None,
        }
    }

    pub const ALL: [Source; 4] = [
        Source::Rbi,
        Source::Sbi,
        Source::LmeCopper,
        Source::LmeAluminum,
    ];
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An LME metal with its own price table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metal {
    Copper,
    Aluminum,
}

impl Metal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metal::Copper => "COPPER",
            Metal::Aluminum => "ALUMINUM",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Metal::Copper => "lme_copper_rates",
            Metal::Aluminum => "lme_aluminum_rates",
        }
    }

    pub fn source(&self) -> Source {
        match self {
            Metal::Copper => Source::LmeCopper,
            Metal::Aluminum => Source::LmeAluminum,
        }
    }
}

impl std::fmt::Display for Metal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized forex rate row.
///
/// `rate` is the reference (spot) value in local currency per foreign unit.
/// The buy/sell spread fields are only populated for SBI card-rate rows; the
/// central-bank archive publishes the reference rate alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub source: Source,
    pub rate_date: NaiveDate,
    pub currency: String,
    pub rate: f64,
    pub tt_buy: Option<f64>,
    pub tt_sell: Option<f64>,
    pub bill_buy: Option<f64>,
    pub bill_sell: Option<f64>,
    pub travel_card_buy: Option<f64>,
    pub travel_card_sell: Option<f64>,
    pub cn_buy: Option<f64>,
    pub cn_sell: Option<f64>,
}

impl RateObservation {
    /// A reference-rate-only row (the RBI shape).
    pub fn reference(source: Source, rate_date: NaiveDate, currency: &str, rate: f64) -> Self {
        Self {
            source,
            rate_date,
            currency: currency.to_string(),
            rate,
            tt_buy: None,
            tt_sell: None,
            bill_buy: None,
            bill_sell: None,
            travel_card_buy: None,
            travel_card_sell: None,
            cn_buy: None,
            cn_sell: None,
        }
    }
}

/// A single normalized commodity price row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityObservation {
    pub metal: Metal,
    pub rate_date: NaiveDate,
    /// Cash-seller (spot) price.
    pub price: Option<f64>,
    /// Three-month forward price.
    pub price_3_month: Option<f64>,
    /// Exchange inventory.
    pub stock: Option<i64>,
}

/// Persisted last-ingested date for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: Source,
    pub last_ingested_date: NaiveDate,
}

/// Per-batch write accounting returned by the persistence gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceResult {
    pub inserted: u64,
    pub updated: u64,
}

impl PersistenceResult {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn absorb(&mut self, other: PersistenceResult) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Why an ingestion run ended before its requested window was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Upstream has not published data for the requested date yet.
    NoDataPublished,
    /// The caller's cancellation flag was raised between batches.
    Cancelled,
}

/// Structured outcome of one `ingest` call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub source: Source,
    pub inserted_count: u64,
    pub updated_count: u64,
    /// Rows dropped by validation plus batches skipped as already ingested.
    pub skipped_count: u64,
    pub last_date_reached: Option<NaiveDate>,
    pub stopped_early: bool,
    pub stop_reason: Option<StopReason>,
    pub dry_run: bool,
}

impl IngestionReport {
    pub fn new(source: Source, dry_run: bool) -> Self {
        Self {
            source,
            inserted_count: 0,
            updated_count: 0,
            skipped_count: 0,
            last_date_reached: None,
            stopped_early: false,
            stop_reason: None,
            dry_run,
        }
    }
}

/// Cumulative row counts reported by the migration runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub rbi_rows: u64,
    pub sbi_rows: u64,
    pub lme_copper_rows: u64,
    pub lme_aluminum_rows: u64,
    pub checkpoints: u64,
}

impl MigrationReport {
    pub fn total_rows(&self) -> u64 {
        self.rbi_rows + self.sbi_rows + self.lme_copper_rows + self.lme_aluminum_rows
    }
}
