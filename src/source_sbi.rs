//! Bank card-rate PDF adapter.
//!
//! The bank publishes a single fixed-layout PDF per business day at a
//! stable URL; only the current day's document is ever available online.
//! Historical backfill therefore reads locally archived PDFs named
//! `YYYY-MM-DD.pdf` from the configured resource directory, and the live
//! endpoint serves the newest requested day.
//!
//! Each table row carries the reference rate followed by four buy/sell
//! spread pairs (TT, bill, travel card, currency note). Rows with an
//! unparseable rate are dropped with a warning; a drift in one row does
//! not fail the document.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::daterange::DateRange;
use crate::error::{IngestError, Result};
use crate::fetch::HttpClient;
use crate::models::{RateObservation, Source};
use crate::source::{FetchOutcome, SourceAdapter};

/// Currency names as printed in the PDF → ISO 4217.
const CURRENCY_ALIASES: [(&str, &str); 16] = [
    ("UAE DIRHAM", "AED"),
    ("AUS DOLLAR", "AUD"),
    ("CAD DOLLAR", "CAD"),
    ("DANISH KRONE", "DKK"),
    ("EURO", "EUR"),
    ("HK DOLLAR", "HKD"),
    ("JAP YEN", "JPY"),
    ("NOR KRONE", "NOK"),
    ("NZ DOLLAR", "NZD"),
    ("SWISS FRANC", "CHF"),
    ("SG DOLLAR", "SGD"),
    ("STERLING", "GBP"),
    ("SA RAND", "ZAR"),
    ("SAUDI RIYAL", "SAR"),
    ("SWED KRONA", "SEK"),
    ("USD", "USD"),
];

/// Three-letter tokens that look like codes but are column vocabulary.
const NOT_CURRENCIES: [&str; 4] = ["BUY", "PDF", "INR", "MIN"];

pub struct SbiAdapter {
    client: HttpClient,
    pdf_url: String,
    resource_dir: PathBuf,
    epoch: NaiveDate,
}

impl SbiAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(&config.fetch)?,
            pdf_url: config.sources.sbi.pdf_url.clone(),
            resource_dir: config.sources.sbi.resource_dir.clone(),
            epoch: config.sources.default_epoch,
        })
    }

    fn archived_pdf(&self, date: NaiveDate) -> Option<PathBuf> {
        let path = self.resource_dir.join(format!("{date}.pdf"));
        path.exists().then_some(path)
    }

    /// Dates with an archived PDF inside `window`, ascending.
    fn archived_dates(&self, window: DateRange) -> Vec<NaiveDate> {
        if !self.resource_dir.exists() {
            return Vec::new();
        }
        let mut dates: Vec<NaiveDate> = WalkDir::new(&self.resource_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| pdf_stem_date(entry.path()))
            .filter(|date| window.contains(*date))
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

fn pdf_stem_date(path: &Path) -> Option<NaiveDate> {
    if path.extension().and_then(|e| e.to_str())? != "pdf" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

#[async_trait]
impl SourceAdapter for SbiAdapter {
    fn source(&self) -> Source {
        Source::Sbi
    }

    fn description(&self) -> String {
        format!("card rate PDF ({})", self.pdf_url)
    }

    fn batches(&self, window: DateRange) -> Vec<DateRange> {
        // One parse call yields one published day: archived documents cover
        // the backfill, the live endpoint covers the newest requested day.
        let mut dates = self.archived_dates(window);
        if dates.last() != Some(&window.end) {
            dates.push(window.end);
        }
        dates.into_iter().map(DateRange::day).collect()
    }

    fn default_epoch(&self) -> NaiveDate {
        self.epoch
    }

    async fn fetch_and_parse(&self, window: DateRange) -> Result<FetchOutcome> {
        let day = window.start;
        let bytes = match self.archived_pdf(day) {
            Some(path) => {
                info!(%day, path = %path.display(), "parsing archived card-rate PDF");
                std::fs::read(&path).map_err(|e| IngestError::Parse {
                    src: Source::Sbi,
                    from: window.start,
                    to: window.end,
                    detail: format!("cannot read {}: {e}", path.display()),
                })?
            }
            None => {
                info!(%day, url = %self.pdf_url, "downloading latest card-rate PDF");
                self.client.get_bytes(Source::Sbi, &self.pdf_url).await?
            }
        };

        let text =
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| IngestError::Parse {
                src: Source::Sbi,
                from: window.start,
                to: window.end,
                detail: format!("PDF text extraction failed: {e}"),
            })?;

        let rate_date = infer_document_date(&text).unwrap_or(day);
        if rate_date < day {
            // The endpoint still serves an older business day's sheet; the
            // requested date has not been published yet.
            info!(%day, published = %rate_date, "card rates not yet published for requested day");
            return Ok(FetchOutcome::NoDataYet);
        }

        let rows = parse_card_rates(&text, rate_date);
        if rows.is_empty() {
            return Err(IngestError::Parse {
                src: Source::Sbi,
                from: window.start,
                to: window.end,
                detail: "document contains no recognizable rate rows".into(),
            });
        }
        Ok(FetchOutcome::Rates(rows))
    }
}

/// Find the publication date printed in the document. Tries ISO order
/// first, then the day-first spellings the bank has used.
pub fn infer_document_date(text: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];
    for token in text
        .split(|c: char| !(c.is_ascii_digit() || c == '-' || c == '/'))
        .filter(|t| t.len() >= 8)
    {
        for fmt in FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(token, fmt) {
                return Some(date);
            }
        }
    }
    None
}

/// Parse the extracted text layer into card-rate rows.
///
/// Column order per row: reference rate, TT buy/sell, bill buy/sell,
/// travel-card buy/sell, currency-note buy/sell. Trailing columns may be
/// absent on partial rows and map to `None`.
pub fn parse_card_rates(text: &str, rate_date: NaiveDate) -> Vec<RateObservation> {
    // Last row per currency wins; the sheet repeats some currencies in a
    // summary block with identical values.
    let mut rows: BTreeMap<String, RateObservation> = BTreeMap::new();

    for line in text.to_uppercase().lines() {
        let line = line.replace([',', '\t'], " ");
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((code, rest)) = match_currency(trimmed) else {
            continue;
        };
        let numbers: Vec<f64> = rest
            .split_whitespace()
            .map_while(|token| token.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect();
        let Some(&rate) = numbers.first() else {
            warn!(currency = %code, line = trimmed, "dropping card-rate row without a numeric rate");
            continue;
        };
        let field = |idx: usize| numbers.get(idx).copied();
        rows.insert(
            code.clone(),
            RateObservation {
                source: Source::Sbi,
                rate_date,
                currency: code,
                rate,
                tt_buy: field(1),
                tt_sell: field(2),
                bill_buy: field(3),
                bill_sell: field(4),
                travel_card_buy: field(5),
                travel_card_sell: field(6),
                cn_buy: field(7),
                cn_sell: field(8),
            },
        );
    }
    rows.into_values().collect()
}

/// Match the currency label at the start of a row: a printed alias first,
/// else a bare three-letter code. Returns the ISO code and the remainder of
/// the line after the label.
fn match_currency(line: &str) -> Option<(String, &str)> {
    for (alias, code) in CURRENCY_ALIASES {
        if let Some(rest) = line.strip_prefix(alias) {
            return Some((code.to_string(), rest));
        }
    }
    let first = line.split_whitespace().next()?;
    if first.len() == 3
        && first.chars().all(|c| c.is_ascii_uppercase())
        && !NOT_CURRENCIES.contains(&first)
    {
        let rest = line.strip_prefix(first).unwrap_or("");
        return Some((first.to_string(), rest));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const CARD_SHEET: &str = "\
STATE BANK FOREX CARD RATES Date: 18-11-2025
CURRENCY RATE TT BUY TT SELL BILL BUY BILL SELL TC BUY TC SELL CN BUY CN SELL
USD 88.65 88.10 89.05 88.00 89.15 87.90 89.30 87.70 89.50
EURO 102.90 102.20 103.55 102.05 103.70 101.90 103.90 101.60 104.10
STERLING 116.70 115.95 117.45 115.80 117.60 115.60 117.85 115.30 118.10
JAP YEN 0.5736 0.5690 0.5782 0.5680 0.5790
UAE DIRHAM 24.14 23.95 24.32 23.90 24.38 23.80 24.45 23.70 24.55
SG DOLLAR not-a-number
";

    #[test]
    fn parses_fixed_column_rows() {
        let rows = parse_card_rates(CARD_SHEET, d(2025, 11, 18));
        let by_code: BTreeMap<&str, &RateObservation> =
            rows.iter().map(|r| (r.currency.as_str(), r)).collect();

        let usd = by_code["USD"];
        assert!((usd.rate - 88.65).abs() < 1e-9);
        assert_eq!(usd.tt_buy, Some(88.10));
        assert_eq!(usd.cn_sell, Some(89.50));

        let eur = by_code["EUR"];
        assert!((eur.rate - 102.90).abs() < 1e-9);
        let gbp = by_code["GBP"];
        assert_eq!(gbp.bill_sell, Some(117.60));
        let aed = by_code["AED"];
        assert_eq!(aed.travel_card_buy, Some(23.80));
    }

    #[test]
    fn partial_rows_get_none_spreads() {
        let rows = parse_card_rates(CARD_SHEET, d(2025, 11, 18));
        let jpy = rows.iter().find(|r| r.currency == "JPY").unwrap();
        assert_eq!(jpy.bill_sell, Some(0.5790));
        assert_eq!(jpy.travel_card_buy, None);
        assert_eq!(jpy.cn_sell, None);
    }

    #[test]
    fn unparseable_rows_are_dropped_not_fatal() {
        let rows = parse_card_rates(CARD_SHEET, d(2025, 11, 18));
        assert!(rows.iter().all(|r| r.currency != "SGD"));
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn header_vocabulary_is_not_a_currency() {
        let rows = parse_card_rates("TT BUY 12.5 13.5", d(2025, 11, 18));
        assert!(rows.is_empty());
    }

    #[test]
    fn document_date_inference() {
        assert_eq!(
            infer_document_date("rates as of 18-11-2025 10:00 IST"),
            Some(d(2025, 11, 18))
        );
        assert_eq!(
            infer_document_date("generated 2025-11-18"),
            Some(d(2025, 11, 18))
        );
        assert_eq!(infer_document_date("no date here"), None);
    }

    #[test]
    fn stem_dates() {
        assert_eq!(
            pdf_stem_date(Path::new("resources/2025-11-18.pdf")),
            Some(d(2025, 11, 18))
        );
        assert_eq!(pdf_stem_date(Path::new("resources/latest.pdf")), None);
        assert_eq!(pdf_stem_date(Path::new("resources/2025-11-18.txt")), None);
    }
}
