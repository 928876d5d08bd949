//! Metals-exchange cash-seller table adapter.
//!
//! The exchange mirror publishes one HTML table per year of daily cash,
//! three-month, and stock figures for each metal. Header labels drift
//! between revisions (wording, column order), so columns are matched by
//! label keywords rather than position, and header echoes inside a table
//! body simply re-map the columns.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use crate::config::Config;
use crate::daterange::DateRange;
use crate::error::{IngestError, Result};
use crate::fetch::HttpClient;
use crate::models::{CommodityObservation, Metal, Source};
use crate::source::{FetchOutcome, SourceAdapter};
use crate::workbook::extract_rows;

const DATE_KEYWORDS: [&str; 2] = ["date", "datum"];
const CASH_KEYWORDS: [&str; 3] = ["cash", "settlement", "seller"];
const THREE_MONTH_KEYWORDS: [&str; 3] = ["3-month", "3 month", "3months"];
const STOCK_KEYWORDS: [&str; 2] = ["stock", "bestand"];

const DATE_FORMATS: [&str; 5] = ["%d. %B %Y", "%d %B %Y", "%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

pub struct LmeAdapter {
    client: HttpClient,
    metal: Metal,
    url: String,
    epoch: NaiveDate,
}

impl LmeAdapter {
    pub fn new(metal: Metal, config: &Config) -> Result<Self> {
        let url = match metal {
            Metal::Copper => config.sources.lme.copper_url.clone(),
            Metal::Aluminum => config.sources.lme.aluminum_url.clone(),
        };
        Ok(Self {
            client: HttpClient::new(&config.fetch)?,
            metal,
            url,
            epoch: config.sources.default_epoch,
        })
    }
}

#[async_trait]
impl SourceAdapter for LmeAdapter {
    fn source(&self) -> Source {
        self.metal.source()
    }

    fn description(&self) -> String {
        format!("{} cash-seller table ({})", self.metal, self.url)
    }

    fn batches(&self, window: DateRange) -> Vec<DateRange> {
        // The upstream table carries full history; one fetch covers any
        // window.
        vec![window]
    }

    fn default_epoch(&self) -> NaiveDate {
        self.epoch
    }

    async fn fetch_and_parse(&self, window: DateRange) -> Result<FetchOutcome> {
        info!(metal = %self.metal, window = %window, "fetching cash-seller table");
        let html = self.client.get_text(self.source(), &self.url).await?;
        let rows = parse_price_table(&html, self.metal).map_err(|detail| IngestError::Parse {
            src: self.source(),
            from: window.start,
            to: window.end,
            detail,
        })?;
        let in_window: Vec<CommodityObservation> = rows
            .into_iter()
            .filter(|row| window.contains(row.rate_date))
            .collect();
        // An empty window is an explicit answer here, not a soft stop: the
        // table exists and simply has no trading days in range.
        Ok(FetchOutcome::Commodities(in_window))
    }
}

/// Column indices resolved from a header row.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    date: usize,
    cash: Option<usize>,
    three_month: Option<usize>,
    stock: Option<usize>,
}

fn match_header(cells: &[String]) -> Option<ColumnMap> {
    let lower: Vec<String> = cells.iter().map(|c| c.to_lowercase()).collect();
    let find = |keywords: &[&str]| {
        lower
            .iter()
            .position(|cell| keywords.iter().any(|k| cell.contains(k)))
    };
    let date = find(&DATE_KEYWORDS)?;
    let cash = find(&CASH_KEYWORDS);
    let three_month = find(&THREE_MONTH_KEYWORDS);
    let stock = find(&STOCK_KEYWORDS);
    if cash.is_none() && three_month.is_none() && stock.is_none() {
        return None;
    }
    Some(ColumnMap {
        date,
        cash,
        three_month,
        stock,
    })
}

/// Parse every table in the page into observations for `metal`.
///
/// Returns an error only when no table with a recognizable header exists at
/// all (structural drift, not an empty trading window).
pub fn parse_price_table(html: &str, metal: Metal) -> std::result::Result<Vec<CommodityObservation>, String> {
    let rows = extract_rows(html.as_bytes()).map_err(|e| e.to_string())?;

    let mut columns: Option<ColumnMap> = None;
    let mut observations = Vec::new();
    for cells in &rows {
        if let Some(map) = match_header(cells) {
            columns = Some(map);
            continue;
        }
        let Some(map) = columns else { continue };
        let Some(date_cell) = cells.get(map.date) else {
            continue;
        };
        let Some(rate_date) = parse_table_date(date_cell) else {
            continue;
        };
        let number_at = |idx: Option<usize>| idx.and_then(|i| cells.get(i)).and_then(|c| parse_number(c));
        let price = number_at(map.cash);
        let price_3_month = number_at(map.three_month);
        let stock = number_at(map.stock).map(|v| v.round() as i64);
        if price.is_none() && price_3_month.is_none() && stock.is_none() {
            continue;
        }
        observations.push(CommodityObservation {
            metal,
            rate_date,
            price,
            price_3_month,
            stock,
        });
    }

    if columns.is_none() {
        return Err("no price table with a recognizable header found".into());
    }
    Ok(observations)
}

fn parse_table_date(value: &str) -> Option<NaiveDate> {
    let cleaned = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok())
}

fn parse_number(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const TABLE: &str = r#"
        <table>
            <tr><th>date</th><th>LME Copper Cash-Settlement</th><th>LME Copper 3-month</th><th>LME Copper stock</th></tr>
            <tr><td>17. November 2025</td><td>10,812.50</td><td>10,755.00</td><td>136,525</td></tr>
            <tr><td>18. November 2025</td><td>10,790.00</td><td>-</td><td>135,900</td></tr>
            <tr><td>date</td><td>LME Copper Cash-Settlement</td><td>LME Copper 3-month</td><td>LME Copper stock</td></tr>
            <tr><td>19. November 2025</td><td>10,801.25</td><td>10,760.50</td><td>135,400</td></tr>
        </table>
    "#;

    #[test]
    fn parses_labeled_columns() {
        let rows = parse_price_table(TABLE, Metal::Copper).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].rate_date, d(2025, 11, 17));
        assert_eq!(rows[0].price, Some(10812.50));
        assert_eq!(rows[0].price_3_month, Some(10755.00));
        assert_eq!(rows[0].stock, Some(136_525));
    }

    #[test]
    fn missing_cells_become_none() {
        let rows = parse_price_table(TABLE, Metal::Copper).unwrap();
        assert_eq!(rows[1].price_3_month, None);
        assert_eq!(rows[1].price, Some(10790.00));
    }

    #[test]
    fn column_order_drift_is_tolerated() {
        let shuffled = r#"
            <table>
                <tr><th>stock</th><th>datum</th><th>cash seller</th></tr>
                <tr><td>99,000</td><td>2025-11-17</td><td>2,710.25</td></tr>
            </table>
        "#;
        let rows = parse_price_table(shuffled, Metal::Aluminum).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stock, Some(99_000));
        assert_eq!(rows[0].price, Some(2710.25));
        assert_eq!(rows[0].price_3_month, None);
    }

    #[test]
    fn page_without_price_table_is_an_error() {
        assert!(parse_price_table("<table><tr><td>hello</td></tr></table>", Metal::Copper).is_err());
    }

    #[test]
    fn header_echo_rows_do_not_become_data() {
        let rows = parse_price_table(TABLE, Metal::Copper).unwrap();
        assert!(rows.iter().all(|r| r.rate_date.year() >= 2025));
    }
}
