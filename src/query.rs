//! Read-side query engine: blended rate snapshots, history with frequency
//! reduction, and commodity history.
//!
//! A snapshot is one `(rate_date, source)` pair with all of that source's
//! currencies for the day. Blended queries (no source filter) order the
//! bank-published snapshot before the archive snapshot for the same date,
//! mirroring the gateway's publication-time row ordering.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::error::{IngestError, Result};
use crate::models::{CommodityObservation, Metal, Source};

/// Aggregation granularity for history queries. Weekly/monthly/yearly keep
/// the **last** observation date inside each bucket, never an average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn parse(value: &str) -> Result<Frequency> {
        match value.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(IngestError::Validation(format!(
                "frequency must be one of daily, weekly, monthly, yearly (got '{other}')"
            ))),
        }
    }
}

/// One source's currency map for one date, in the wire shape used by the
/// CLI and downstream consumers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RateSnapshot {
    pub rate_date: NaiveDate,
    pub base_currency: String,
    pub source: Source,
    pub rates: BTreeMap<String, f64>,
}

const BASE_CURRENCY: &str = "INR";

/// Sources in blended precedence order.
const BLEND_ORDER: [Source; 2] = [Source::Sbi, Source::Rbi];

/// Snapshot(s) for `date`, or for the most recent date with data when no
/// date is given. With no source filter, both sources' snapshots for the
/// target date are returned, bank-published first.
pub async fn rate_snapshots(
    backend: &dyn Backend,
    date: Option<NaiveDate>,
    source: Option<Source>,
) -> Result<Vec<RateSnapshot>> {
    let rows = backend.fetch_rates(date, date, source).await?;
    let grouped = group_by_source_date(rows, source);

    let target = match date {
        Some(d) => d,
        None => match grouped
            .values()
            .flat_map(|by_date| by_date.keys().copied())
            .max()
        {
            Some(latest) => latest,
            None => return Ok(Vec::new()),
        },
    };

    let mut snapshots = Vec::new();
    for src in BLEND_ORDER {
        if let Some(rates) = grouped.get(&src).and_then(|by_date| by_date.get(&target)) {
            snapshots.push(snapshot(target, src, rates.clone()));
        }
    }
    Ok(snapshots)
}

/// History over `[from, to]` with the requested frequency reduction,
/// ordered by date ascending; for a shared date the bank snapshot precedes
/// the archive snapshot.
pub async fn rate_history(
    backend: &dyn Backend,
    from: NaiveDate,
    to: NaiveDate,
    frequency: Frequency,
    source: Option<Source>,
) -> Result<Vec<RateSnapshot>> {
    if from > to {
        return Err(IngestError::InvalidWindow);
    }
    let rows = backend.fetch_rates(Some(from), Some(to), source).await?;
    let grouped = group_by_source_date(rows, source);

    let mut snapshots = Vec::new();
    for src in BLEND_ORDER {
        let Some(by_date) = grouped.get(&src) else {
            continue;
        };
        let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
        for date in select_last_per_bucket(&dates, frequency) {
            if let Some(rates) = by_date.get(&date) {
                snapshots.push(snapshot(date, src, rates.clone()));
            }
        }
    }
    // Stable sort keeps the SBI-before-RBI emission order within a date.
    snapshots.sort_by_key(|s| s.rate_date);
    Ok(snapshots)
}

/// Commodity history with the same frequency reduction semantics.
pub async fn commodity_history(
    backend: &dyn Backend,
    metal: Metal,
    from: NaiveDate,
    to: NaiveDate,
    frequency: Frequency,
) -> Result<Vec<CommodityObservation>> {
    if from > to {
        return Err(IngestError::InvalidWindow);
    }
    let rows = backend.fetch_commodities(metal, Some(from), Some(to)).await?;
    let by_date: BTreeMap<NaiveDate, CommodityObservation> =
        rows.into_iter().map(|row| (row.rate_date, row)).collect();
    let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
    Ok(select_last_per_bucket(&dates, frequency)
        .into_iter()
        .filter_map(|date| by_date.get(&date).cloned())
        .collect())
}

fn snapshot(rate_date: NaiveDate, source: Source, rates: BTreeMap<String, f64>) -> RateSnapshot {
    RateSnapshot {
        rate_date,
        base_currency: BASE_CURRENCY.to_string(),
        source,
        rates,
    }
}

fn group_by_source_date(
    rows: Vec<crate::models::RateObservation>,
    filter: Option<Source>,
) -> BTreeMap<Source, BTreeMap<NaiveDate, BTreeMap<String, f64>>> {
    let mut grouped: BTreeMap<Source, BTreeMap<NaiveDate, BTreeMap<String, f64>>> =
        BTreeMap::new();
    for row in rows {
        if let Some(filter) = filter {
            if row.source != filter {
                continue;
            }
        }
        grouped
            .entry(row.source)
            .or_default()
            .entry(row.rate_date)
            .or_default()
            .insert(row.currency, row.rate);
    }
    grouped
}

/// Reduce sorted `dates` to the last date within each frequency bucket.
pub fn select_last_per_bucket(dates: &[NaiveDate], frequency: Frequency) -> Vec<NaiveDate> {
    if frequency == Frequency::Daily {
        return dates.to_vec();
    }
    let mut buckets: BTreeMap<(i32, u32), NaiveDate> = BTreeMap::new();
    for &date in dates {
        let key = match frequency {
            Frequency::Daily => unreachable!(),
            Frequency::Weekly => {
                let iso = date.iso_week();
                (iso.year(), iso.week())
            }
            Frequency::Monthly => (date.year(), date.month()),
            Frequency::Yearly => (date.year(), 0),
        };
        let slot = buckets.entry(key).or_insert(date);
        if date > *slot {
            *slot = date;
        }
    }
    let mut selected: Vec<NaiveDate> = buckets.into_values().collect();
    selected.sort();
    selected
}
