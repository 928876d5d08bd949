//! Ingestion engine: per-batch fetch → parse → validate → upsert with
//! checkpoint advancement.
//!
//! The engine is the sole owner of checkpoint mutation and the sole place
//! that decides retry vs. abort vs. soft stop. A checkpoint for date D is
//! written only after the backend has acknowledged the upsert covering D,
//! a strict happens-before, so a crash between the two re-ingests at most
//! one batch on resume.
//!
//! Re-running over an already-ingested window upserts identical rows onto
//! their natural keys; the engine is safe to schedule repeatedly.

use chrono::{Days, NaiveDate};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::FetchConfig;
use crate::daterange::DateRange;
use crate::error::Result;
use crate::fetch::backoff_delay;
use crate::models::{
    CommodityObservation, IngestionReport, PersistenceResult, RateObservation, StopReason,
};
use crate::source::{FetchOutcome, SourceAdapter};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Explicit window start; defaults to the checkpoint plus one day, or
    /// the adapter's epoch when no checkpoint exists.
    pub from: Option<NaiveDate>,
    /// Inclusive window end.
    pub to: NaiveDate,
    /// Fetch, parse, and validate but write nothing and leave the
    /// checkpoint untouched.
    pub dry_run: bool,
    /// Checked between batches; raising it ends the run cleanly with the
    /// checkpoint at the last fully committed date.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl IngestOptions {
    pub fn window(to: NaiveDate) -> Self {
        Self {
            from: None,
            to,
            dry_run: false,
            cancel: None,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Run one incremental ingestion for the adapter's source.
pub async fn run_ingest(
    backend: &dyn Backend,
    adapter: &dyn SourceAdapter,
    fetch: &FetchConfig,
    opts: &IngestOptions,
) -> Result<IngestionReport> {
    let source = adapter.source();
    let mut report = IngestionReport::new(source, opts.dry_run);

    let checkpoint = backend.get_checkpoint(source).await?;
    report.last_date_reached = checkpoint;

    let from = match opts.from {
        Some(explicit) => explicit,
        None => match checkpoint {
            Some(last) => last + Days::new(1),
            None => adapter.default_epoch(),
        },
    };
    if from > opts.to {
        info!(%source, checkpoint = ?checkpoint, "window already ingested, nothing to do");
        return Ok(report);
    }
    let window = DateRange::new(from, opts.to)?;
    adapter.validate_window(window)?;

    let batches = adapter.batches(window);
    info!(%source, %window, batches = batches.len(), dry_run = opts.dry_run, "starting ingestion");

    for batch in batches {
        if opts.cancelled() {
            info!(%source, %batch, "cancellation requested, stopping");
            report.stopped_early = true;
            report.stop_reason = Some(StopReason::Cancelled);
            break;
        }

        let outcome = fetch_with_retry(adapter, fetch, batch).await?;
        let committed_through = match outcome {
            FetchOutcome::NoDataYet => {
                report.stopped_early = true;
                report.stop_reason = Some(StopReason::NoDataPublished);
                break;
            }
            FetchOutcome::Rates(rows) => {
                let (valid, dropped) = validate_rates(rows, batch);
                report.skipped_count += dropped;
                commit_rates(backend, &mut report, &valid, opts.dry_run).await?
            }
            FetchOutcome::Commodities(rows) => {
                let (valid, dropped) = validate_commodities(rows, batch);
                report.skipped_count += dropped;
                commit_commodities(backend, &mut report, &valid, opts.dry_run).await?
            }
        };

        // Checkpoint only after the write above is durable, and only to a
        // date some row actually covered.
        if let Some(latest) = committed_through {
            if !opts.dry_run {
                backend.set_checkpoint(source, latest).await?;
            }
            if report.last_date_reached.map_or(true, |d| latest > d) {
                report.last_date_reached = Some(latest);
            }
        }
    }

    info!(
        %source,
        inserted = report.inserted_count,
        updated = report.updated_count,
        skipped = report.skipped_count,
        stopped_early = report.stopped_early,
        "ingestion finished"
    );
    Ok(report)
}

/// Bounded retry around one adapter call. Only transient transport errors
/// are retried; parse failures and soft stops pass straight through.
async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    fetch: &FetchConfig,
    batch: DateRange,
) -> Result<FetchOutcome> {
    let attempts = fetch.max_retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match adapter.fetch_and_parse(batch).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff_delay(fetch, attempt);
                warn!(
                    source = %adapter.source(),
                    %batch,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn validate_rates(
    rows: Vec<RateObservation>,
    batch: DateRange,
) -> (Vec<RateObservation>, u64) {
    let mut dropped = 0u64;
    let valid = rows
        .into_iter()
        .filter(|row| {
            if row.currency.trim().is_empty() {
                warn!(date = %row.rate_date, "dropping row with empty currency");
                dropped += 1;
                return false;
            }
            if !row.rate.is_finite() {
                warn!(currency = %row.currency, date = %row.rate_date, "dropping row with non-numeric rate");
                dropped += 1;
                return false;
            }
            if !batch.contains(row.rate_date) {
                warn!(
                    currency = %row.currency,
                    date = %row.rate_date,
                    %batch,
                    "dropping row outside the requested window"
                );
                dropped += 1;
                return false;
            }
            true
        })
        .collect();
    (valid, dropped)
}

fn validate_commodities(
    rows: Vec<CommodityObservation>,
    batch: DateRange,
) -> (Vec<CommodityObservation>, u64) {
    let mut dropped = 0u64;
    let valid = rows
        .into_iter()
        .filter(|row| {
            if !batch.contains(row.rate_date) {
                warn!(date = %row.rate_date, %batch, "dropping row outside the requested window");
                dropped += 1;
                return false;
            }
            if row.price.is_none() && row.price_3_month.is_none() && row.stock.is_none() {
                warn!(date = %row.rate_date, "dropping row without any price or stock value");
                dropped += 1;
                return false;
            }
            true
        })
        .collect();
    (valid, dropped)
}

/// Upsert (or, in dry-run, simulate upserting) forex rows. Returns the
/// latest date covered by the batch's committed rows.
async fn commit_rates(
    backend: &dyn Backend,
    report: &mut IngestionReport,
    rows: &[RateObservation],
    dry_run: bool,
) -> Result<Option<NaiveDate>> {
    if rows.is_empty() {
        return Ok(None);
    }
    let result = if dry_run {
        simulate_rate_upsert(backend, rows).await?
    } else {
        backend.upsert_rates(rows).await?
    };
    report.inserted_count += result.inserted;
    report.updated_count += result.updated;
    Ok(rows.iter().map(|r| r.rate_date).max())
}

async fn commit_commodities(
    backend: &dyn Backend,
    report: &mut IngestionReport,
    rows: &[CommodityObservation],
    dry_run: bool,
) -> Result<Option<NaiveDate>> {
    if rows.is_empty() {
        return Ok(None);
    }
    let result = if dry_run {
        simulate_commodity_upsert(backend, rows).await?
    } else {
        backend.upsert_commodities(rows).await?
    };
    report.inserted_count += result.inserted;
    report.updated_count += result.updated;
    Ok(rows.iter().map(|r| r.rate_date).max())
}

/// Read-only insert/update accounting for dry runs: counts how many of the
/// batch's natural keys already exist in the backend.
async fn simulate_rate_upsert(
    backend: &dyn Backend,
    rows: &[RateObservation],
) -> Result<PersistenceResult> {
    let from = rows.iter().map(|r| r.rate_date).min();
    let to = rows.iter().map(|r| r.rate_date).max();
    let mut existing: HashSet<(crate::models::Source, NaiveDate, String)> = HashSet::new();
    for source in rows.iter().map(|r| r.source).collect::<HashSet<_>>() {
        for row in backend.fetch_rates(from, to, Some(source)).await? {
            existing.insert((row.source, row.rate_date, row.currency));
        }
    }
    let mut result = PersistenceResult::default();
    let mut seen = HashSet::new();
    for row in rows {
        let key = (row.source, row.rate_date, row.currency.clone());
        if !seen.insert(key.clone()) {
            continue;
        }
        if existing.contains(&key) {
            result.updated += 1;
        } else {
            result.inserted += 1;
        }
    }
    Ok(result)
}

async fn simulate_commodity_upsert(
    backend: &dyn Backend,
    rows: &[CommodityObservation],
) -> Result<PersistenceResult> {
    let from = rows.iter().map(|r| r.rate_date).min();
    let to = rows.iter().map(|r| r.rate_date).max();
    let mut result = PersistenceResult::default();
    let mut seen = HashSet::new();
    for metal in rows.iter().map(|r| r.metal).collect::<HashSet<_>>() {
        let existing: HashSet<NaiveDate> = backend
            .fetch_commodities(metal, from, to)
            .await?
            .into_iter()
            .map(|r| r.rate_date)
            .collect();
        for row in rows.iter().filter(|r| r.metal == metal) {
            if !seen.insert((metal, row.rate_date)) {
                continue;
            }
            if existing.contains(&row.rate_date) {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }
    }
    Ok(result)
}
