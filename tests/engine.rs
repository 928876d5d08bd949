//! Ingestion engine properties exercised against the embedded backend with
//! a stub adapter: idempotence, checkpoint monotonicity, soft stops,
//! dry runs, retry bounds, and cancellation.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use fx_ingest::backend::Backend;
use fx_ingest::backend_sqlite::SqliteBackend;
use fx_ingest::config::FetchConfig;
use fx_ingest::daterange::DateRange;
use fx_ingest::error::IngestError;
use fx_ingest::ingest::{run_ingest, IngestOptions};
use fx_ingest::models::{RateObservation, Source, StopReason};
use fx_ingest::source::{FetchOutcome, SourceAdapter};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn fast_fetch() -> FetchConfig {
    FetchConfig {
        timeout_secs: 5,
        max_retries: 3,
        backoff_secs: 0.01,
    }
}

async fn fresh_backend() -> (TempDir, SqliteBackend) {
    let tmp = TempDir::new().unwrap();
    let backend = SqliteBackend::connect(&tmp.path().join("forex.sqlite"))
        .await
        .unwrap();
    backend.ensure_schema().await.unwrap();
    (tmp, backend)
}

/// Scripted adapter: serves configured rows per day, optionally reports
/// no-data from a given date on, optionally fails transiently first.
struct StubAdapter {
    rows_by_date: BTreeMap<NaiveDate, Vec<RateObservation>>,
    no_data_from: Option<NaiveDate>,
    transient_failures_left: AtomicU32,
    fetch_calls: AtomicU32,
}

impl StubAdapter {
    fn new(rows_by_date: BTreeMap<NaiveDate, Vec<RateObservation>>) -> Self {
        Self {
            rows_by_date,
            no_data_from: None,
            transient_failures_left: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
        }
    }

    fn with_rates(dates: &[NaiveDate]) -> Self {
        let mut rows = BTreeMap::new();
        for &date in dates {
            rows.insert(
                date,
                vec![
                    RateObservation::reference(Source::Rbi, date, "USD", 88.5),
                    RateObservation::reference(Source::Rbi, date, "EUR", 103.1),
                ],
            );
        }
        Self::new(rows)
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn source(&self) -> Source {
        Source::Rbi
    }

    fn description(&self) -> String {
        "scripted stub".to_string()
    }

    fn batches(&self, window: DateRange) -> Vec<DateRange> {
        let mut batches = Vec::new();
        let mut day = window.start;
        while day <= window.end {
            batches.push(DateRange::day(day));
            day = day.succ_opt().unwrap();
        }
        batches
    }

    fn default_epoch(&self) -> NaiveDate {
        d(2025, 1, 1)
    }

    async fn fetch_and_parse(&self, window: DateRange) -> fx_ingest::error::Result<FetchOutcome> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(IngestError::TransientFetch {
                src: Source::Rbi,
                detail: "scripted timeout".into(),
            });
        }
        if let Some(cutoff) = self.no_data_from {
            if window.start >= cutoff {
                return Ok(FetchOutcome::NoDataYet);
            }
        }
        let rows: Vec<RateObservation> = self
            .rows_by_date
            .range(window.start..=window.end)
            .flat_map(|(_, rows)| rows.clone())
            .collect();
        Ok(FetchOutcome::Rates(rows))
    }
}

#[tokio::test]
async fn ingest_twice_is_idempotent() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3)]);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 3),
        dry_run: false,
        cancel: None,
    };
    let first = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(first.inserted_count, 4);
    assert_eq!(first.updated_count, 0);

    let second = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(second.inserted_count, 0);
    assert_eq!(second.updated_count, 4);

    let rows = backend.fetch_rates(None, None, None).await.unwrap();
    assert_eq!(rows.len(), 4);
    let mut keys: Vec<(NaiveDate, String)> = rows
        .iter()
        .map(|r| (r.rate_date, r.currency.clone()))
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 4);
}

#[tokio::test]
async fn checkpoint_tracks_latest_committed_date_and_never_regresses() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3)]);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 3),
        dry_run: false,
        cancel: None,
    };
    run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(
        backend.get_checkpoint(Source::Rbi).await.unwrap(),
        Some(d(2025, 1, 3))
    );

    // A backward write is a no-op.
    backend
        .set_checkpoint(Source::Rbi, d(2024, 12, 1))
        .await
        .unwrap();
    assert_eq!(
        backend.get_checkpoint(Source::Rbi).await.unwrap(),
        Some(d(2025, 1, 3))
    );
}

#[tokio::test]
async fn resumes_from_checkpoint_without_refetching() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter =
        StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3), d(2025, 1, 6), d(2025, 1, 7)]);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 3),
        dry_run: false,
        cancel: None,
    };
    run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    let calls_after_first = adapter.fetch_calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 2);

    // No explicit --from: the engine resumes at checkpoint + 1 day.
    let opts = IngestOptions::window(d(2025, 1, 7));
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(report.inserted_count, 4); // Jan 6 + Jan 7, two currencies each
    assert_eq!(
        adapter.fetch_calls.load(Ordering::SeqCst) - calls_after_first,
        4 // Jan 4..=7, one call per day
    );

    // Fully ingested window: nothing left to do, no fetches at all.
    let before = adapter.fetch_calls.load(Ordering::SeqCst);
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(report.inserted_count + report.updated_count, 0);
    assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn soft_stop_commits_prior_dates_and_holds_checkpoint() {
    let (_tmp, backend) = fresh_backend().await;
    let mut adapter = StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3)]);
    adapter.no_data_from = Some(d(2025, 1, 4));

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 4),
        dry_run: false,
        cancel: None,
    };
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.stop_reason, Some(StopReason::NoDataPublished));
    assert_eq!(report.inserted_count, 4);
    assert_eq!(report.last_date_reached, Some(d(2025, 1, 3)));
    assert_eq!(
        backend.get_checkpoint(Source::Rbi).await.unwrap(),
        Some(d(2025, 1, 3))
    );
}

#[tokio::test]
async fn dry_run_reports_counts_but_writes_nothing() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3)]);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 3),
        dry_run: true,
        cancel: None,
    };
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();

    assert_eq!(report.inserted_count, 4);
    assert_eq!(report.updated_count, 0);
    assert!(report.dry_run);
    assert!(backend.fetch_rates(None, None, None).await.unwrap().is_empty());
    assert_eq!(backend.get_checkpoint(Source::Rbi).await.unwrap(), None);

    // Against a half-populated store, the dry run distinguishes updates.
    let real = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 2),
        dry_run: false,
        cancel: None,
    };
    run_ingest(&backend, &adapter, &fast_fetch(), &real)
        .await
        .unwrap();
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(report.inserted_count, 2);
    assert_eq!(report.updated_count, 2);
}

#[tokio::test]
async fn transient_failures_are_retried_within_bounds() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2)]);
    adapter.transient_failures_left.store(2, Ordering::SeqCst);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 2),
        dry_run: false,
        cancel: None,
    };
    // max_retries = 3 allows two failures then success.
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(report.inserted_count, 2);
    assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_surface_and_preserve_prior_commits() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2), d(2025, 1, 3)]);

    // First day commits cleanly…
    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 2),
        dry_run: false,
        cancel: None,
    };
    run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();

    // …then the upstream goes down for good.
    adapter.transient_failures_left.store(99, Ordering::SeqCst);
    let opts = IngestOptions {
        from: Some(d(2025, 1, 3)),
        to: d(2025, 1, 3),
        dry_run: false,
        cancel: None,
    };
    let err = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // Prior commits and checkpoint are untouched.
    assert_eq!(backend.fetch_rates(None, None, None).await.unwrap().len(), 2);
    assert_eq!(
        backend.get_checkpoint(Source::Rbi).await.unwrap(),
        Some(d(2025, 1, 2))
    );
}

#[tokio::test]
async fn out_of_window_and_malformed_rows_are_dropped() {
    let (_tmp, backend) = fresh_backend().await;
    let mut rows = BTreeMap::new();
    rows.insert(
        d(2025, 1, 2),
        vec![
            RateObservation::reference(Source::Rbi, d(2025, 1, 2), "USD", 88.5),
            // Stray row from outside the requested day.
            RateObservation::reference(Source::Rbi, d(2024, 6, 1), "USD", 83.0),
            // Unparseable rate survives parsing as NaN; validation drops it.
            RateObservation::reference(Source::Rbi, d(2025, 1, 2), "GBP", f64::NAN),
            RateObservation::reference(Source::Rbi, d(2025, 1, 2), "", 1.0),
        ],
    );
    let adapter = StubAdapter::new(rows);

    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 2),
        dry_run: false,
        cancel: None,
    };
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert_eq!(report.inserted_count, 1);
    assert_eq!(report.skipped_count, 3);

    let stored = backend.fetch_rates(None, None, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].currency, "USD");
}

#[tokio::test]
async fn raised_cancel_flag_stops_before_fetching() {
    let (_tmp, backend) = fresh_backend().await;
    let adapter = StubAdapter::with_rates(&[d(2025, 1, 2)]);

    let cancel = Arc::new(AtomicBool::new(true));
    let opts = IngestOptions {
        from: Some(d(2025, 1, 2)),
        to: d(2025, 1, 2),
        dry_run: false,
        cancel: Some(cancel),
    };
    let report = run_ingest(&backend, &adapter, &fast_fetch(), &opts)
        .await
        .unwrap();
    assert!(report.stopped_early);
    assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.get_checkpoint(Source::Rbi).await.unwrap(), None);
}
