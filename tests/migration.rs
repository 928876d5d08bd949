//! Migration completeness and query-shape properties against two embedded
//! backends in temporary directories.

use chrono::NaiveDate;
use tempfile::TempDir;

use fx_ingest::backend::Backend;
use fx_ingest::backend_sqlite::SqliteBackend;
use fx_ingest::migrate::{run_migration, MigrateOptions};
use fx_ingest::models::{
    CommodityObservation, Metal, RateObservation, Source,
};
use fx_ingest::progress::NoProgress;
use fx_ingest::query::{rate_history, rate_snapshots, Frequency};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn fresh_backend(tmp: &TempDir, name: &str) -> SqliteBackend {
    let backend = SqliteBackend::connect(&tmp.path().join(name)).await.unwrap();
    backend.ensure_schema().await.unwrap();
    backend
}

fn sbi_row(date: NaiveDate, currency: &str, rate: f64) -> RateObservation {
    RateObservation {
        source: Source::Sbi,
        rate_date: date,
        currency: currency.to_string(),
        rate,
        tt_buy: Some(rate - 0.5),
        tt_sell: Some(rate + 0.5),
        bill_buy: Some(rate - 0.6),
        bill_sell: Some(rate + 0.6),
        travel_card_buy: Some(rate - 0.7),
        travel_card_sell: Some(rate + 0.7),
        cn_buy: Some(rate - 0.9),
        cn_sell: Some(rate + 0.9),
    }
}

async fn seed(backend: &SqliteBackend) {
    let mut rbi = Vec::new();
    let mut day = d(2025, 9, 1);
    while day <= d(2025, 11, 18) {
        rbi.push(RateObservation::reference(Source::Rbi, day, "USD", 88.0));
        rbi.push(RateObservation::reference(Source::Rbi, day, "EUR", 103.0));
        day = day.succ_opt().unwrap();
    }
    backend.upsert_rates(&rbi).await.unwrap();
    backend
        .upsert_rates(&[
            sbi_row(d(2025, 11, 17), "USD", 88.6),
            sbi_row(d(2025, 11, 18), "USD", 88.7),
        ])
        .await
        .unwrap();

    let copper: Vec<CommodityObservation> = (1..=20)
        .map(|i| CommodityObservation {
            metal: Metal::Copper,
            rate_date: d(2025, 11, i),
            price: Some(10_800.0 + i as f64),
            price_3_month: Some(10_750.0 + i as f64),
            stock: Some(136_000 + i as i64),
        })
        .collect();
    backend.upsert_commodities(&copper).await.unwrap();

    backend
        .set_checkpoint(Source::Rbi, d(2025, 11, 18))
        .await
        .unwrap();
    backend
        .set_checkpoint(Source::Sbi, d(2025, 11, 18))
        .await
        .unwrap();
    backend
        .set_checkpoint(Source::LmeCopper, d(2025, 11, 20))
        .await
        .unwrap();
}

#[tokio::test]
async fn migration_copies_every_row_and_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let source_db = fresh_backend(&tmp, "embedded.sqlite").await;
    let target_db = fresh_backend(&tmp, "target.sqlite").await;
    seed(&source_db).await;

    let opts = MigrateOptions {
        chunk_size: 7,
        ..MigrateOptions::default()
    };
    let report = run_migration(&source_db, &target_db, &opts, &NoProgress)
        .await
        .unwrap();

    let source_rows = source_db.fetch_rates(None, None, None).await.unwrap();
    let target_rows = target_db.fetch_rates(None, None, None).await.unwrap();
    assert_eq!(source_rows, target_rows);
    assert_eq!(report.rbi_rows + report.sbi_rows, source_rows.len() as u64);

    let source_lme = source_db
        .fetch_commodities(Metal::Copper, None, None)
        .await
        .unwrap();
    let target_lme = target_db
        .fetch_commodities(Metal::Copper, None, None)
        .await
        .unwrap();
    assert_eq!(source_lme, target_lme);
    assert_eq!(report.lme_copper_rows, 20);
    assert_eq!(report.lme_aluminum_rows, 0);

    for source in [Source::Rbi, Source::Sbi, Source::LmeCopper] {
        assert_eq!(
            source_db.get_checkpoint(source).await.unwrap(),
            target_db.get_checkpoint(source).await.unwrap(),
        );
    }
    assert_eq!(report.checkpoints, 3);
}

#[tokio::test]
async fn rerunning_migration_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let source_db = fresh_backend(&tmp, "embedded.sqlite").await;
    let target_db = fresh_backend(&tmp, "target.sqlite").await;
    seed(&source_db).await;

    let opts = MigrateOptions::default();
    run_migration(&source_db, &target_db, &opts, &NoProgress)
        .await
        .unwrap();
    let first = target_db.fetch_rates(None, None, None).await.unwrap();

    run_migration(&source_db, &target_db, &opts, &NoProgress)
        .await
        .unwrap();
    let second = target_db.fetch_rates(None, None, None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn date_window_limits_what_moves() {
    let tmp = TempDir::new().unwrap();
    let source_db = fresh_backend(&tmp, "embedded.sqlite").await;
    let target_db = fresh_backend(&tmp, "target.sqlite").await;
    seed(&source_db).await;

    let opts = MigrateOptions {
        from: Some(d(2025, 11, 1)),
        to: Some(d(2025, 11, 18)),
        chunk_size: 500,
    };
    let report = run_migration(&source_db, &target_db, &opts, &NoProgress)
        .await
        .unwrap();

    // 18 November days × 2 currencies for RBI, plus the 2 SBI rows.
    assert_eq!(report.rbi_rows, 36);
    assert_eq!(report.sbi_rows, 2);
    let rows = target_db.fetch_rates(None, None, None).await.unwrap();
    assert!(rows.iter().all(|r| r.rate_date >= d(2025, 11, 1)));
}

#[tokio::test]
async fn blended_snapshot_puts_bank_rows_before_archive_rows() {
    let tmp = TempDir::new().unwrap();
    let backend = fresh_backend(&tmp, "embedded.sqlite").await;
    seed(&backend).await;

    let snapshots = rate_snapshots(&backend, Some(d(2025, 11, 18)), None)
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].source, Source::Sbi);
    assert_eq!(snapshots[1].source, Source::Rbi);
    assert!(snapshots[0].rates.contains_key("USD"));
    assert_eq!(snapshots[0].base_currency, "INR");

    // Latest snapshot with no date behaves the same.
    let latest = rate_snapshots(&backend, None, None).await.unwrap();
    assert_eq!(latest[0].source, Source::Sbi);
    assert_eq!(latest[0].rate_date, d(2025, 11, 18));
}

#[tokio::test]
async fn monthly_history_returns_last_observation_per_month() {
    let tmp = TempDir::new().unwrap();
    let backend = fresh_backend(&tmp, "embedded.sqlite").await;
    seed(&backend).await;

    let snapshots = rate_history(
        &backend,
        d(2025, 9, 1),
        d(2025, 11, 18),
        Frequency::Monthly,
        Some(Source::Rbi),
    )
    .await
    .unwrap();

    let dates: Vec<NaiveDate> = snapshots.iter().map(|s| s.rate_date).collect();
    assert_eq!(dates, vec![d(2025, 9, 30), d(2025, 10, 31), d(2025, 11, 18)]);
    assert!(snapshots.iter().all(|s| s.rates.len() == 2));
}
