//! Cross-backend migration runner.
//!
//! Copies rows and checkpoints from one backend (normally the embedded
//! default) to another. Rows move in bounded chunks (date windows on the
//! read side, fixed-size row batches on the write side), and each source's
//! checkpoint is copied only after every data chunk for that source has
//! been committed on the target. A migration interrupted mid-copy can be
//! re-run and re-copies at most the in-flight chunk; upserts on natural
//! keys make the overlap harmless.

use chrono::NaiveDate;
use tracing::info;

use crate::backend::Backend;
use crate::daterange::{split_ranges, DateRange};
use crate::error::Result;
use crate::models::{Metal, MigrationReport, Source};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Days per read window. Keeps a window's rows well under the write batch
/// size even with every currency present daily.
const READ_WINDOW_DAYS: u64 = 90;

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Rows per write batch on the target.
    pub chunk_size: usize,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            chunk_size: 500,
        }
    }
}

/// Copy all tables and checkpoints from `source_db` to `target_db`.
pub async fn run_migration(
    source_db: &dyn Backend,
    target_db: &dyn Backend,
    opts: &MigrateOptions,
    progress: &dyn ProgressReporter,
) -> Result<MigrationReport> {
    target_db.ensure_schema().await?;
    info!(
        from = %source_db.describe(),
        to = %target_db.describe(),
        "starting migration"
    );

    let mut report = MigrationReport::default();
    report.rbi_rows = migrate_forex(source_db, target_db, Source::Rbi, opts, progress).await?;
    report.checkpoints += copy_checkpoint(source_db, target_db, Source::Rbi).await?;
    report.sbi_rows = migrate_forex(source_db, target_db, Source::Sbi, opts, progress).await?;
    report.checkpoints += copy_checkpoint(source_db, target_db, Source::Sbi).await?;
    report.lme_copper_rows =
        migrate_commodities(source_db, target_db, Metal::Copper, opts, progress).await?;
    report.checkpoints += copy_checkpoint(source_db, target_db, Source::LmeCopper).await?;
    report.lme_aluminum_rows =
        migrate_commodities(source_db, target_db, Metal::Aluminum, opts, progress).await?;
    report.checkpoints += copy_checkpoint(source_db, target_db, Source::LmeAluminum).await?;

    info!(
        rows = report.total_rows(),
        checkpoints = report.checkpoints,
        "migration finished"
    );
    Ok(report)
}

/// Date windows covering the rows this migration should move for `source`.
async fn read_windows(
    source_db: &dyn Backend,
    source: Source,
    opts: &MigrateOptions,
) -> Result<Vec<DateRange>> {
    let earliest = source_db.earliest_rate_date(source).await?;
    let latest = source_db.latest_rate_date(source).await?;
    let (Some(mut from), Some(mut to)) = (earliest, latest) else {
        return Ok(Vec::new());
    };
    if let Some(explicit) = opts.from {
        from = from.max(explicit);
    }
    if let Some(explicit) = opts.to {
        to = to.min(explicit);
    }
    if from > to {
        return Ok(Vec::new());
    }
    split_ranges(DateRange::new(from, to)?, READ_WINDOW_DAYS)
}

async fn migrate_forex(
    source_db: &dyn Backend,
    target_db: &dyn Backend,
    source: Source,
    opts: &MigrateOptions,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    let table = match source {
        Source::Rbi => "forex_rates_rbi",
        _ => "forex_rates_sbi",
    };
    let mut copied = 0u64;
    for window in read_windows(source_db, source, opts).await? {
        let rows = source_db
            .fetch_rates(Some(window.start), Some(window.end), Some(source))
            .await?;
        for chunk in rows.chunks(opts.chunk_size.max(1)) {
            target_db.upsert_rates(chunk).await?;
            copied += chunk.len() as u64;
            progress.report(ProgressEvent::Chunk {
                table: table.to_string(),
                copied,
            });
        }
    }
    progress.report(ProgressEvent::TableDone {
        table: table.to_string(),
        total: copied,
    });
    Ok(copied)
}

async fn migrate_commodities(
    source_db: &dyn Backend,
    target_db: &dyn Backend,
    metal: Metal,
    opts: &MigrateOptions,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    let source = metal.source();
    let table = metal.table();
    let mut copied = 0u64;
    for window in read_windows(source_db, source, opts).await? {
        let rows = source_db
            .fetch_commodities(metal, Some(window.start), Some(window.end))
            .await?;
        for chunk in rows.chunks(opts.chunk_size.max(1)) {
            target_db.upsert_commodities(chunk).await?;
            copied += chunk.len() as u64;
            progress.report(ProgressEvent::Chunk {
                table: table.to_string(),
                copied,
            });
        }
    }
    progress.report(ProgressEvent::TableDone {
        table: table.to_string(),
        total: copied,
    });
    Ok(copied)
}

/// Copy one source's checkpoint after its data chunks are committed. The
/// target's monotonic guard reconciles an existing further-ahead value.
/// Returns the number of checkpoints copied (0 or 1).
async fn copy_checkpoint(
    source_db: &dyn Backend,
    target_db: &dyn Backend,
    source: Source,
) -> Result<u64> {
    if let Some(date) = source_db.get_checkpoint(source).await? {
        target_db.set_checkpoint(source, date).await?;
        info!(%source, %date, "checkpoint copied");
        return Ok(1);
    }
    Ok(0)
}
