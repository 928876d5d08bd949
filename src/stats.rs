//! Database statistics and health overview.
//!
//! Quick summary of what has been ingested: per-table row counts,
//! checkpoint positions, and the embedded database size. Used by
//! `fxi stats` to confirm that ingestion runs are landing where expected.

use anyhow::Result;

use crate::backend::Backend;
use crate::config::Config;
use crate::db::{self, BackendKind};

pub async fn run_stats(config: &Config) -> Result<()> {
    let backend = db::connect(config).await?;

    let counts = backend.table_counts().await?;
    let checkpoints = backend.checkpoints().await?;

    println!("fx-ingest — Database Stats");
    println!("==========================");
    println!();
    println!("  Backend:  {} ({})", backend.name(), backend.describe());
    if let BackendKind::Sqlite(path) = db::configured_kind(config)? {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        println!("  Size:     {}", format_bytes(size));
    }
    println!();
    for count in &counts {
        println!("  {:<22} {:>8} rows", count.table, count.rows);
    }
    println!();
    if checkpoints.is_empty() {
        println!("  No checkpoints yet — nothing has been ingested.");
    } else {
        println!("  Checkpoints:");
        for checkpoint in &checkpoints {
            println!(
                "    {:<14} last ingested {}",
                checkpoint.source, checkpoint.last_ingested_date
            );
        }
    }

    backend.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
