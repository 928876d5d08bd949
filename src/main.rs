//! # fx-ingest CLI (`fxi`)
//!
//! The `fxi` binary drives ingestion, queries, and migration from the
//! command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fxi init` | Create the configured backend's schema |
//! | `fxi sources` | List source adapters and their endpoints |
//! | `fxi ingest <source>` | Incremental checkpointed ingestion |
//! | `fxi rate` | Latest (or per-date) rate snapshot |
//! | `fxi history` | Date-range history with frequency reduction |
//! | `fxi stats` | Row counts and checkpoint positions |
//! | `fxi probe` | Backend connectivity check |
//! | `fxi migrate <url>` | Copy rows + checkpoints to another backend |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fx_ingest::backend::Backend;
use fx_ingest::config;
use fx_ingest::daterange::parse_date;
use fx_ingest::db::{self, BackendKind};
use fx_ingest::ingest::{run_ingest, IngestOptions};
use fx_ingest::migrate::{run_migration, MigrateOptions};
use fx_ingest::models::Source;
use fx_ingest::progress::ProgressMode;
use fx_ingest::query::{commodity_history, rate_history, rate_snapshots, Frequency};
use fx_ingest::source::adapter_for;
use fx_ingest::{sources, stats};

/// fx-ingest — checkpointed ingestion of daily FX reference rates and LME
/// commodity prices.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; without one the built-in defaults (embedded SQLite under `data/`)
/// are used.
#[derive(Parser)]
#[command(
    name = "fxi",
    about = "fx-ingest — checkpointed FX and commodity rate ingestion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fxi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the backend schema.
    ///
    /// Creates all tables/collections on the configured backend. Idempotent.
    Init,

    /// List source adapters and their configured endpoints.
    Sources,

    /// Ingest one source incrementally.
    ///
    /// Resumes from the source's checkpoint unless `--from` is given.
    /// Sources: rbi, sbi, copper (lme-copper), aluminum (lme-aluminum).
    Ingest {
        /// Source name.
        source: String,

        /// Window start (YYYY-MM-DD). Defaults to checkpoint + 1 day.
        #[arg(long)]
        from: Option<String>,

        /// Window end (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        to: Option<String>,

        /// Fetch, parse, and validate without writing or moving checkpoints.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the latest rate snapshot, or the snapshot for a given date.
    ///
    /// Without `--source`, bank-published (SBI) and archive (RBI) snapshots
    /// are both printed, bank first.
    Rate {
        /// Snapshot date (YYYY-MM-DD); defaults to the latest with data.
        #[arg(long)]
        date: Option<String>,

        /// Restrict to one source (rbi or sbi).
        #[arg(long)]
        source: Option<String>,
    },

    /// Print rate or commodity history for a date window.
    History {
        /// Window start (YYYY-MM-DD).
        #[arg(long)]
        from: String,

        /// Window end (YYYY-MM-DD).
        #[arg(long)]
        to: String,

        /// daily, weekly, monthly, or yearly (last observation per bucket).
        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Source: rbi, sbi, copper, aluminum. Forex sources blend when omitted.
        #[arg(long)]
        source: Option<String>,
    },

    /// Show row counts, checkpoints, and database size.
    Stats,

    /// Probe backend connectivity; exits non-zero when unreachable.
    Probe,

    /// Copy rows and checkpoints from the embedded database to an external
    /// backend.
    Migrate {
        /// Target backend URL (postgres://…, doc+postgres://…, sqlite:…).
        target: String,

        /// Only migrate rows on or after this date (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Only migrate rows on or before this date (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Rows per write batch.
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let backend = db::connect(&cfg).await?;
            println!("{} backend initialized ({}).", backend.name(), backend.describe());
            backend.close().await;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Ingest {
            source,
            from,
            to,
            dry_run,
        } => {
            let source = parse_source(&source)?;
            let adapter = adapter_for(source, &cfg)?;
            let backend = db::connect(&cfg).await?;

            let cancel = Arc::new(AtomicBool::new(false));
            install_ctrlc_handler(cancel.clone());

            let opts = IngestOptions {
                from: from.as_deref().map(parse_date).transpose()?,
                to: to
                    .as_deref()
                    .map(parse_date)
                    .transpose()?
                    .unwrap_or_else(|| chrono::Utc::now().date_naive()),
                dry_run,
                cancel: Some(cancel),
            };
            let report = run_ingest(backend.as_ref(), adapter.as_ref(), &cfg.fetch, &opts).await?;

            println!("ingest {}{}", source, if dry_run { " (dry-run)" } else { "" });
            println!("  inserted: {}", report.inserted_count);
            println!("  updated:  {}", report.updated_count);
            println!("  skipped:  {}", report.skipped_count);
            match report.last_date_reached {
                Some(date) => println!("  through:  {date}"),
                None => println!("  through:  (nothing ingested)"),
            }
            if report.stopped_early {
                println!("  stopped early: {:?}", report.stop_reason);
            }
            println!("ok");
            backend.close().await;
        }
        Commands::Rate { date, source } => {
            let backend = db::connect(&cfg).await?;
            let date = date.as_deref().map(parse_date).transpose()?;
            let source = source.as_deref().map(parse_source).transpose()?;
            let snapshots = rate_snapshots(backend.as_ref(), date, source).await?;
            if snapshots.is_empty() {
                println!("{{}}");
            } else {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            }
            backend.close().await;
        }
        Commands::History {
            from,
            to,
            frequency,
            source,
        } => {
            let backend = db::connect(&cfg).await?;
            let from = parse_date(&from)?;
            let to = parse_date(&to)?;
            let frequency = Frequency::parse(&frequency)?;
            let source = source.as_deref().map(parse_source).transpose()?;

            match source.and_then(|s| s.metal()) {
                Some(metal) => {
                    let rows =
                        commodity_history(backend.as_ref(), metal, from, to, frequency).await?;
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                None => {
                    let snapshots =
                        rate_history(backend.as_ref(), from, to, frequency, source).await?;
                    println!("{}", serde_json::to_string_pretty(&snapshots)?);
                }
            }
            backend.close().await;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Probe => {
            let backend = db::connect(&cfg).await?;
            let (ok, error) = backend.test_connection().await;
            backend.close().await;
            if ok {
                println!("connection ok ({})", cfg_target(&cfg)?);
            } else {
                println!(
                    "connection failed ({}): {}",
                    cfg_target(&cfg)?,
                    error.unwrap_or_else(|| "unknown error".into())
                );
                std::process::exit(1);
            }
        }
        Commands::Migrate {
            target,
            from,
            to,
            chunk_size,
        } => {
            let target_kind = BackendKind::from_url(&target)?;
            let source_db = db::connect_embedded(&cfg).await?;
            let target_db = target_kind.connect().await?;

            // Fail fast with the probe rather than midway through a copy.
            let (ok, error) = target_db.test_connection().await;
            if !ok {
                anyhow::bail!(
                    "target backend unreachable: {}",
                    error.unwrap_or_else(|| "unknown error".into())
                );
            }

            let opts = MigrateOptions {
                from: from.as_deref().map(parse_date).transpose()?,
                to: to.as_deref().map(parse_date).transpose()?,
                chunk_size,
            };
            let progress = ProgressMode::default_for_tty().reporter();
            let report =
                run_migration(source_db.as_ref(), target_db.as_ref(), &opts, progress.as_ref())
                    .await?;

            println!("migrate → {}", target_db.describe());
            println!("  forex_rates_rbi:     {}", report.rbi_rows);
            println!("  forex_rates_sbi:     {}", report.sbi_rows);
            println!("  lme_copper_rates:    {}", report.lme_copper_rows);
            println!("  lme_aluminum_rates:  {}", report.lme_aluminum_rows);
            println!("  checkpoints:         {}", report.checkpoints);
            println!("ok");
            source_db.close().await;
            target_db.close().await;
        }
    }

    Ok(())
}

fn parse_source(value: &str) -> Result<Source> {
    Source::parse(value).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown source '{value}'; expected rbi, sbi, copper (lme-copper), or aluminum (lme-aluminum)"
        )
    })
}

fn cfg_target(cfg: &config::Config) -> Result<String> {
    Ok(match db::configured_kind(cfg)? {
        BackendKind::Sqlite(path) => path.display().to_string(),
        BackendKind::Postgres(url) | BackendKind::Document(url) => {
            fx_ingest::backend_postgres::redact_url(&url)
        }
    })
}

fn install_ctrlc_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, finishing the current batch before stopping");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}
