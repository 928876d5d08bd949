//! # fx-ingest
//!
//! Checkpointed ingestion of daily FX reference rates and LME commodity
//! prices from heterogeneous public sources.
//!
//! fx-ingest fetches raw documents from three upstreams (a central-bank
//! archive workbook, a bank-published card-rate PDF, and a metals-exchange
//! data table), normalizes them into canonical rows, and persists them
//! idempotently across pluggable storage backends with incremental,
//! checkpointed re-ingestion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Adapters   │──▶│   Ingest     │──▶│   Backends    │
//! │ RBI/SBI/LME  │   │ retry+ckpt   │   │ SQLite/PG/Doc │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │
//!                          ┌───────────────────┤
//!                          ▼                   ▼
//!                     ┌─────────┐        ┌──────────┐
//!                     │  Query  │        │ Migrate  │
//!                     │ (fxi)   │        │ (chunks) │
//!                     └─────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fxi init                              # create the embedded database
//! fxi ingest rbi --to 2025-11-18        # incremental archive ingestion
//! fxi ingest sbi                        # today's card rates
//! fxi ingest copper --from 2025-01-01   # LME cash-seller prices
//! fxi rate                              # latest blended snapshot
//! fxi history --from 2025-09-01 --to 2025-11-18 --frequency monthly
//! fxi migrate postgres://user:pw@host/forex
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Canonical row and report types |
//! | [`source_rbi`] | Central-bank archive adapter |
//! | [`source_sbi`] | Bank card-rate PDF adapter |
//! | [`source_lme`] | Metals-exchange table adapter |
//! | [`workbook`] | Workbook/table cell extraction |
//! | [`ingest`] | Ingestion engine (retry, soft stop, checkpoints) |
//! | [`backend`] | Persistence gateway trait |
//! | [`query`] | Snapshots, history, frequency reduction |
//! | [`migrate`] | Cross-backend migration runner |
//! | [`db`] | Backend resolution and connection |

pub mod backend;
pub mod backend_document;
pub mod backend_postgres;
pub mod backend_sqlite;
pub mod config;
pub mod daterange;
pub mod db;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod query;
pub mod source;
pub mod source_lme;
pub mod source_rbi;
pub mod source_sbi;
pub mod sources;
pub mod stats;
pub mod workbook;
