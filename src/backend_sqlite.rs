//! Embedded SQLite backend — the default store.
//!
//! Dates are stored as ISO-8601 text, which compares correctly with plain
//! string ordering, so range filters are simple `>=`/`<=` clauses.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backend::{Backend, TableCount};
use crate::error::{IngestError, Result};
use crate::models::{
    Checkpoint, CommodityObservation, Metal, PersistenceResult, RateObservation, Source,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS forex_rates_rbi (
        rate_date DATE NOT NULL,
        currency TEXT NOT NULL,
        rate REAL NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(rate_date, currency)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forex_rates_sbi (
        rate_date DATE NOT NULL,
        currency TEXT NOT NULL,
        rate REAL NOT NULL,
        tt_buy REAL,
        tt_sell REAL,
        bill_buy REAL,
        bill_sell REAL,
        travel_card_buy REAL,
        travel_card_sell REAL,
        cn_buy REAL,
        cn_sell REAL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(rate_date, currency)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lme_copper_rates (
        rate_date DATE PRIMARY KEY,
        price REAL,
        price_3_month REAL,
        stock INTEGER,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lme_aluminum_rates (
        rate_date DATE PRIMARY KEY,
        price REAL,
        price_3_month REAL,
        stock INTEGER,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingestion_metadata (
        source TEXT PRIMARY KEY,
        last_ingested_date DATE NOT NULL,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

const TABLES: &[&str] = &[
    "forex_rates_rbi",
    "forex_rates_sbi",
    "lme_copper_rates",
    "lme_aluminum_rates",
    "ingestion_metadata",
];

pub struct SqliteBackend {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteBackend {
    /// Open (creating if missing) the embedded database at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IngestError::Connectivity(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(IngestError::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    fn forex_table(source: Source) -> Result<&'static str> {
        match source {
            Source::Rbi => Ok("forex_rates_rbi"),
            Source::Sbi => Ok("forex_rates_sbi"),
            _ => Err(IngestError::Validation(format!(
                "{source} rows do not belong in a forex table"
            ))),
        }
    }

    async fn fetch_forex_table(
        &self,
        source: Source,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RateObservation>> {
        let table = Self::forex_table(source)?;
        let mut sql = format!("SELECT * FROM {table} WHERE 1=1");
        if from.is_some() {
            sql.push_str(" AND rate_date >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND rate_date <= ?");
        }
        sql.push_str(" ORDER BY rate_date, currency");

        let mut query = sqlx::query(&sql);
        if let Some(from) = from {
            query = query.bind(from.to_string());
        }
        if let Some(to) = to {
            query = query.bind(to.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let rate_date = parse_date_column(&row.get::<String, _>("rate_date"))?;
            let spreads = source == Source::Sbi;
            records.push(RateObservation {
                source,
                rate_date,
                currency: row.get("currency"),
                rate: row.get("rate"),
                tt_buy: if spreads { row.get("tt_buy") } else { None },
                tt_sell: if spreads { row.get("tt_sell") } else { None },
                bill_buy: if spreads { row.get("bill_buy") } else { None },
                bill_sell: if spreads { row.get("bill_sell") } else { None },
                travel_card_buy: if spreads {
                    row.get("travel_card_buy")
                } else {
                    None
                },
                travel_card_sell: if spreads {
                    row.get("travel_card_sell")
                } else {
                    None
                },
                cn_buy: if spreads { row.get("cn_buy") } else { None },
                cn_sell: if spreads { row.get("cn_sell") } else { None },
            });
        }
        Ok(records)
    }
}

fn parse_date_column(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| IngestError::Connectivity(format!("corrupt date value in store: '{value}'")))
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn upsert_rates(&self, rows: &[RateObservation]) -> Result<PersistenceResult> {
        let mut result = PersistenceResult::default();
        if rows.is_empty() {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let table = Self::forex_table(row.source)?;
            let date = row.rate_date.to_string();

            let exists: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT 1 FROM {table} WHERE rate_date = ? AND currency = ?"
            ))
            .bind(&date)
            .bind(&row.currency)
            .fetch_optional(&mut *tx)
            .await?;

            match row.source {
                Source::Sbi => {
                    sqlx::query(
                        r#"
                        INSERT INTO forex_rates_sbi (
                            rate_date, currency, rate,
                            tt_buy, tt_sell, bill_buy, bill_sell,
                            travel_card_buy, travel_card_sell, cn_buy, cn_sell
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(rate_date, currency) DO UPDATE SET
                            rate = excluded.rate,
                            tt_buy = excluded.tt_buy,
                            tt_sell = excluded.tt_sell,
                            bill_buy = excluded.bill_buy,
                            bill_sell = excluded.bill_sell,
                            travel_card_buy = excluded.travel_card_buy,
                            travel_card_sell = excluded.travel_card_sell,
                            cn_buy = excluded.cn_buy,
                            cn_sell = excluded.cn_sell
                        "#,
                    )
                    .bind(&date)
                    .bind(&row.currency)
                    .bind(row.rate)
                    .bind(row.tt_buy)
                    .bind(row.tt_sell)
                    .bind(row.bill_buy)
                    .bind(row.bill_sell)
                    .bind(row.travel_card_buy)
                    .bind(row.travel_card_sell)
                    .bind(row.cn_buy)
                    .bind(row.cn_sell)
                    .execute(&mut *tx)
                    .await?;
                }
                _ => {
                    sqlx::query(
                        r#"
                        INSERT INTO forex_rates_rbi (rate_date, currency, rate)
                        VALUES (?, ?, ?)
                        ON CONFLICT(rate_date, currency) DO UPDATE SET
                            rate = excluded.rate
                        "#,
                    )
                    .bind(&date)
                    .bind(&row.currency)
                    .bind(row.rate)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            if exists.is_some() {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn upsert_commodities(
        &self,
        rows: &[CommodityObservation],
    ) -> Result<PersistenceResult> {
        let mut result = PersistenceResult::default();
        if rows.is_empty() {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let table = row.metal.table();
            let date = row.rate_date.to_string();

            let exists: Option<i64> =
                sqlx::query_scalar(&format!("SELECT 1 FROM {table} WHERE rate_date = ?"))
                    .bind(&date)
                    .fetch_optional(&mut *tx)
                    .await?;

            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (rate_date, price, price_3_month, stock)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(rate_date) DO UPDATE SET
                    price = excluded.price,
                    price_3_month = excluded.price_3_month,
                    stock = excluded.stock
                "#
            ))
            .bind(&date)
            .bind(row.price)
            .bind(row.price_3_month)
            .bind(row.stock)
            .execute(&mut *tx)
            .await?;

            if exists.is_some() {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_rates(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        source: Option<Source>,
    ) -> Result<Vec<RateObservation>> {
        // Bank-published rows first, then the archive (publication-time
        // precedence for blended queries).
        let mut records = Vec::new();
        if source.is_none() || source == Some(Source::Sbi) {
            records.extend(self.fetch_forex_table(Source::Sbi, from, to).await?);
        }
        if source.is_none() || source == Some(Source::Rbi) {
            records.extend(self.fetch_forex_table(Source::Rbi, from, to).await?);
        }
        Ok(records)
    }

    async fn fetch_commodities(
        &self,
        metal: Metal,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CommodityObservation>> {
        let table = metal.table();
        let mut sql = format!("SELECT * FROM {table} WHERE 1=1");
        if from.is_some() {
            sql.push_str(" AND rate_date >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND rate_date <= ?");
        }
        sql.push_str(" ORDER BY rate_date");

        let mut query = sqlx::query(&sql);
        if let Some(from) = from {
            query = query.bind(from.to_string());
        }
        if let Some(to) = to {
            query = query.bind(to.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(CommodityObservation {
                metal,
                rate_date: parse_date_column(&row.get::<String, _>("rate_date"))?,
                price: row.get("price"),
                price_3_month: row.get("price_3_month"),
                stock: row.get("stock"),
            });
        }
        Ok(records)
    }

    async fn latest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>> {
        let table = match source {
            Source::Rbi | Source::Sbi => Self::forex_table(source)?,
            Source::LmeCopper => Metal::Copper.table(),
            Source::LmeAluminum => Metal::Aluminum.table(),
        };
        let latest: Option<String> =
            sqlx::query_scalar(&format!("SELECT MAX(rate_date) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
        latest.map(|s| parse_date_column(&s)).transpose()
    }

    async fn earliest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>> {
        let table = match source {
            Source::Rbi | Source::Sbi => Self::forex_table(source)?,
            Source::LmeCopper => Metal::Copper.table(),
            Source::LmeAluminum => Metal::Aluminum.table(),
        };
        let earliest: Option<String> =
            sqlx::query_scalar(&format!("SELECT MIN(rate_date) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
        earliest.map(|s| parse_date_column(&s)).transpose()
    }

    async fn get_checkpoint(&self, source: Source) -> Result<Option<NaiveDate>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT last_ingested_date FROM ingestion_metadata WHERE source = ?",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        value.map(|s| parse_date_column(&s)).transpose()
    }

    async fn set_checkpoint(&self, source: Source, date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_metadata (source, last_ingested_date, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(source) DO UPDATE SET
                last_ingested_date = excluded.last_ingested_date,
                updated_at = excluded.updated_at
            WHERE excluded.last_ingested_date > ingestion_metadata.last_ingested_date
            "#,
        )
        .bind(source.as_str())
        .bind(date.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT source, last_ingested_date FROM ingestion_metadata ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("source");
            // Skip unknown source keys rather than failing the whole listing.
            if let Some(source) = Source::parse(&name) {
                checkpoints.push(Checkpoint {
                    source,
                    last_ingested_date: parse_date_column(&row.get::<String, _>(
                        "last_ingested_date",
                    ))?,
                });
            }
        }
        Ok(checkpoints)
    }

    async fn table_counts(&self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push(TableCount {
                table: table.to_string(),
                rows: rows as u64,
            });
        }
        Ok(counts)
    }

    async fn test_connection(&self) -> (bool, Option<String>) {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
