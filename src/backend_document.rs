//! Document-store backend.
//!
//! Observations live as whole JSON documents in collection-style tables
//! (`forex_rates`, `lme_rates`, `checkpoints`), one document per natural
//! key, upserted by replacing the full document. The key fields are
//! mirrored into plain columns so range scans stay indexable; everything
//! else lives inside the `doc` JSONB value.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::backend::{Backend, TableCount};
use crate::backend_postgres::redact_url;
use crate::error::{IngestError, Result};
use crate::models::{
    Checkpoint, CommodityObservation, Metal, PersistenceResult, RateObservation, Source,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS forex_rates (
        source TEXT NOT NULL,
        rate_date DATE NOT NULL,
        currency_code TEXT NOT NULL,
        doc JSONB NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(source, rate_date, currency_code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lme_rates (
        metal TEXT NOT NULL,
        rate_date DATE NOT NULL,
        doc JSONB NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(metal, rate_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        source TEXT PRIMARY KEY,
        doc JSONB NOT NULL
    )
    "#,
];

const COLLECTIONS: &[&str] = &["forex_rates", "lme_rates", "checkpoints"];

pub struct DocumentBackend {
    pool: PgPool,
    url: String,
}

impl DocumentBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            url: redact_url(url),
        })
    }

    async fn fetch_forex_source(
        &self,
        source: Source,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RateObservation>> {
        let mut sql = "SELECT doc FROM forex_rates WHERE source = $1".to_string();
        let mut arg = 1;
        if from.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND rate_date >= ${arg}"));
        }
        if to.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND rate_date <= ${arg}"));
        }
        sql.push_str(" ORDER BY rate_date, currency_code");

        let mut query = sqlx::query(&sql).bind(source.as_str());
        if let Some(from) = from {
            query = query.bind(from);
        }
        if let Some(to) = to {
            query = query.bind(to);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let doc: serde_json::Value = row.get("doc");
                serde_json::from_value(doc)
                    .map_err(|e| IngestError::Connectivity(format!("corrupt document: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl Backend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    fn describe(&self) -> String {
        self.url.clone()
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
            let doc = serde_json::to_value(row)
                .map_err(|e| IngestError::Validation(format!("unserializable row: {e}")))?;
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM forex_rates WHERE source = $1 AND rate_date = $2 AND currency_code = $3",
            )
            .bind(row.source.as_str())
            .bind(row.rate_date)
            .bind(&row.currency)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO forex_rates (source, rate_date, currency_code, doc)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT(source, rate_date, currency_code) DO UPDATE SET
                    doc = excluded.doc
                "#,
            )
            .bind(row.source.as_str())
            .bind(row.rate_date)
            .bind(&row.currency)
            .bind(doc)
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
            let doc = serde_json::to_value(row)
                .map_err(|e| IngestError::Validation(format!("unserializable row: {e}")))?;
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM lme_rates WHERE metal = $1 AND rate_date = $2")
                    .bind(row.metal.as_str())
                    .bind(row.rate_date)
                    .fetch_optional(&mut *tx)
                    .await?;

            sqlx::query(
                r#"
                INSERT INTO lme_rates (metal, rate_date, doc)
                VALUES ($1, $2, $3)
                ON CONFLICT(metal, rate_date) DO UPDATE SET
                    doc = excluded.doc
                "#,
            )
            .bind(row.metal.as_str())
            .bind(row.rate_date)
            .bind(doc)
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
        let mut records = Vec::new();
        if source.is_none() || source == Some(Source::Sbi) {
            records.extend(self.fetch_forex_source(Source::Sbi, from, to).await?);
        }
        if source.is_none() || source == Some(Source::Rbi) {
            records.extend(self.fetch_forex_source(Source::Rbi, from, to).await?);
        }
        Ok(records)
    }

    async fn fetch_commodities(
        &self,
        metal: Metal,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CommodityObservation>> {
        let mut sql = "SELECT doc FROM lme_rates WHERE metal = $1".to_string();
        let mut arg = 1;
        if from.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND rate_date >= ${arg}"));
        }
        if to.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND rate_date <= ${arg}"));
        }
        sql.push_str(" ORDER BY rate_date");

        let mut query = sqlx::query(&sql).bind(metal.as_str());
        if let Some(from) = from {
            query = query.bind(from);
        }
        if let Some(to) = to {
            query = query.bind(to);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let doc: serde_json::Value = row.get("doc");
                serde_json::from_value(doc)
                    .map_err(|e| IngestError::Connectivity(format!("corrupt document: {e}")))
            })
            .collect()
    }

    async fn latest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>> {
        let latest: Option<NaiveDate> = if source.is_forex() {
            sqlx::query_scalar("SELECT MAX(rate_date) FROM forex_rates WHERE source = $1")
                .bind(source.as_str())
                .fetch_one(&self.pool)
                .await?
        } else {
            let metal = source.metal().ok_or_else(|| {
                IngestError::UnsupportedMetal(source.as_str().to_string())
            })?;
            sqlx::query_scalar("SELECT MAX(rate_date) FROM lme_rates WHERE metal = $1")
                .bind(metal.as_str())
                .fetch_one(&self.pool)
                .await?
        };
        Ok(latest)
    }

    async fn earliest_rate_date(&self, source: Source) -> Result<Option<NaiveDate>> {
        let earliest: Option<NaiveDate> = if source.is_forex() {
            sqlx::query_scalar("SELECT MIN(rate_date) FROM forex_rates WHERE source = $1")
                .bind(source.as_str())
                .fetch_one(&self.pool)
                .await?
        } else {
            let metal = source.metal().ok_or_else(|| {
                IngestError::UnsupportedMetal(source.as_str().to_string())
            })?;
            sqlx::query_scalar("SELECT MIN(rate_date) FROM lme_rates WHERE metal = $1")
                .bind(metal.as_str())
                .fetch_one(&self.pool)
                .await?
        };
        Ok(earliest)
    }

    async fn get_checkpoint(&self, source: Source) -> Result<Option<NaiveDate>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT doc->>'last_ingested_date' FROM checkpoints WHERE source = $1",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        value
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
                    IngestError::Connectivity(format!("corrupt checkpoint document: '{s}'"))
                })
            })
            .transpose()
    }

    async fn set_checkpoint(&self, source: Source, date: NaiveDate) -> Result<()> {
        let doc = serde_json::json!({
            "last_ingested_date": date.to_string(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        // ISO dates compare correctly as text, so the monotonic guard can
        // operate directly on the document field.
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, doc)
            VALUES ($1, $2)
            ON CONFLICT(source) DO UPDATE SET doc = excluded.doc
            WHERE (excluded.doc->>'last_ingested_date') > (checkpoints.doc->>'last_ingested_date')
            "#,
        )
        .bind(source.as_str())
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT source, doc->>'last_ingested_date' AS last_ingested_date FROM checkpoints ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("source");
            let date: String = row.get("last_ingested_date");
            if let Some(source) = Source::parse(&name) {
                let last_ingested_date =
                    NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
                        IngestError::Connectivity(format!("corrupt checkpoint document: '{date}'"))
                    })?;
                checkpoints.push(Checkpoint {
                    source,
                    last_ingested_date,
                });
            }
        }
        Ok(checkpoints)
    }

    async fn table_counts(&self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(COLLECTIONS.len());
        for collection in COLLECTIONS {
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {collection}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push(TableCount {
                table: collection.to_string(),
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
