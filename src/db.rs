//! Backend selection and connection.
//!
//! With no `[db] url` configured, the embedded SQLite file is used. A URL
//! switches to an external backend; the `doc+` scheme prefix selects the
//! document-store layout over the same server.

use std::path::PathBuf;

use crate::backend::Backend;
use crate::backend_document::DocumentBackend;
use crate::backend_postgres::PostgresBackend;
use crate::backend_sqlite::SqliteBackend;
use crate::config::Config;
use crate::error::{IngestError, Result};

/// Backend flavor resolved from a connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Embedded SQLite file at the given path.
    Sqlite(PathBuf),
    /// Relational tables over Postgres; holds the driver URL.
    Postgres(String),
    /// Document collections over Postgres; holds the driver URL.
    Document(String),
}

impl BackendKind {
    /// Resolve a connection URL into a backend flavor.
    ///
    /// Accepted schemes: `sqlite:` (optionally `sqlite://`), `postgres:` /
    /// `postgresql:`, and `doc+postgres:` / `doc+postgresql:`.
    pub fn from_url(url: &str) -> Result<BackendKind> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| IngestError::UnsupportedBackend(url.to_string()))?;
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => {
                let path = rest.trim_start_matches("//");
                if path.is_empty() {
                    return Err(IngestError::UnsupportedBackend(url.to_string()));
                }
                Ok(BackendKind::Sqlite(PathBuf::from(path)))
            }
            "postgres" | "postgresql" => Ok(BackendKind::Postgres(normalize_pg(url))),
            "doc+postgres" | "doc+postgresql" => {
                let driver_url = url
                    .split_once('+')
                    .map(|(_, u)| u.to_string())
                    .unwrap_or_else(|| url.to_string());
                Ok(BackendKind::Document(normalize_pg(&driver_url)))
            }
            other => Err(IngestError::UnsupportedBackend(other.to_string())),
        }
    }

    pub async fn connect(&self) -> Result<Box<dyn Backend>> {
        match self {
            BackendKind::Sqlite(path) => Ok(Box::new(SqliteBackend::connect(path).await?)),
            BackendKind::Postgres(url) => Ok(Box::new(PostgresBackend::connect(url).await?)),
            BackendKind::Document(url) => Ok(Box::new(DocumentBackend::connect(url).await?)),
        }
    }

    /// Whether this is the embedded default store.
    pub fn is_embedded(&self) -> bool {
        matches!(self, BackendKind::Sqlite(_))
    }
}

fn normalize_pg(url: &str) -> String {
    // sqlx expects the `postgres` spelling.
    match url.strip_prefix("postgresql:") {
        Some(rest) => format!("postgres:{rest}"),
        None => url.to_string(),
    }
}

/// Resolve the backend configured in `[db]`: the external URL if present,
/// otherwise the embedded SQLite file.
pub fn configured_kind(config: &Config) -> Result<BackendKind> {
    match &config.db.url {
        Some(url) => BackendKind::from_url(url),
        None => Ok(BackendKind::Sqlite(config.db.path.clone())),
    }
}

/// Connect to the configured backend and make sure its schema exists.
pub async fn connect(config: &Config) -> Result<Box<dyn Backend>> {
    let backend = configured_kind(config)?.connect().await?;
    backend.ensure_schema().await?;
    Ok(backend)
}

/// Connect to the embedded store explicitly (migration source).
pub async fn connect_embedded(config: &Config) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = Box::new(SqliteBackend::connect(&config.db.path).await?);
    backend.ensure_schema().await?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_sqlite_paths() {
        assert_eq!(
            BackendKind::from_url("sqlite:data/forex.sqlite").unwrap(),
            BackendKind::Sqlite(PathBuf::from("data/forex.sqlite"))
        );
        assert_eq!(
            BackendKind::from_url("sqlite:///tmp/forex.db").unwrap(),
            BackendKind::Sqlite(PathBuf::from("/tmp/forex.db"))
        );
    }

    #[test]
    fn resolves_postgres_spellings() {
        assert_eq!(
            BackendKind::from_url("postgresql://localhost/forex").unwrap(),
            BackendKind::Postgres("postgres://localhost/forex".to_string())
        );
        assert_eq!(
            BackendKind::from_url("postgres://localhost/forex").unwrap(),
            BackendKind::Postgres("postgres://localhost/forex".to_string())
        );
    }

    #[test]
    fn resolves_document_prefix() {
        assert_eq!(
            BackendKind::from_url("doc+postgresql://localhost/forex").unwrap(),
            BackendKind::Document("postgres://localhost/forex".to_string())
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(BackendKind::from_url("mysql://localhost/forex").is_err());
        assert!(BackendKind::from_url("not-a-url").is_err());
        assert!(BackendKind::from_url("sqlite:").is_err());
    }
}
