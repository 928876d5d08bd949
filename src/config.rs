use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Embedded SQLite database file, used when no `url` is configured.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// External backend URL (`postgres://...`, `doc+postgres://...`,
    /// `sqlite:...`). Overrides `path` when present.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            url: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/forex.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retry attempts.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_secs() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default)]
    pub rbi: RbiConfig,
    #[serde(default)]
    pub sbi: SbiConfig,
    #[serde(default)]
    pub lme: LmeConfig,
    /// First date ingested when a source has no checkpoint and no explicit
    /// `--from`. The RBI adapter clamps this to its archive floor.
    #[serde(default = "default_epoch")]
    pub default_epoch: NaiveDate,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            rbi: RbiConfig::default(),
            sbi: SbiConfig::default(),
            lme: LmeConfig::default(),
            default_epoch: default_epoch(),
        }
    }
}

fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RbiConfig {
    /// Archive endpoints tried in order; the host publishes under both the
    /// www and bare domains and occasionally blocks one of them.
    #[serde(default = "default_rbi_archive_urls")]
    pub archive_urls: Vec<String>,
}

impl Default for RbiConfig {
    fn default() -> Self {
        Self {
            archive_urls: default_rbi_archive_urls(),
        }
    }
}

fn default_rbi_archive_urls() -> Vec<String> {
    vec![
        "https://www.rbi.org.in/Scripts/ReferenceRateArchive.aspx".to_string(),
        "https://rbi.org.in/Scripts/ReferenceRateArchive.aspx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SbiConfig {
    #[serde(default = "default_sbi_pdf_url")]
    pub pdf_url: String,
    /// Directory of historical card-rate PDFs named `YYYY-MM-DD.pdf`.
    #[serde(default = "default_sbi_resource_dir")]
    pub resource_dir: PathBuf,
}

impl Default for SbiConfig {
    fn default() -> Self {
        Self {
            pdf_url: default_sbi_pdf_url(),
            resource_dir: default_sbi_resource_dir(),
        }
    }
}

fn default_sbi_pdf_url() -> String {
    "https://sbi.bank.in/documents/16012/1400784/FOREX_CARD_RATES.pdf".to_string()
}

fn default_sbi_resource_dir() -> PathBuf {
    PathBuf::from("resources")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LmeConfig {
    #[serde(default = "default_lme_copper_url")]
    pub copper_url: String,
    #[serde(default = "default_lme_aluminum_url")]
    pub aluminum_url: String,
}

impl Default for LmeConfig {
    fn default() -> Self {
        Self {
            copper_url: default_lme_copper_url(),
            aluminum_url: default_lme_aluminum_url(),
        }
    }
}

fn default_lme_copper_url() -> String {
    "https://www.westmetall.com/en/markdaten.php?action=table&field=LME_Cu_cash".to_string()
}

fn default_lme_aluminum_url() -> String {
    "https://www.westmetall.com/en/markdaten.php?action=table&field=LME_Al_cash".to_string()
}

/// Load configuration from `path`; a missing file yields the built-in
/// defaults so the tool works out of the box against the embedded database.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }
    if config.fetch.backoff_secs <= 0.0 {
        anyhow::bail!("fetch.backoff_secs must be > 0");
    }
    if config.sources.rbi.archive_urls.is_empty() {
        anyhow::bail!("sources.rbi.archive_urls must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert!(config.db.url.is_none());
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.sources.rbi.archive_urls.len(), 2);
        assert!(config.sources.sbi.pdf_url.ends_with(".pdf"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [fetch]
            max_retries = 2

            [db]
            url = "postgres://localhost/forex"
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.max_retries, 2);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.db.url.as_deref(), Some("postgres://localhost/forex"));
        assert_eq!(config.sources.default_epoch.to_string(), "2024-01-01");
    }
}
