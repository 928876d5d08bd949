//! Thin HTTP layer shared by the source adapters.
//!
//! Each call performs exactly one attempt with the configured timeout and
//! surfaces failures as `TransientFetch`; the ingestion engine owns the
//! retry loop and its backoff schedule. Adapters never retry on their own.

use rand::Rng;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::{IngestError, Result};
use crate::models::Source;

const USER_AGENT: &str = concat!("fx-ingest/", env!("CARGO_PKG_VERSION"));

pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IngestError::Connectivity(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn get_text(&self, source: Source, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        let response = check_status(source, url, response)?;
        response
            .text()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))
    }

    pub async fn get_bytes(&self, source: Source, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        let response = check_status(source, url, response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        Ok(bytes.to_vec())
    }

    pub async fn post_form_text(
        &self,
        source: Source,
        url: &str,
        form: &[(String, String)],
    ) -> Result<String> {
        let response = self
            .client
            .post(url)
            .header("Referer", url)
            .form(form)
            .send()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        let response = check_status(source, url, response)?;
        response
            .text()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))
    }

    pub async fn post_form_bytes(
        &self,
        source: Source,
        url: &str,
        form: &[(String, String)],
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .header("Referer", url)
            .form(form)
            .send()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        let response = check_status(source, url, response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transient(source, url, &e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn transient(source: Source, url: &str, detail: &str) -> IngestError {
    IngestError::TransientFetch {
        src: source,
        detail: format!("{url}: {detail}"),
    }
}

fn check_status(
    source: Source,
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = if matches!(status.as_u16(), 403 | 418 | 429) {
        format!(
            "HTTP {status}: upstream is throttling automated downloads; \
             wait before retrying or request a smaller date window"
        )
    } else {
        format!("HTTP {status}")
    };
    Err(transient(source, url, &detail))
}

/// Backoff before retry `attempt` (1-based): exponential in the attempt
/// number with multiplicative jitter in [0.5, 1.5) so parallel callers do
/// not hammer the upstream in lockstep.
pub fn backoff_delay(config: &FetchConfig, attempt: u32) -> Duration {
    let exp = config.backoff_secs * f64::powi(2.0, attempt.saturating_sub(1) as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64((exp * jitter).min(120.0))
}
