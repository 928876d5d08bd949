//! Central-bank reference-rate archive adapter.
//!
//! The archive is an ASP.NET form: a GET yields the page with its hidden
//! state fields, a POST of the date window plus those fields yields a result
//! page, and the result page's download link (a `__doPostBack` trigger)
//! yields the workbook. The adapter replays that flow over plain HTTP.
//!
//! When the archive has nothing published for the requested window it
//! answers with a literal "No Reference Rate Found" marker instead of a
//! download link. That is a soft stop — reported as
//! [`FetchOutcome::NoDataYet`], never as an error.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::Config;
use crate::daterange::{month_ranges, DateRange};
use crate::error::{IngestError, Result, RBI_MIN_AVAILABLE_DATE};
use crate::fetch::HttpClient;
use crate::models::Source;
use crate::source::{FetchOutcome, SourceAdapter};
use crate::workbook::{parse_reference_rates, WorkbookError};

const NO_DATA_MARKER: &str = "No Reference Rate Found";

const FROM_DATE_FIELD: &str = "ctl00$ContentPlaceHolder1$FromDateTextBox";
const TO_DATE_FIELD: &str = "ctl00$ContentPlaceHolder1$ToDateTextBox";
const GO_BUTTON_FIELD: &str = "ctl00$ContentPlaceHolder1$btnGo";
const DOWNLOAD_LINK_ID: &str = "ctl00_ContentPlaceHolder1_lnkDownload";

const HIDDEN_FIELDS: [&str; 3] = ["__VIEWSTATE", "__VIEWSTATEGENERATOR", "__EVENTVALIDATION"];

const FORM_DATE_FORMAT: &str = "%d/%m/%Y";

pub struct RbiAdapter {
    client: HttpClient,
    archive_urls: Vec<String>,
}

impl RbiAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(&config.fetch)?,
            archive_urls: config.sources.rbi.archive_urls.clone(),
        })
    }

    /// Run the form flow against one archive endpoint; the caller iterates
    /// over the mirror list.
    async fn query_archive(&self, url: &str, window: DateRange) -> Result<String> {
        let page = self.client.get_text(Source::Rbi, url).await?;
        let mut form = extract_hidden_fields(&page).ok_or_else(|| IngestError::Parse {
            src: Source::Rbi,
            from: window.start,
            to: window.end,
            detail: "archive page is missing its form state fields".into(),
        })?;
        form.push((
            FROM_DATE_FIELD.to_string(),
            window.start.format(FORM_DATE_FORMAT).to_string(),
        ));
        form.push((
            TO_DATE_FIELD.to_string(),
            window.end.format(FORM_DATE_FORMAT).to_string(),
        ));
        form.push((GO_BUTTON_FIELD.to_string(), "Go".to_string()));
        self.client.post_form_text(Source::Rbi, url, &form).await
    }

    async fn download_workbook(
        &self,
        url: &str,
        result_page: &str,
        href: &str,
        window: DateRange,
    ) -> Result<Vec<u8>> {
        if let Some((target, argument)) = parse_postback(href) {
            let mut form = extract_hidden_fields(result_page).ok_or_else(|| {
                IngestError::Parse {
                    src: Source::Rbi,
                    from: window.start,
                    to: window.end,
                    detail: "result page is missing its form state fields".into(),
                }
            })?;
            form.push(("__EVENTTARGET".to_string(), target));
            form.push(("__EVENTARGUMENT".to_string(), argument));
            self.client.post_form_bytes(Source::Rbi, url, &form).await
        } else {
            let absolute = join_url(url, href);
            self.client.get_bytes(Source::Rbi, &absolute).await
        }
    }
}

#[async_trait]
impl SourceAdapter for RbiAdapter {
    fn source(&self) -> Source {
        Source::Rbi
    }

    fn description(&self) -> String {
        format!("reference rate archive ({})", self.archive_urls[0])
    }

    fn batches(&self, window: DateRange) -> Vec<DateRange> {
        month_ranges(window)
    }

    fn default_epoch(&self) -> NaiveDate {
        RBI_MIN_AVAILABLE_DATE
    }

    fn validate_window(&self, window: DateRange) -> Result<()> {
        if window.start < RBI_MIN_AVAILABLE_DATE {
            return Err(IngestError::RbiMinDate);
        }
        Ok(())
    }

    async fn fetch_and_parse(&self, window: DateRange) -> Result<FetchOutcome> {
        info!(window = %window, "fetching RBI reference rates");

        let mut last_err: Option<IngestError> = None;
        let mut result: Option<(String, String)> = None;
        for url in &self.archive_urls {
            match self.query_archive(url, window).await {
                Ok(page) => {
                    result = Some((url.clone(), page));
                    break;
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "archive endpoint failed");
                    last_err = Some(e);
                }
            }
        }
        let (url, result_page) = match result {
            Some(found) => found,
            None => {
                return Err(last_err.unwrap_or_else(|| IngestError::TransientFetch {
                    src: Source::Rbi,
                    detail: "no archive endpoints configured".into(),
                }))
            }
        };

        if result_page.contains(NO_DATA_MARKER) {
            info!(window = %window, "archive has no reference rates published yet");
            return Ok(FetchOutcome::NoDataYet);
        }

        let href = match find_download_href(&result_page) {
            Some(href) => href,
            None => {
                return Err(IngestError::Parse {
                    src: Source::Rbi,
                    from: window.start,
                    to: window.end,
                    detail: "result page has neither a download link nor a no-data marker".into(),
                })
            }
        };

        let bytes = self
            .download_workbook(&url, &result_page, &href, window)
            .await?;

        // Some mirror responses put the marker inside the served document.
        if bytes
            .windows(NO_DATA_MARKER.len())
            .any(|w| w == NO_DATA_MARKER.as_bytes())
        {
            return Ok(FetchOutcome::NoDataYet);
        }

        let rows = parse_reference_rates(&bytes).map_err(|e: WorkbookError| IngestError::Parse {
            src: Source::Rbi,
            from: window.start,
            to: window.end,
            detail: e.to_string(),
        })?;
        Ok(FetchOutcome::Rates(rows))
    }
}

/// Collect the ASP.NET hidden state inputs from a page. Returns `None` when
/// any required field is absent (the page is not the expected form).
fn extract_hidden_fields(html: &str) -> Option<Vec<(String, String)>> {
    let mut fields = Vec::with_capacity(HIDDEN_FIELDS.len());
    for name in HIDDEN_FIELDS {
        fields.push((name.to_string(), input_value(html, name)?));
    }
    Some(fields)
}

/// Value of `<input name="..." value="...">`, tolerant of attribute order.
fn input_value(html: &str, name: &str) -> Option<String> {
    let needle = format!("name=\"{name}\"");
    let at = html.find(&needle)?;
    // The value attribute sits inside the same tag.
    let tag_start = html[..at].rfind('<')?;
    let tag_end = at + html[at..].find('>')?;
    let tag = &html[tag_start..tag_end];
    let value_at = tag.find("value=\"")? + "value=\"".len();
    let value_end = tag[value_at..].find('"')?;
    Some(tag[value_at..value_at + value_end].to_string())
}

/// Href of the workbook download anchor, identified by its element id.
fn find_download_href(html: &str) -> Option<String> {
    let needle = format!("id=\"{DOWNLOAD_LINK_ID}\"");
    let at = html.find(&needle)?;
    let tag_start = html[..at].rfind('<')?;
    let tag_end = at + html[at..].find('>')?;
    let tag = &html[tag_start..tag_end];
    let href_at = tag.find("href=\"")? + "href=\"".len();
    let href_end = tag[href_at..].find('"')?;
    let href = tag[href_at..href_at + href_end].trim();
    if href.is_empty() {
        None
    } else {
        Some(href.replace("&amp;", "&"))
    }
}

/// Decompose `javascript:__doPostBack('target','argument')`.
fn parse_postback(href: &str) -> Option<(String, String)> {
    let rest = href.strip_prefix("javascript:")?.trim();
    let args = rest.strip_prefix("__doPostBack(")?.strip_suffix(')')?;
    let mut parts = args.splitn(2, ',');
    let target = parts.next()?.trim().trim_matches('\'');
    let argument = parts.next()?.trim().trim_matches('\'');
    Some((target.to_string(), argument.to_string()))
}

/// Resolve a possibly relative href against the page URL.
fn join_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix('/') {
        if let Some(scheme_end) = base.find("://") {
            if let Some(host_end) = base[scheme_end + 3..].find('/') {
                return format!("{}/{}", &base[..scheme_end + 3 + host_end], rest);
            }
            return format!("{base}/{rest}");
        }
    }
    match base.rfind('/') {
        Some(at) if at > base.find("://").map(|i| i + 2).unwrap_or(0) => {
            format!("{}/{}", &base[..at], href)
        }
        _ => format!("{base}/{href}"),
    }
}
