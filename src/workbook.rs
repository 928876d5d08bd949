//! Reference-rate workbook parsing.
//!
//! The archive's "Excel" download arrives in one of two shapes: a genuine
//! OOXML spreadsheet, or (historically) an HTML table saved with an `.xls`
//! extension. Both are normalized into rows of cell text here; the RBI
//! adapter turns those rows into observations.

use std::io::Read;

use chrono::NaiveDate;

use crate::models::{RateObservation, Source};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells per worksheet (avoids unbounded memory on corrupt files).
const MAX_CELLS: usize = 100_000;

/// Expected column labels, in publication order.
const HEADER: [&str; 5] = ["DATE", "USD", "GBP", "EURO", "YEN"];
/// Published column label → ISO 4217 code.
const LABEL_TO_ISO: [(&str, &str); 4] = [
    ("USD", "USD"),
    ("GBP", "GBP"),
    ("EURO", "EUR"),
    ("YEN", "JPY"),
];

const DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%d-%b-%Y", "%d-%m-%Y"];

#[derive(Debug)]
pub enum WorkbookError {
    /// The document's table structure does not match the published layout.
    Structure(String),
    /// The container or markup could not be decoded at all.
    Decode(String),
}

impl std::fmt::Display for WorkbookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkbookError::Structure(e) => write!(f, "workbook structure: {e}"),
            WorkbookError::Decode(e) => write!(f, "workbook decode: {e}"),
        }
    }
}

impl std::error::Error for WorkbookError {}

/// Parse the downloaded workbook into reference-rate observations.
///
/// Rows whose date cell is empty, a header echo, or unparseable are skipped
/// (the upstream repeats its header inside long tables). A document with no
/// usable data rows at all is a structure error; the caller treats that as
/// a hard parse failure, not an empty result.
pub fn parse_reference_rates(bytes: &[u8]) -> Result<Vec<RateObservation>, WorkbookError> {
    let rows = extract_rows(bytes)?;
    observations_from_rows(&rows)
}

/// Raw cell rows from either workbook shape.
pub fn extract_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, WorkbookError> {
    if bytes.starts_with(b"PK\x03\x04") {
        extract_xlsx_rows(bytes)
    } else {
        extract_html_rows(bytes)
    }
}

fn observations_from_rows(
    rows: &[Vec<String>],
) -> Result<Vec<RateObservation>, WorkbookError> {
    if rows.is_empty() {
        return Err(WorkbookError::Structure("no table rows found".into()));
    }

    // Column order follows the header row when one is present, else the
    // published default layout.
    let columns: Vec<String> = rows
        .iter()
        .find(|row| {
            row.first()
                .map(|cell| cell.trim().eq_ignore_ascii_case("date"))
                .unwrap_or(false)
        })
        .map(|row| row.iter().map(|c| c.trim().to_uppercase()).collect())
        .unwrap_or_else(|| HEADER.iter().map(|c| c.to_string()).collect());

    if columns.len() < 2 {
        return Err(WorkbookError::Structure(
            "table is missing rate columns".into(),
        ));
    }

    let mut observations = Vec::new();
    for row in rows {
        let Some(first) = row.first() else { continue };
        let first = first.trim();
        if first.is_empty() || first.eq_ignore_ascii_case("date") {
            continue;
        }
        let Some(rate_date) = parse_cell_date(first) else {
            continue;
        };
        for (idx, label) in columns.iter().enumerate().skip(1) {
            let Some(iso) = label_to_iso(label) else {
                continue;
            };
            let Some(cell) = row.get(idx) else { continue };
            if let Some(rate) = parse_cell_rate(cell) {
                observations.push(RateObservation::reference(
                    Source::Rbi,
                    rate_date,
                    iso,
                    rate,
                ));
            }
        }
    }

    if observations.is_empty() {
        return Err(WorkbookError::Structure(
            "workbook does not contain any forex data rows".into(),
        ));
    }
    Ok(observations)
}

fn label_to_iso(label: &str) -> Option<&'static str> {
    let label = label.trim().to_uppercase();
    LABEL_TO_ISO
        .iter()
        .find(|(published, iso)| label == *published || label == *iso)
        .map(|(_, iso)| *iso)
}

fn parse_cell_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn parse_cell_rate(value: &str) -> Option<f64> {
    let trimmed = value.trim().replace(',', "");
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ── HTML table path ────────────────────────────────────────────────────

/// Event-driven walk over `<tr>`/`<td>` markup. The archive's HTML is close
/// enough to XML for a lenient reader; mismatched end tags are tolerated.
fn extract_html_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;
    reader.config_mut().allow_unmatched_ends = true;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut cell: Option<String> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"tr" => current = Vec::new(),
                b"td" | b"th" => cell = Some(String::new()),
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(cell) = cell.as_mut() {
                    cell.push_str(t.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"td" | b"th" => {
                    if let Some(text) = cell.take() {
                        current.push(text.trim().to_string());
                    }
                }
                b"tr" => {
                    if !current.is_empty() {
                        rows.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Decode(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ── OOXML path ─────────────────────────────────────────────────────────

fn extract_xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| WorkbookError::Decode(e.to_string()))?;
    let shared = read_shared_strings(&mut archive)?;
    let sheet = first_worksheet_name(&archive)?;
    let xml = read_zip_entry(&mut archive, &sheet)?;
    parse_sheet_rows(&xml, &shared)
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| WorkbookError::Decode(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Decode(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(WorkbookError::Decode(format!(
            "ZIP entry {name} exceeds size limit"
        )));
    }
    Ok(out)
}

fn first_worksheet_name(
    archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<String, WorkbookError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
        .into_iter()
        .next()
        .ok_or_else(|| WorkbookError::Structure("workbook has no worksheets".into()))
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, WorkbookError> {
    // sharedStrings.xml is optional; all-numeric sheets omit it.
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut strings = Vec::new();
    let mut in_si = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(t)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(t.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Decode(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn parse_sheet_rows(
    xml: &[u8],
    shared: &[String],
) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut column: usize = 0;
    let mut is_shared = false;
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut buf = Vec::new();
    loop {
        if cell_count >= MAX_CELLS {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current = Vec::new();
                    column = 0;
                }
                b"c" => {
                    is_shared = false;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"t" => is_shared = attr.value.as_ref() == b"s",
                            b"r" => {
                                if let Some(idx) = column_index(&attr.value) {
                                    column = idx;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default();
                let value = if is_shared {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    raw.trim().to_string()
                };
                while current.len() < column {
                    current.push(String::new());
                }
                current.push(value);
                cell_count += 1;
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => column += 1,
                b"row" => {
                    if !current.is_empty() {
                        rows.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Decode(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// `"C7"` → column 2. Returns `None` for malformed references.
fn column_index(reference: &[u8]) -> Option<usize> {
    let letters: Vec<u8> = reference
        .iter()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for b in letters {
        index = index * 26 + (b - b'A' + 1) as usize;
    }
    Some(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML_WORKBOOK: &str = r#"
        <html><body><table>
            <tr><th>Date</th><th>USD</th><th>GBP</th><th>EURO</th><th>YEN</th></tr>
            <tr><td>14/11/2025</td><td>88.6836</td><td>116.6569</td><td>103.1342</td><td>0.5731</td></tr>
            <tr><td>17/11/2025</td><td>88.6477</td><td>116.7370</td><td>102.9350</td><td>0.5736</td></tr>
            <tr><td>Date</td><td>USD</td><td>GBP</td><td>EURO</td><td>YEN</td></tr>
            <tr><td>18/11/2025</td><td>88.7050</td><td></td><td>102.8000</td><td>0.5729</td></tr>
        </table></body></html>
    "#;

    #[test]
    fn html_workbook_parses_rows_and_maps_labels() {
        let observations = parse_reference_rates(HTML_WORKBOOK.as_bytes()).unwrap();
        // 2 full rows of 4 currencies + 1 row missing GBP.
        assert_eq!(observations.len(), 11);
        let first = &observations[0];
        assert_eq!(first.currency, "USD");
        assert_eq!(first.rate_date.to_string(), "2025-11-14");
        assert!((first.rate - 88.6836).abs() < 1e-9);
        assert!(observations.iter().any(|o| o.currency == "EUR"));
        assert!(observations.iter().any(|o| o.currency == "JPY"));
        assert!(observations.iter().all(|o| o.source == Source::Rbi));
    }

    #[test]
    fn header_echo_rows_are_skipped() {
        let observations = parse_reference_rates(HTML_WORKBOOK.as_bytes()).unwrap();
        let on_18th: Vec<_> = observations
            .iter()
            .filter(|o| o.rate_date.to_string() == "2025-11-18")
            .collect();
        assert_eq!(on_18th.len(), 3); // GBP cell was empty
    }

    #[test]
    fn alternate_date_formats_accepted() {
        let html = "<table><tr><td>Date</td><td>USD</td></tr>\
                    <tr><td>03-Jan-2025</td><td>85.5</td></tr></table>";
        let observations = parse_reference_rates(html.as_bytes()).unwrap();
        assert_eq!(observations[0].rate_date.to_string(), "2025-01-03");
    }

    #[test]
    fn empty_table_is_structure_error() {
        let err = parse_reference_rates(b"<html><body><p>nothing</p></body></html>").unwrap_err();
        assert!(matches!(err, WorkbookError::Structure(_)));
    }

    #[test]
    fn rows_without_parseable_dates_is_structure_error() {
        let html = "<table><tr><td>Date</td><td>USD</td></tr>\
                    <tr><td>not-a-date</td><td>85.5</td></tr></table>";
        let err = parse_reference_rates(html.as_bytes()).unwrap_err();
        assert!(matches!(err, WorkbookError::Structure(_)));
    }

    #[test]
    fn invalid_zip_is_decode_error() {
        let err = parse_reference_rates(b"PK\x03\x04 not really a zip").unwrap_err();
        assert!(matches!(err, WorkbookError::Decode(_)));
    }

    #[test]
    fn column_index_math() {
        assert_eq!(column_index(b"A1"), Some(0));
        assert_eq!(column_index(b"C7"), Some(2));
        assert_eq!(column_index(b"AA3"), Some(26));
        assert_eq!(column_index(b"12"), None);
    }
}
