//! Migration progress reporting.
//!
//! Long copies emit per-chunk progress so users can see how far a migration
//! has advanced and, after a crash, roughly where it will resume. Progress
//! is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single migration progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A chunk for `table` was committed on the target; `copied` is the
    /// cumulative row count for that table.
    Chunk { table: String, copied: u64 },
    /// All chunks for `table` finished.
    TableDone { table: String, total: u64 },
}

/// Reports migration progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "migrate forex_rates_rbi  1,234 rows copied".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Chunk { table, copied } => {
                format!("migrate {}  {} rows copied\n", table, format_number(*copied))
            }
            ProgressEvent::TableDone { table, total } => {
                format!("migrate {}  done ({} rows)\n", table, format_number(*total))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Chunk { table, copied } => serde_json::json!({
                "event": "progress",
                "table": table,
                "copied": copied,
            }),
            ProgressEvent::TableDone { table, total } => serde_json::json!({
                "event": "table_done",
                "table": table,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
