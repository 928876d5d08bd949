//! Closed date ranges and window splitting for batch planning.
//!
//! The archive source is fetched in calendar-month windows to keep each
//! download small enough that the upstream form endpoint serves it reliably.

use chrono::{Datelike, Days, NaiveDate};

use crate::error::{IngestError, Result};

/// A closed `[start, end]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(IngestError::InvalidWindow);
        }
        Ok(Self { start, end })
    }

    /// A single-day window.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Parse a `YYYY-MM-DD` argument.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| IngestError::Validation(format!("invalid date '{value}', expected YYYY-MM-DD")))
}

/// Split the inclusive window into ranges aligned on calendar months.
pub fn month_ranges(window: DateRange) -> Vec<DateRange> {
    let mut ranges = Vec::new();
    let mut current = window.start;
    while current <= window.end {
        let month_end = end_of_month(current);
        let chunk_end = month_end.min(window.end);
        ranges.push(DateRange {
            start: current,
            end: chunk_end,
        });
        current = chunk_end + Days::new(1);
    }
    ranges
}

/// Split the window into fixed-length chunks of `window_days` days.
pub fn split_ranges(window: DateRange, window_days: u64) -> Result<Vec<DateRange>> {
    if window_days == 0 {
        return Err(IngestError::Validation("window_days must be positive".into()));
    }
    let mut ranges = Vec::new();
    let mut current = window.start;
    while current <= window.end {
        let chunk_end = (current + Days::new(window_days - 1)).min(window.end);
        ranges.push(DateRange {
            start: current,
            end: chunk_end,
        });
        current = chunk_end + Days::new(1);
    }
    Ok(ranges)
}

fn end_of_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap() - Days::new(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(DateRange::new(d(2025, 2, 1), d(2025, 1, 1)).is_err());
    }

    #[test]
    fn month_ranges_align_on_calendar_months() {
        let window = DateRange::new(d(2025, 1, 15), d(2025, 3, 10)).unwrap();
        let ranges = month_ranges(window);
        assert_eq!(
            ranges,
            vec![
                DateRange::new(d(2025, 1, 15), d(2025, 1, 31)).unwrap(),
                DateRange::new(d(2025, 2, 1), d(2025, 2, 28)).unwrap(),
                DateRange::new(d(2025, 3, 1), d(2025, 3, 10)).unwrap(),
            ]
        );
    }

    #[test]
    fn month_ranges_single_day() {
        let window = DateRange::day(d(2025, 6, 3));
        assert_eq!(month_ranges(window), vec![window]);
    }

    #[test]
    fn month_ranges_cross_year_boundary() {
        let window = DateRange::new(d(2024, 12, 20), d(2025, 1, 5)).unwrap();
        let ranges = month_ranges(window);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].end, d(2024, 12, 31));
        assert_eq!(ranges[1].start, d(2025, 1, 1));
    }

    #[test]
    fn split_ranges_fixed_width() {
        let window = DateRange::new(d(2025, 1, 1), d(2025, 1, 10)).unwrap();
        let ranges = split_ranges(window, 4).unwrap();
        assert_eq!(
            ranges,
            vec![
                DateRange::new(d(2025, 1, 1), d(2025, 1, 4)).unwrap(),
                DateRange::new(d(2025, 1, 5), d(2025, 1, 8)).unwrap(),
                DateRange::new(d(2025, 1, 9), d(2025, 1, 10)).unwrap(),
            ]
        );
    }

    #[test]
    fn split_ranges_rejects_zero_width() {
        let window = DateRange::day(d(2025, 1, 1));
        assert!(split_ranges(window, 0).is_err());
    }
}
