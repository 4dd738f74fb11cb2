//! Day-aligned chunking of query ranges.
//!
//! Long range queries are split so that each request covers at most one
//! calendar day of the configured day boundary. Ranges of 24 hours or less
//! are sent as a single chunk.

use std::fmt;

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use serde::Serialize;

use crate::error::ReportError;

/// Half-open `[start, end)` slice of a query range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Chunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Chunk {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }
}

/// Which calendar the chunk boundaries follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBoundary {
    /// The host's local time zone, DST included.
    Local,
    Fixed(FixedOffset),
}

impl Default for DayBoundary {
    fn default() -> Self {
        DayBoundary::Local
    }
}

impl DayBoundary {
    /// Accepts `local`, `utc`, or an offset such as `+05:30`.
    pub fn parse(value: &str) -> Result<DayBoundary, ReportError> {
        match value.trim() {
            "" | "local" => Ok(DayBoundary::Local),
            "utc" | "UTC" | "Z" => Ok(DayBoundary::Fixed(FixedOffset::east_opt(0).ok_or_else(
                || ReportError::Config("invalid UTC offset".to_string()),
            )?)),
            other => other
                .parse::<FixedOffset>()
                .map(DayBoundary::Fixed)
                .map_err(|e| ReportError::Config(format!("invalid day boundary {other:?}: {e}"))),
        }
    }

    /// First day start strictly after `instant`.
    pub fn next_day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DayBoundary::Local => next_day_start_in(&chrono::Local, instant),
            DayBoundary::Fixed(offset) => next_day_start_in(offset, instant),
        }
    }
}

fn next_day_start_in<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = instant + TimeDelta::days(1);
    let Some(next_date) = instant.with_timezone(tz).date_naive().succ_opt() else {
        return fallback;
    };
    let Some(mut candidate) = next_date.and_hms_opt(0, 0, 0) else {
        return fallback;
    };

    // Midnight may not exist when a DST transition happens at 00:00.
    for _ in 0..48 {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += TimeDelta::minutes(30);
    }
    fallback
}

/// Splits `[start, end)` into contiguous chunks aligned to day starts.
pub fn chunk_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    boundary: &DayBoundary,
) -> Result<Vec<Chunk>, ReportError> {
    if end <= start {
        return Err(ReportError::invalid_range(start, end));
    }

    if end - start <= TimeDelta::days(1) {
        return Ok(vec![Chunk { start, end }]);
    }

    let mut chunks = Vec::new();
    let mut current = start;
    while current < end {
        let chunk_end = boundary.next_day_start(current).min(end);
        chunks.push(Chunk {
            start: current,
            end: chunk_end,
        });
        current = chunk_end;
    }

    Ok(chunks)
}
