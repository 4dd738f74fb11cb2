//! Conversion of up/down probe samples into downtime intervals.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One `probe_success` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub up: bool,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, up: bool) -> Self {
        Sample { timestamp, up }
    }

    /// Builds a sample from a Prometheus matrix pair `[unix_seconds, "value"]`.
    ///
    /// Down means the value is numerically zero, so `"0"`, `"0.0"` and `"-0"`
    /// are all down. Anything else is up, including `NaN` and text that does
    /// not parse.
    pub fn from_prometheus(unix_seconds: f64, value: &str) -> Option<Sample> {
        let timestamp = DateTime::from_timestamp_millis((unix_seconds * 1000.0).round() as i64)?;
        let down = value.trim().parse::<f64>().map(|v| v == 0.0).unwrap_or(false);
        Some(Sample {
            timestamp,
            up: !down,
        })
    }
}

/// A maximal span during which a target was observed down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowntimeInterval {
    pub target: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
}

impl DowntimeInterval {
    /// Returns `None` unless `start < end`.
    pub fn new(target: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<DowntimeInterval> {
        if end <= start {
            return None;
        }
        let duration_minutes = (end - start).num_milliseconds() as f64 / 60_000.0;
        Some(DowntimeInterval {
            target: target.to_string(),
            start,
            end,
            duration_minutes,
        })
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }

    pub fn key(&self) -> IntervalKey {
        IntervalKey {
            target: self.target.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Identity of an interval for deduplication and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntervalKey {
    pub target: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Derives downtime intervals for one target over one chunk.
///
/// A downtime still open after the last sample is closed at `range_end`,
/// not at the last sample's timestamp.
pub fn extract_downtime(
    target: &str,
    mut samples: Vec<Sample>,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Vec<DowntimeInterval> {
    let mut intervals = Vec::new();
    if samples.is_empty() {
        return intervals;
    }

    samples.sort_by_key(|sample| sample.timestamp);

    let mut current_downtime_start: Option<DateTime<Utc>> = None;
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    for sample in &samples {
        if last_timestamp == Some(sample.timestamp) {
            continue;
        }
        last_timestamp = Some(sample.timestamp);

        match (sample.up, current_downtime_start) {
            (false, None) => current_downtime_start = Some(sample.timestamp),
            (true, Some(down_since)) => {
                intervals.extend(DowntimeInterval::new(target, down_since, sample.timestamp));
                current_downtime_start = None;
            }
            _ => {}
        }
    }

    if let Some(down_since) = current_downtime_start {
        intervals.extend(DowntimeInterval::new(target, down_since, range_end));
    }

    log::trace!(
        "{target}: {} samples in [{range_start}, {range_end}) produced {} intervals",
        samples.len(),
        intervals.len()
    );
    intervals
}
