//! Uptime summaries derived from downtime intervals.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::ReportError;
use crate::extractor::{DowntimeInterval, IntervalKey};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub target: String,
    pub uptime_percent: f64,
    #[serde(skip)]
    pub downtime_total: TimeDelta,
    pub downtime_minutes: f64,
    pub event_count: usize,
}

/// Which annotated intervals count towards a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    Planned,
    Unplanned,
}

impl KindFilter {
    pub fn parse(value: &str) -> Option<KindFilter> {
        match value {
            "all" => Some(KindFilter::All),
            "planned" => Some(KindFilter::Planned),
            "unplanned" => Some(KindFilter::Unplanned),
            _ => None,
        }
    }
}

/// Filter applied to intervals before aggregation.
#[derive(Debug, Clone, Default)]
pub struct DowntimeFilter {
    /// Intervals not longer than this are ignored.
    pub min_duration: Option<TimeDelta>,
    pub kind: KindFilter,
    /// Intervals annotated as planned maintenance.
    pub planned: HashSet<IntervalKey>,
}

impl DowntimeFilter {
    /// The dashboard's "exclude short downtimes" toggle.
    pub fn excluding_short() -> Self {
        DowntimeFilter {
            min_duration: Some(TimeDelta::minutes(2)),
            ..Default::default()
        }
    }

    pub fn matches(&self, interval: &DowntimeInterval) -> bool {
        let long_enough = self
            .min_duration
            .map_or(true, |threshold| interval.duration() > threshold);
        let planned = self.planned.contains(&interval.key());
        let kind_matches = match self.kind {
            KindFilter::All => true,
            KindFilter::Planned => planned,
            KindFilter::Unplanned => !planned,
        };
        long_enough && kind_matches
    }

    pub fn apply<'a>(&self, intervals: &'a [DowntimeInterval]) -> Vec<&'a DowntimeInterval> {
        intervals.iter().filter(|i| self.matches(i)).collect()
    }
}

/// `uptime = 100 * (D - downtime) / D`, clamped to `[0, 100]`.
///
/// A zero-length range is rejected rather than reported as 100%.
pub fn aggregate<'a, I>(
    target: &str,
    intervals: I,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Result<AggregateResult, ReportError>
where
    I: IntoIterator<Item = &'a DowntimeInterval>,
{
    let range = range_end - range_start;
    if range <= TimeDelta::zero() {
        return Err(ReportError::DegenerateRange);
    }

    let (downtime_total, event_count) = intervals
        .into_iter()
        .fold((TimeDelta::zero(), 0usize), |(total, count), interval| {
            (total + interval.duration(), count + 1)
        });

    let range_ms = range.num_milliseconds() as f64;
    let down_ms = downtime_total.num_milliseconds() as f64;
    let uptime_percent = (100.0 * (range_ms - down_ms) / range_ms).clamp(0.0, 100.0);

    Ok(AggregateResult {
        target: target.to_string(),
        uptime_percent,
        downtime_total,
        downtime_minutes: down_ms / 60_000.0,
        event_count,
    })
}

/// One summary per requested target from a group's interval list.
pub fn aggregate_by_target(
    targets: &[String],
    intervals: &[DowntimeInterval],
    filter: &DowntimeFilter,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Result<Vec<AggregateResult>, ReportError> {
    targets
        .iter()
        .map(|target| {
            let own = intervals
                .iter()
                .filter(|i| i.target == *target && filter.matches(i));
            aggregate(target, own, range_start, range_end)
        })
        .collect()
}

/// Mean of the known per-target uptimes; 0 when none are known.
pub fn group_uptime(uptimes: &[Option<f64>]) -> f64 {
    let known: Vec<f64> = uptimes.iter().flatten().copied().collect();
    if known.is_empty() {
        return 0.0;
    }
    known.iter().sum::<f64>() / known.len() as f64
}
