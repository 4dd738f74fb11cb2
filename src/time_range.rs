//! Query time ranges and the dashboard's range presets.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<TimeRange, ReportError> {
        if end <= start {
            return Err(ReportError::invalid_range(start, end));
        }
        Ok(TimeRange { start, end })
    }

    /// Truncates both ends to whole minutes so repeated queries over the
    /// "same" range hit identical step alignment.
    pub fn normalized(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<TimeRange, ReportError> {
        TimeRange::whole_minutes(start, end)?.ok_or_else(|| ReportError::invalid_range(start, end))
    }

    /// Like [`TimeRange::normalized`], but a valid range that lies inside a
    /// single minute yields `None` instead of an error.
    pub fn whole_minutes(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<TimeRange>, ReportError> {
        if end <= start {
            return Err(ReportError::invalid_range(start, end));
        }
        let minute = TimeDelta::minutes(1);
        let start_trunc = start
            .duration_trunc(minute)
            .map_err(|_| ReportError::invalid_range(start, end))?;
        let end_trunc = end
            .duration_trunc(minute)
            .map_err(|_| ReportError::invalid_range(start, end))?;
        if end_trunc <= start_trunc {
            return Ok(None);
        }
        Ok(Some(TimeRange {
            start: start_trunc,
            end: end_trunc,
        }))
    }

    /// The `length` ending at `now`.
    pub fn last(length: TimeDelta, now: DateTime<Utc>) -> Result<TimeRange, ReportError> {
        TimeRange::new(now - length, now)
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Range presets offered by the dashboard's time picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePreset {
    OneHour,
    SixHours,
    TwelveHours,
    TwoDays,
    SevenDays,
    FourWeeks,
    ThreeMonths,
}

impl RangePreset {
    pub fn all() -> &'static [RangePreset] {
        &[
            RangePreset::OneHour,
            RangePreset::SixHours,
            RangePreset::TwelveHours,
            RangePreset::TwoDays,
            RangePreset::SevenDays,
            RangePreset::FourWeeks,
            RangePreset::ThreeMonths,
        ]
    }

    pub fn parse(value: &str) -> Option<RangePreset> {
        RangePreset::all()
            .iter()
            .copied()
            .find(|preset| preset.value() == value)
    }

    pub fn value(&self) -> &'static str {
        match self {
            RangePreset::OneHour => "1h",
            RangePreset::SixHours => "6h",
            RangePreset::TwelveHours => "12h",
            RangePreset::TwoDays => "2d",
            RangePreset::SevenDays => "7d",
            RangePreset::FourWeeks => "4w",
            RangePreset::ThreeMonths => "3m",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RangePreset::OneHour => "Last 1 Hour",
            RangePreset::SixHours => "Last 6 Hours",
            RangePreset::TwelveHours => "Last 12 Hours",
            RangePreset::TwoDays => "Last 2 Days",
            RangePreset::SevenDays => "Last 7 Days",
            RangePreset::FourWeeks => "Last 4 Weeks",
            RangePreset::ThreeMonths => "Last 3 Months",
        }
    }

    pub fn hours(&self) -> i64 {
        match self {
            RangePreset::OneHour => 1,
            RangePreset::SixHours => 6,
            RangePreset::TwelveHours => 12,
            RangePreset::TwoDays => 48,
            RangePreset::SevenDays => 168,
            RangePreset::FourWeeks => 672,
            RangePreset::ThreeMonths => 2160,
        }
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeRange, ReportError> {
        TimeRange::last(TimeDelta::hours(self.hours()), now)
    }
}
