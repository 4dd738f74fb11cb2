//! Public entry points of the downtime pipeline.
//!
//! range → chunks → per-chunk range queries → per-chunk extraction →
//! merge → aggregation.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregator::{aggregate, aggregate_by_target, group_uptime, AggregateResult, DowntimeFilter};
use crate::chunker::{chunk_range, Chunk, DayBoundary};
use crate::error::ReportError;
use crate::extractor::{extract_downtime, DowntimeInterval};
use crate::fetcher::{FetchConfig, ProgressFn, SeriesFetcher};
use crate::generation::QueryTicket;
use crate::merger::{merge_chunk_results, SortOrder};
use crate::metrics::{record_chunk_failure, record_intervals};
use crate::prometheus_client::PrometheusClient;
use crate::query::SeriesNames;
use crate::settings::Settings;
use crate::time_range::TimeRange;

/// Optional observers for a downtime query.
#[derive(Default, Clone)]
pub struct FetchOptions<'a> {
    pub progress: Option<ProgressFn<'a>>,
    /// When set, the query is abandoned once a newer generation starts.
    pub ticket: Option<QueryTicket>,
}

impl<'a> FetchOptions<'a> {
    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_ticket(mut self, ticket: QueryTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    fn report(&self, completed: usize, total: usize, message: &str) {
        if let Some(progress) = self.progress {
            progress(completed, total, message);
        }
    }

    fn ensure_current(&self) -> Result<(), ReportError> {
        match &self.ticket {
            Some(ticket) => ticket.ensure_current(),
            None => Ok(()),
        }
    }
}

/// A chunk that could not be fetched in a best-effort group query.
#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub target: String,
    pub chunk: Chunk,
    pub cause: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupDowntimeReport {
    /// Most recent first.
    pub intervals: Vec<DowntimeInterval>,
    pub failed_chunks: Vec<FailedChunk>,
}

impl GroupDowntimeReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub uptime_percent: f64,
    pub targets: Vec<AggregateResult>,
    pub failed_chunks: Vec<FailedChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct ReportService {
    client: PrometheusClient,
    fetcher: SeriesFetcher,
    names: SeriesNames,
    day_boundary: DayBoundary,
    operation_timeout: Option<Duration>,
}

impl ReportService {
    pub fn new(
        client: PrometheusClient,
        names: SeriesNames,
        fetch_config: FetchConfig,
        day_boundary: DayBoundary,
        operation_timeout: Option<Duration>,
    ) -> Self {
        let fetcher = SeriesFetcher::new(client.clone(), names.clone(), fetch_config);
        Self {
            client,
            fetcher,
            names,
            day_boundary,
            operation_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ReportError> {
        let client = PrometheusClient::new(&settings.prometheus_url, settings.request_timeout())?;
        let day_boundary = DayBoundary::parse(&settings.day_boundary)?;
        Ok(Self::new(
            client,
            settings.series_names(),
            settings.fetch_config(),
            day_boundary,
            settings.operation_timeout(),
        ))
    }

    pub fn client(&self) -> &PrometheusClient {
        &self.client
    }

    pub fn names(&self) -> &SeriesNames {
        &self.names
    }

    /// Chunks a query over `[start, end)` would be split into.
    pub fn plan(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Chunk>, ReportError> {
        match TimeRange::whole_minutes(start, end)? {
            Some(range) => chunk_range(range.start, range.end, &self.day_boundary),
            None => Ok(Vec::new()),
        }
    }

    /// Downtime of one target, oldest first.
    ///
    /// Any failed chunk fails the whole call: a gap in the samples would
    /// silently hide downtime.
    pub async fn downtime_periods(
        &self,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        options: FetchOptions<'_>,
    ) -> Result<Vec<DowntimeInterval>, ReportError> {
        self.with_timeout(self.single_downtime(target, start, end, &options))
            .await
    }

    async fn single_downtime(
        &self,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        options: &FetchOptions<'_>,
    ) -> Result<Vec<DowntimeInterval>, ReportError> {
        let Some(range) = TimeRange::whole_minutes(start, end)? else {
            debug!("Range {start} - {end} lies inside one minute, nothing to fetch for {target}");
            return Ok(Vec::new());
        };
        let chunks = chunk_range(range.start, range.end, &self.day_boundary)?;
        info!(
            "Fetching downtime for {target} from {} to {} in {} chunks",
            range.start,
            range.end,
            chunks.len()
        );

        let total = chunks.len();
        let mut per_chunk = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let samples = match self.fetcher.fetch_chunk(target, chunk).await {
                Ok(samples) => samples,
                Err(err) => {
                    record_chunk_failure("single");
                    error!("Failed to fetch chunk {}/{total} for {target}: {err}", index + 1);
                    return Err(err);
                }
            };

            let intervals = extract_downtime(target, samples, chunk.start, chunk.end);
            debug!(
                "Chunk {}/{total} for {target} found {} downtime periods",
                index + 1,
                intervals.len()
            );
            options.report(
                index + 1,
                total,
                &format!("Fetched chunk {}/{total}: {chunk}", index + 1),
            );
            options.ensure_current()?;
            per_chunk.push((index, intervals));
        }

        let merged = merge_chunk_results(per_chunk, SortOrder::Ascending);
        record_intervals("single", merged.len());
        options.report(
            total,
            total,
            &format!("Completed: found {} downtime periods", merged.len()),
        );
        Ok(merged)
    }

    /// Downtime of several targets, most recent first.
    ///
    /// A failed chunk only costs that target the chunk's data; it is listed
    /// in [`GroupDowntimeReport::failed_chunks`].
    pub async fn group_downtime_periods(
        &self,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        options: FetchOptions<'_>,
    ) -> Result<GroupDowntimeReport, ReportError> {
        self.with_timeout(self.group_downtime(targets, start, end, &options))
            .await
    }

    async fn group_downtime(
        &self,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        options: &FetchOptions<'_>,
    ) -> Result<GroupDowntimeReport, ReportError> {
        let Some(range) = TimeRange::whole_minutes(start, end)? else {
            debug!("Range {start} - {end} lies inside one minute, nothing to fetch");
            return Ok(GroupDowntimeReport::default());
        };
        let chunks = chunk_range(range.start, range.end, &self.day_boundary)?;
        info!(
            "Fetching group downtime for {} targets from {} to {} in {} chunks",
            targets.len(),
            range.start,
            range.end,
            chunks.len()
        );

        let mut buffers: Vec<Vec<(usize, Vec<DowntimeInterval>)>> = vec![Vec::new(); targets.len()];
        let mut failed_chunks = Vec::new();
        let mut pending = self.fetcher.spawn_all(targets, &chunks);

        while let Some(outcome) = pending.next().await {
            options.report(
                pending.completed(),
                pending.total(),
                &outcome.describe(chunks.len()),
            );
            if let Err(err) = options.ensure_current() {
                pending.abort();
                return Err(err);
            }

            let intervals = match outcome.samples {
                Ok(samples) => extract_downtime(
                    &outcome.target,
                    samples,
                    outcome.chunk.start,
                    outcome.chunk.end,
                ),
                Err(err) => {
                    record_chunk_failure("group");
                    warn!(
                        "Failed to fetch [{}] chunk {}/{}: {err}",
                        outcome.target,
                        outcome.chunk_index + 1,
                        chunks.len()
                    );
                    failed_chunks.push(FailedChunk {
                        target: outcome.target.clone(),
                        chunk: outcome.chunk,
                        cause: err.to_string(),
                    });
                    Vec::new()
                }
            };
            buffers[outcome.target_index].push((outcome.chunk_index, intervals));
        }
        options.ensure_current()?;

        let intervals = merge_chunk_results(
            buffers.into_iter().flatten().collect(),
            SortOrder::Descending,
        );
        failed_chunks.sort_by(|a: &FailedChunk, b: &FailedChunk| {
            (a.target.as_str(), a.chunk.start).cmp(&(b.target.as_str(), b.chunk.start))
        });
        record_intervals("group", intervals.len());

        let total = pending.total();
        options.report(
            total,
            total,
            &format!(
                "Completed: found {} group downtime periods",
                intervals.len()
            ),
        );
        Ok(GroupDowntimeReport {
            intervals,
            failed_chunks,
        })
    }

    /// Backend-computed uptime: `avg_over_time(success[range]) * 100` at the
    /// end of the range. 0 when the backend has no data.
    pub async fn uptime_percentage(
        &self,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, ReportError> {
        let range = TimeRange::whole_minutes(start, end)?.ok_or(ReportError::DegenerateRange)?;
        let query = self
            .names
            .uptime_over(target, range.duration().num_seconds());
        let data = self.client.query(&query, Some(range.end)).await?;
        Ok(data.first_value().unwrap_or(0.0).clamp(0.0, 100.0))
    }

    /// Uptime derived from the downtime intervals that pass `filter`.
    pub async fn summarize(
        &self,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &DowntimeFilter,
        options: FetchOptions<'_>,
    ) -> Result<AggregateResult, ReportError> {
        let range = TimeRange::whole_minutes(start, end)?.ok_or(ReportError::DegenerateRange)?;
        let intervals = self
            .downtime_periods(target, range.start, range.end, options)
            .await?;
        aggregate(target, filter.apply(&intervals), range.start, range.end)
    }

    pub async fn summarize_group(
        &self,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &DowntimeFilter,
        options: FetchOptions<'_>,
    ) -> Result<GroupSummary, ReportError> {
        let range = TimeRange::whole_minutes(start, end)?.ok_or(ReportError::DegenerateRange)?;
        let report = self
            .group_downtime_periods(targets, range.start, range.end, options)
            .await?;
        let per_target =
            aggregate_by_target(targets, &report.intervals, filter, range.start, range.end)?;
        let uptimes: Vec<Option<f64>> = per_target.iter().map(|r| Some(r.uptime_percent)).collect();

        Ok(GroupSummary {
            uptime_percent: group_uptime(&uptimes),
            targets: per_target,
            failed_chunks: report.failed_chunks,
        })
    }

    /// Group-wide uptime in percent over time, for charts.
    pub async fn uptime_series(
        &self,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<ChartPoint>, ReportError> {
        let series = self.names.success.clone();
        let mut points = self
            .chunked_average(&series, targets, start, end, progress)
            .await?;
        for point in &mut points {
            point.value *= 100.0;
        }
        Ok(points)
    }

    /// Group-wide probe duration in seconds over time, for charts.
    pub async fn response_time_series(
        &self,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<ChartPoint>, ReportError> {
        let series = self.names.duration.clone();
        self.chunked_average(&series, targets, start, end, progress)
            .await
    }

    async fn chunked_average(
        &self,
        series: &str,
        targets: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<ChartPoint>, ReportError> {
        let chunks = self.plan(start, end)?;
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.names.group_average(series, targets);
        let timeout = self.fetcher.config().chunk_timeout;
        let mut points = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            // At most ~1000 points per chunk, never finer than a minute.
            let step_secs = (chunk.duration().num_seconds() / 1000).max(60) as u64;
            match self
                .client
                .query_range(&query, chunk.start, chunk.end, Duration::from_secs(step_secs), timeout)
                .await
            {
                Ok(result) => {
                    let values = result.into_iter().next().map(|s| s.values).unwrap_or_default();
                    points.extend(values.into_iter().filter_map(|(ts, value)| {
                        let timestamp = DateTime::from_timestamp_millis((ts * 1000.0).round() as i64)?;
                        let value = value.parse::<f64>().ok()?;
                        Some(ChartPoint { timestamp, value })
                    }));
                }
                Err(err) => {
                    record_chunk_failure("chart");
                    warn!("Error fetching chart chunk {}/{}: {err}", index + 1, chunks.len());
                }
            }

            if let Some(progress) = progress {
                progress(
                    index + 1,
                    chunks.len(),
                    &format!("Fetched chart chunk {}/{}: {chunk}", index + 1, chunks.len()),
                );
            }
        }

        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn with_timeout<T, F>(&self, operation: F) -> Result<T, ReportError>
    where
        F: Future<Output = Result<T, ReportError>>,
    {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| ReportError::Timeout(limit))?,
            None => operation.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeDelta, TimeZone};

    fn service() -> ReportService {
        let client = PrometheusClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        ReportService::new(
            client,
            SeriesNames::default(),
            FetchConfig::default(),
            DayBoundary::Fixed(FixedOffset::east_opt(0).unwrap()),
            None,
        )
    }

    #[test]
    fn test_plan_normalizes_and_chunks() {
        let start = Utc.with_ymd_and_hms(2025, 6, 21, 9, 20, 59).unwrap();
        let end = start + TimeDelta::days(2);

        let chunks = service().plan(start, end).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, Utc.with_ymd_and_hms(2025, 6, 21, 9, 20, 0).unwrap());
        assert_eq!(chunks[2].end, Utc.with_ymd_and_hms(2025, 6, 23, 9, 20, 0).unwrap());
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_any_request() {
        let start = Utc.with_ymd_and_hms(2025, 6, 21, 9, 0, 0).unwrap();

        let result = service()
            .downtime_periods("a", start, start, FetchOptions::default())
            .await;

        assert!(matches!(result, Err(ReportError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_range_inside_one_minute_is_empty() {
        let start = Utc.with_ymd_and_hms(2025, 6, 21, 9, 0, 10).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 21, 9, 0, 50).unwrap();
        let service = service();

        // The backend is unreachable, so any request would fail the call.
        let intervals = service
            .downtime_periods("a", start, end, FetchOptions::default())
            .await
            .unwrap();
        assert!(intervals.is_empty());

        let targets = vec!["a".to_string(), "b".to_string()];
        let report = service
            .group_downtime_periods(&targets, start, end, FetchOptions::default())
            .await
            .unwrap();
        assert!(report.intervals.is_empty());
        assert!(report.is_complete());

        assert!(service.plan(start, end).unwrap().is_empty());
        assert!(matches!(
            service
                .summarize("a", start, end, &DowntimeFilter::default(), FetchOptions::default())
                .await,
            Err(ReportError::DegenerateRange)
        ));
    }

    #[tokio::test]
    async fn test_empty_group_yields_empty_report() {
        let start = Utc.with_ymd_and_hms(2025, 6, 21, 9, 0, 0).unwrap();
        let report = service()
            .group_downtime_periods(&[], start, start + TimeDelta::hours(1), FetchOptions::default())
            .await
            .unwrap();

        assert!(report.intervals.is_empty());
        assert!(report.is_complete());
    }
}
