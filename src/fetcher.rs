//! Range queries for `probe_success` per (target, chunk).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunker::Chunk;
use crate::error::ReportError;
use crate::extractor::Sample;
use crate::prometheus_client::{PrometheusClient, RangeSeries};
use crate::query::SeriesNames;

/// Progress observer: `(completed, total, message)`.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub step: Duration,
    /// Per-request timeout for chunk queries, longer than the client default.
    pub chunk_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            step: Duration::from_secs(60),
            chunk_timeout: Duration::from_secs(60),
            max_concurrent_requests: 8,
        }
    }
}

/// Result of one (target, chunk) query.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub target_index: usize,
    pub chunk_index: usize,
    pub target: String,
    pub chunk: Chunk,
    pub samples: Result<Vec<Sample>, ReportError>,
}

impl ChunkOutcome {
    pub fn describe(&self, chunk_count: usize) -> String {
        let local_start = self.chunk.start.with_timezone(&chrono::Local);
        let local_end = self.chunk.end.with_timezone(&chrono::Local);
        format!(
            "{} [{}] chunk {}/{}: {} - {}",
            if self.samples.is_ok() { "Fetched" } else { "Failed" },
            self.target,
            self.chunk_index + 1,
            chunk_count,
            local_start.format("%Y-%m-%d %H:%M"),
            local_end.format("%H:%M")
        )
    }
}

/// Queries that are still running. Dropping it aborts them.
pub struct PendingChunks {
    join_set: JoinSet<ChunkOutcome>,
    total: usize,
    completed: usize,
}

impl PendingChunks {
    /// Next finished query, in completion order.
    pub async fn next(&mut self) -> Option<ChunkOutcome> {
        while let Some(joined) = self.join_set.join_next().await {
            self.completed += 1;
            match joined {
                Ok(outcome) => return Some(outcome),
                Err(err) => tracing::error!("chunk query task failed: {err}"),
            }
        }
        None
    }

    pub fn abort(&mut self) {
        self.join_set.abort_all();
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }
}

#[derive(Debug, Clone)]
pub struct SeriesFetcher {
    client: PrometheusClient,
    names: SeriesNames,
    config: FetchConfig,
}

impl SeriesFetcher {
    pub fn new(client: PrometheusClient, names: SeriesNames, config: FetchConfig) -> Self {
        Self {
            client,
            names,
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// One range query for `target` over `chunk`.
    pub async fn fetch_chunk(&self, target: &str, chunk: &Chunk) -> Result<Vec<Sample>, ReportError> {
        let query = self.names.success_selector(target);
        let series = self
            .client
            .query_range(
                &query,
                chunk.start,
                chunk.end,
                self.config.step,
                self.config.chunk_timeout,
            )
            .await
            .map_err(|source| ReportError::ChunkFetch {
                target: target.to_string(),
                chunk: *chunk,
                source,
            })?;
        Ok(samples_from_series(series))
    }

    /// Starts every (target, chunk) query at once, bounded by
    /// `max_concurrent_requests` in flight.
    pub fn spawn_all(&self, targets: &[String], chunks: &[Chunk]) -> PendingChunks {
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let mut join_set = JoinSet::new();

        for (target_index, target) in targets.iter().enumerate() {
            for (chunk_index, chunk) in chunks.iter().enumerate() {
                let fetcher = self.clone();
                let limiter = Arc::clone(&limiter);
                let target = target.clone();
                let chunk = *chunk;

                join_set.spawn(async move {
                    let samples = match limiter.acquire_owned().await {
                        Ok(_permit) => fetcher.fetch_chunk(&target, &chunk).await,
                        Err(_) => Err(ReportError::BackendUnavailable(
                            "request limiter closed".to_string(),
                        )),
                    };
                    ChunkOutcome {
                        target_index,
                        chunk_index,
                        target,
                        chunk,
                        samples,
                    }
                });
            }
        }

        PendingChunks {
            join_set,
            total: targets.len() * chunks.len(),
            completed: 0,
        }
    }

    /// Runs every (target, chunk) query and collects the outcomes in
    /// completion order. Failures stay in their own outcome.
    pub async fn fetch_all(
        &self,
        targets: &[String],
        chunks: &[Chunk],
        progress: Option<ProgressFn<'_>>,
    ) -> Vec<ChunkOutcome> {
        let mut pending = self.spawn_all(targets, chunks);
        let mut outcomes = Vec::with_capacity(pending.total());
        while let Some(outcome) = pending.next().await {
            if let Some(progress) = progress {
                progress(
                    pending.completed(),
                    pending.total(),
                    &outcome.describe(chunks.len()),
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Samples for each target over one chunk, queried concurrently.
    pub async fn fetch(
        &self,
        targets: &[String],
        chunk: &Chunk,
    ) -> BTreeMap<String, Result<Vec<Sample>, ReportError>> {
        self.fetch_all(targets, std::slice::from_ref(chunk), None)
            .await
            .into_iter()
            .map(|outcome| (outcome.target, outcome.samples))
            .collect()
    }
}

/// Samples of the first returned series; an exact instance matcher yields
/// at most one series per job.
fn samples_from_series(series: Vec<RangeSeries>) -> Vec<Sample> {
    series
        .into_iter()
        .next()
        .map(|s| {
            s.values
                .iter()
                .filter_map(|(ts, value)| Sample::from_prometheus(*ts, value))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;
    use std::sync::Mutex;

    fn fetcher(url: &str) -> SeriesFetcher {
        let client = PrometheusClient::new(url, Duration::from_secs(5)).unwrap();
        SeriesFetcher::new(client, SeriesNames::default(), FetchConfig::default())
    }

    fn chunk() -> Chunk {
        Chunk {
            start: Utc.with_ymd_and_hms(2025, 6, 21, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 21, 1, 0, 0).unwrap(),
        }
    }

    fn matrix_body(values: &str) -> String {
        format!(
            r#"{{"status":"success","data":{{"resultType":"matrix","result":[{{"metric":{{}},"values":{values}}}]}}}}"#
        )
    }

    #[tokio::test]
    async fn test_fetch_chunk_returns_samples() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"probe_success{instance="a"}"#.into(),
            ))
            .with_status(200)
            .with_body(matrix_body(r#"[[1750464000,"1"],[1750464060,"0"]]"#))
            .create_async()
            .await;

        let samples = fetcher(&server.url()).fetch_chunk("a", &chunk()).await.unwrap();

        assert_eq!(samples.len(), 2);
        assert!(samples[0].up);
        assert!(!samples[1].up);
    }

    #[tokio::test]
    async fn test_empty_result_means_no_samples() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#)
            .create_async()
            .await;

        let samples = fetcher(&server.url()).fetch_chunk("a", &chunk()).await.unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_target() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"probe_success{instance="a"}"#.into(),
            ))
            .with_status(200)
            .with_body(matrix_body(r#"[[1750464000,"0"]]"#))
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                r#"probe_success{instance="b"}"#.into(),
            ))
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let targets = vec!["a".to_string(), "b".to_string()];
        let results = fetcher(&server.url()).fetch(&targets, &chunk()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["a"].as_ref().unwrap().len(), 1);
        match &results["b"] {
            Err(ReportError::ChunkFetch { target, chunk: failed, .. }) => {
                assert_eq!(target, "b");
                assert_eq!(*failed, chunk());
            }
            other => panic!("expected chunk fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_progress_reports_every_completion() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#)
            .expect(6)
            .create_async()
            .await;

        let first = chunk();
        let second = Chunk {
            start: first.end,
            end: first.end + chrono::TimeDelta::hours(1),
        };
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let seen = Mutex::new(Vec::new());
        let progress = |completed: usize, total: usize, _message: &str| {
            seen.lock().unwrap().push((completed, total));
        };

        let outcomes = fetcher(&server.url())
            .fetch_all(&targets, &[first, second], Some(&progress))
            .await;

        assert_eq!(outcomes.len(), 6);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&(6, 6)));
        assert!(seen.iter().all(|(_, total)| *total == 6));
    }
}
