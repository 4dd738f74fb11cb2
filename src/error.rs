//! Error types for the report pipeline and the Prometheus client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::chunker::Chunk;

/// Failures talking to the Prometheus HTTP API.
#[derive(Error, Debug)]
pub enum PrometheusError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("query failed ({error_type}): {error}")]
    Api { error_type: String, error: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Errors surfaced by [`crate::report::ReportService`] and its stages.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid time range: end {end} is not after start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("failed to fetch {target} for chunk {chunk}: {source}")]
    ChunkFetch {
        target: String,
        chunk: Chunk,
        #[source]
        source: PrometheusError,
    },
    #[error("prometheus backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("cannot aggregate over a zero-length range")]
    DegenerateRange,
    #[error("query generation {generation} superseded by generation {current}")]
    Superseded { generation: u64, current: u64 },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Prometheus(#[from] PrometheusError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ReportError {
    pub fn invalid_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        ReportError::InvalidRange { start, end }
    }
}
