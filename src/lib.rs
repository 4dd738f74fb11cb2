pub mod aggregator;
pub mod api;
pub mod chunker;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod generation;
pub mod merger;
pub mod metrics;
pub mod prometheus_client;
pub mod query;
pub mod report;
pub mod settings;
pub mod status;
pub mod time_range;

pub use error::{PrometheusError, ReportError};
pub use report::{FetchOptions, GroupDowntimeReport, ReportService};
