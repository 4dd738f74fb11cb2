use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::PrometheusError;
use crate::metrics::record_backend_request;

/// Envelope of every Prometheus HTTP API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryData {
    Vector(Vec<InstantSeries>),
    Matrix(Vec<RangeSeries>),
    Scalar((f64, String)),
    #[serde(rename = "string")]
    Text((f64, String)),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstantSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: (f64, String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigStatus {
    pub yaml: String,
}

impl QueryData {
    /// Value of the first series (or the scalar), parsed as a float.
    pub fn first_value(&self) -> Option<f64> {
        match self {
            QueryData::Vector(series) => series.first().and_then(|s| s.value.1.parse().ok()),
            QueryData::Scalar((_, value)) => value.parse().ok(),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Vec<InstantSeries> {
        match self {
            QueryData::Vector(series) => series,
            _ => Vec::new(),
        }
    }

    pub fn into_matrix(self) -> Vec<RangeSeries> {
        match self {
            QueryData::Matrix(series) => series,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    pub url: String,
    client: Client,
    timeout: Duration,
}

impl PrometheusClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PrometheusError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    /// Instant query, evaluated at `time` or at the server's "now".
    pub async fn query(
        &self,
        query: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<QueryData, PrometheusError> {
        let mut params = vec![("query", query.to_string())];
        if let Some(time) = time {
            params.push(("time", time.timestamp().to_string()));
        }
        self.get("/api/v1/query", &params, self.timeout).await
    }

    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        timeout: Duration,
    ) -> Result<Vec<RangeSeries>, PrometheusError> {
        let params = vec![
            ("query", query.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", step.as_secs().max(1).to_string()),
        ];
        let data: QueryData = self.get("/api/v1/query_range", &params, timeout).await?;
        Ok(data.into_matrix())
    }

    /// Label sets of every series matching `matcher` in `[start, end]`.
    pub async fn series(
        &self,
        matcher: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HashMap<String, String>>, PrometheusError> {
        let params = vec![
            ("match[]", matcher.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ];
        self.get("/api/v1/series", &params, self.timeout).await
    }

    pub async fn status_config(&self) -> Result<ConfigStatus, PrometheusError> {
        self.get("/api/v1/status/config", &[], self.timeout).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, PrometheusError> {
        let start_time = Instant::now();
        info!("Query: {path} {params:?}");

        let url = format!("{}{}", self.url, path);
        let result = self.send(&url, params, timeout).await;

        record_backend_request(path, result.is_ok(), start_time.elapsed());
        info!(
            "Request to {path} took {} milliseconds",
            start_time.elapsed().as_millis()
        );
        if let Err(err) = &result {
            warn!("Request to {path} failed: {err}");
        }
        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, PrometheusError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        debug!("Response ({status}): {} bytes", body.len());

        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(PrometheusError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                })
            }
            Err(e) => return Err(PrometheusError::Decode(e.to_string())),
        };

        match (parsed.status.as_str(), parsed.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(PrometheusError::Api {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
                error: parsed
                    .error
                    .unwrap_or_else(|| format!("status {}", status.as_u16())),
            }),
        }
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> PrometheusError {
    if error.is_timeout() {
        PrometheusError::Timeout(timeout)
    } else {
        PrometheusError::Http(error)
    }
}
