use chrono::{DateTime, TimeDelta, Utc};
use log::{error, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::ReportError;
use crate::prometheus_client::PrometheusClient;
use crate::query::SeriesNames;
use crate::time_range::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Up,
    Down,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: String,
    pub state: TargetState,
    pub last_check: Option<DateTime<Utc>>,
    pub response_time_seconds: Option<f64>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

/// All targets reporting the success series.
///
/// Asks the series endpoint for the last 24 hours first and falls back to an
/// instant query, which only sees targets with a current sample.
pub async fn discover_targets(
    prometheus: &PrometheusClient,
    names: &SeriesNames,
) -> Result<Vec<String>, ReportError> {
    let now = Utc::now();
    let series_error = match prometheus
        .series(&names.success, now - TimeDelta::hours(24), now)
        .await
    {
        Ok(label_sets) => {
            return Ok(collect_instances(
                label_sets.iter().map(|labels| labels.get(&names.instance_label)),
            ))
        }
        Err(err) => err,
    };
    warn!("Series endpoint failed, trying query endpoint as fallback: {series_error}");

    match prometheus.query(&names.success, None).await {
        Ok(data) => {
            let series = data.into_vector();
            Ok(collect_instances(
                series.iter().map(|s| s.metric.get(&names.instance_label)),
            ))
        }
        Err(err) => {
            error!("Both series and query endpoints failed: {err}");
            Err(ReportError::BackendUnavailable(format!(
                "unable to list targets (series endpoint: {series_error}; query endpoint: {err})"
            )))
        }
    }
}

fn collect_instances<'a, I>(instances: I) -> Vec<String>
where
    I: Iterator<Item = Option<&'a String>>,
{
    instances
        .flatten()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Latest success value of every target.
pub async fn current_status(
    prometheus: &PrometheusClient,
    names: &SeriesNames,
) -> Result<Vec<TargetStatus>, ReportError> {
    let data = prometheus.query(&names.success, None).await?;

    let mut statuses: Vec<TargetStatus> = data
        .into_vector()
        .into_iter()
        .filter_map(|series| {
            let target = series.metric.get(&names.instance_label)?.clone();
            Some(TargetStatus {
                target,
                state: state_from_value(&series.value.1),
                last_check: timestamp(series.value.0),
                response_time_seconds: None,
                labels: series.metric,
            })
        })
        .collect();
    statuses.sort_by(|a, b| a.target.cmp(&b.target));
    Ok(statuses)
}

/// Latest status and probe duration of one target.
pub async fn target_status(
    prometheus: &PrometheusClient,
    names: &SeriesNames,
    target: &str,
) -> Result<TargetStatus, ReportError> {
    let now = Utc::now();
    let data = prometheus
        .query(&names.success_selector(target), Some(now))
        .await?;

    let Some(series) = data.into_vector().into_iter().next() else {
        return Ok(TargetStatus {
            target: target.to_string(),
            state: TargetState::Unknown,
            last_check: None,
            response_time_seconds: None,
            labels: HashMap::new(),
        });
    };

    let response_time_seconds = prometheus
        .query(&names.duration_selector(target), Some(now))
        .await?
        .first_value();

    Ok(TargetStatus {
        target: target.to_string(),
        state: state_from_value(&series.value.1),
        last_check: timestamp(series.value.0),
        response_time_seconds,
        labels: series.metric,
    })
}

/// Average, maximum and minimum probe duration at the end of the range.
pub async fn response_time_stats(
    prometheus: &PrometheusClient,
    names: &SeriesNames,
    target: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<ResponseTimeStats, ReportError> {
    let range = TimeRange::whole_minutes(start, end)?.ok_or(ReportError::DegenerateRange)?;
    let mut values = [0.0; 3];
    for (slot, function) in values.iter_mut().zip(["avg", "max", "min"]) {
        let data = prometheus
            .query(&names.duration_stat(function, target), Some(range.end))
            .await?;
        *slot = data.first_value().unwrap_or(0.0);
    }

    Ok(ResponseTimeStats {
        average: values[0],
        maximum: values[1],
        minimum: values[2],
    })
}

/// Fetches the backend configuration to prove it is reachable.
pub async fn test_connection(prometheus: &PrometheusClient) -> Result<String, ReportError> {
    prometheus
        .status_config()
        .await
        .map(|status| status.yaml)
        .map_err(|e| ReportError::BackendUnavailable(format!("failed to connect to Prometheus: {e}")))
}

fn state_from_value(value: &str) -> TargetState {
    match value.parse::<f64>() {
        Ok(v) if v == 1.0 => TargetState::Up,
        Ok(_) => TargetState::Down,
        Err(_) => TargetState::Unknown,
    }
}

fn timestamp(unix_seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis((unix_seconds * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(url: &str) -> PrometheusClient {
        PrometheusClient::new(url, Duration::from_secs(5)).unwrap()
    }

    const VECTOR_BODY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[
        {"metric":{"__name__":"probe_success","instance":"https://b.example.com","job":"blackbox"},"value":[1750467600,"0"]},
        {"metric":{"__name__":"probe_success","instance":"https://a.example.com","job":"blackbox"},"value":[1750467600,"1"]}
    ]}}"#;

    #[tokio::test]
    async fn test_discover_targets_from_series_endpoint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/series")
            .match_query(Matcher::UrlEncoded("match[]".into(), "probe_success".into()))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":[
                    {"__name__":"probe_success","instance":"https://b.example.com"},
                    {"__name__":"probe_success","instance":"https://a.example.com"},
                    {"__name__":"probe_success","instance":"https://a.example.com","job":"other"},
                    {"__name__":"probe_success"}
                ]}"#,
            )
            .create_async()
            .await;

        let targets = discover_targets(&client(&server.url()), &SeriesNames::default())
            .await
            .unwrap();

        assert_eq!(targets, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[tokio::test]
    async fn test_discover_targets_falls_back_to_query() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/series")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;
        let fallback = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), "probe_success".into()))
            .with_status(200)
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let targets = discover_targets(&client(&server.url()), &SeriesNames::default())
            .await
            .unwrap();

        fallback.assert_async().await;
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_targets_backend_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let result = discover_targets(&client(&server.url()), &SeriesNames::default()).await;

        assert!(matches!(result, Err(ReportError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_current_status_sorted_by_target() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let statuses = current_status(&client(&server.url()), &SeriesNames::default())
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].target, "https://a.example.com");
        assert_eq!(statuses[0].state, TargetState::Up);
        assert_eq!(statuses[1].state, TargetState::Down);
        assert_eq!(statuses[1].labels["job"], "blackbox");
        assert_eq!(statuses[1].last_check.unwrap().timestamp(), 1_750_467_600);
    }

    #[tokio::test]
    async fn test_target_status_unknown_without_samples() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let status = target_status(&client(&server.url()), &SeriesNames::default(), "x")
            .await
            .unwrap();

        assert_eq!(status.state, TargetState::Unknown);
        assert!(status.last_check.is_none());
    }

    #[tokio::test]
    async fn test_response_time_stats() {
        let mut server = mockito::Server::new_async().await;
        for (function, value) in [("avg", "0.25"), ("max", "1.5"), ("min", "0.1")] {
            server
                .mock("GET", "/api/v1/query")
                .match_query(Matcher::UrlEncoded(
                    "query".into(),
                    format!(r#"{function}(probe_duration_seconds{{instance="x"}})"#),
                ))
                .with_status(200)
                .with_body(format!(
                    r#"{{"status":"success","data":{{"resultType":"vector","result":[{{"metric":{{}},"value":[1750467600,"{value}"]}}]}}}}"#
                ))
                .create_async()
                .await;
        }

        let end = Utc::now();
        let stats = response_time_stats(
            &client(&server.url()),
            &SeriesNames::default(),
            "x",
            end - TimeDelta::hours(1),
            end,
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            ResponseTimeStats {
                average: 0.25,
                maximum: 1.5,
                minimum: 0.1
            }
        );
    }

    #[tokio::test]
    async fn test_connection_reports_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/status/config")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"yaml":"global:\n  scrape_interval: 15s\n"}}"#)
            .create_async()
            .await;

        let yaml = test_connection(&client(&server.url())).await.unwrap();
        assert!(yaml.contains("scrape_interval"));

        let unreachable = client("http://127.0.0.1:1");
        assert!(matches!(
            test_connection(&unreachable).await,
            Err(ReportError::BackendUnavailable(_))
        ));
    }
}
