//! JSON API consumed by the dashboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::aggregator::{DowntimeFilter, KindFilter};
use crate::domain::resolve_groups;
use crate::error::ReportError;
use crate::generation::GenerationRegistry;
use crate::report::{FetchOptions, ReportService};
use crate::settings::GroupConfig;
use crate::status;
use crate::time_range::{RangePreset, TimeRange};

/// Longest accepted `session` parameter.
const MAX_SESSION_LEN: usize = 128;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReportService>,
    pub groups: Arc<Vec<GroupConfig>>,
    sessions: Arc<GenerationRegistry>,
}

impl AppState {
    pub fn new(service: ReportService, groups: Vec<GroupConfig>) -> Self {
        Self {
            service: Arc::new(service),
            groups: Arc::new(groups),
            sessions: Arc::new(GenerationRegistry::default()),
        }
    }

    pub fn sessions(&self) -> &GenerationRegistry {
        &self.sessions
    }
}

#[derive(Serialize)]
struct ApiError {
    message: String,
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReportError::InvalidRange { .. }
            | ReportError::DegenerateRange
            | ReportError::Config(_) => StatusCode::BAD_REQUEST,
            ReportError::Superseded { .. } => StatusCode::CONFLICT,
            ReportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ReportError::ChunkFetch { .. }
            | ReportError::BackendUnavailable(_)
            | ReportError::Prometheus(_) => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!("request failed with {status}: {self}");
        (
            status,
            Json(ApiError {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// `start`/`end` in RFC 3339, or a `range` preset. Defaults to the last 24h.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub range: Option<String>,
    pub session: Option<String>,
    pub min_duration_minutes: Option<i64>,
    pub kind: Option<String>,
    pub targets: Option<String>,
}

impl RangeParams {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeRange, ReportError> {
        if let Some(value) = &self.range {
            let preset = RangePreset::parse(value)
                .ok_or_else(|| ReportError::Config(format!("unknown range preset {value:?}")))?;
            return preset.resolve(now);
        }
        let end = self.end.unwrap_or(now);
        let start = self.start.unwrap_or(end - TimeDelta::hours(24));
        TimeRange::new(start, end)
    }

    pub fn filter(&self) -> Result<DowntimeFilter, ReportError> {
        let kind = match &self.kind {
            Some(value) => KindFilter::parse(value)
                .ok_or_else(|| ReportError::Config(format!("unknown downtime kind {value:?}")))?,
            None => KindFilter::All,
        };
        Ok(DowntimeFilter {
            min_duration: self.min_duration_minutes.map(TimeDelta::minutes),
            kind,
            ..Default::default()
        })
    }

    fn target_list(&self) -> Vec<String> {
        self.targets
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Ties the request to its session's view, one view per endpoint, so
    /// only a newer request for the same view supersedes it.
    fn options(&self, state: &AppState, view: &str) -> Result<FetchOptions<'static>, ReportError> {
        match &self.session {
            Some(session) if session.len() > MAX_SESSION_LEN => Err(ReportError::Config(format!(
                "session must be at most {MAX_SESSION_LEN} bytes"
            ))),
            Some(session) => Ok(FetchOptions::default()
                .with_ticket(state.sessions().begin(&format!("{session}/{view}")))),
            None => Ok(FetchOptions::default()),
        }
    }
}

#[derive(Serialize)]
struct UptimeResponse {
    target: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    uptime_percent: f64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/connection", get(connection))
        .route("/api/targets", get(targets))
        .route("/api/status", get(current_status))
        .route("/api/targets/:target/status", get(target_status))
        .route("/api/targets/:target/downtime", get(target_downtime))
        .route("/api/targets/:target/summary", get(target_summary))
        .route("/api/targets/:target/uptime", get(target_uptime))
        .route("/api/targets/:target/response-times", get(target_response_times))
        .route("/api/groups", get(groups))
        .route("/api/groups/:name/downtime", get(group_downtime))
        .route("/api/groups/:name/summary", get(group_summary))
        .route("/api/charts/uptime", get(uptime_chart))
        .route("/api/charts/response-time", get(response_time_chart))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .fallback(unhandled)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Fallback for unmatched routes.
async fn unhandled() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            message: "Resource not found".to_string(),
        }),
    )
}

async fn connection(State(state): State<AppState>) -> Result<impl IntoResponse, ReportError> {
    let yaml = status::test_connection(state.service.client()).await?;
    Ok(Json(serde_json::json!({ "connected": true, "config": yaml })))
}

async fn targets(State(state): State<AppState>) -> Result<impl IntoResponse, ReportError> {
    let targets = status::discover_targets(state.service.client(), state.service.names()).await?;
    Ok(Json(targets))
}

async fn current_status(State(state): State<AppState>) -> Result<impl IntoResponse, ReportError> {
    let statuses = status::current_status(state.service.client(), state.service.names()).await?;
    Ok(Json(statuses))
}

async fn target_status(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<impl IntoResponse, ReportError> {
    let status =
        status::target_status(state.service.client(), state.service.names(), &target).await?;
    Ok(Json(status))
}

pub async fn target_downtime(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let options = params.options(&state, &format!("target/{target}/downtime"))?;
    let intervals = state
        .service
        .downtime_periods(&target, range.start, range.end, options)
        .await?;
    Ok(Json(intervals))
}

pub async fn target_summary(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let filter = params.filter()?;
    let options = params.options(&state, &format!("target/{target}/summary"))?;
    let summary = state
        .service
        .summarize(&target, range.start, range.end, &filter, options)
        .await?;
    Ok(Json(summary))
}

async fn target_uptime(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let uptime_percent = state
        .service
        .uptime_percentage(&target, range.start, range.end)
        .await?;
    Ok(Json(UptimeResponse {
        target,
        start: range.start,
        end: range.end,
        uptime_percent,
    }))
}

async fn target_response_times(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let stats = status::response_time_stats(
        state.service.client(),
        state.service.names(),
        &target,
        range.start,
        range.end,
    )
    .await?;
    Ok(Json(stats))
}

async fn resolved_groups(state: &AppState) -> Result<BTreeMap<String, Vec<String>>, ReportError> {
    let targets = status::discover_targets(state.service.client(), state.service.names()).await?;
    Ok(resolve_groups(&targets, &state.groups))
}

/// Members of a configured group, or of a root-domain group.
async fn group_members(state: &AppState, name: &str) -> Result<Vec<String>, ReportError> {
    if let Some(group) = state.groups.iter().find(|g| g.name == name) {
        return Ok(group.targets.clone());
    }
    resolved_groups(state)
        .await?
        .remove(name)
        .ok_or_else(|| ReportError::Config(format!("unknown group {name:?}")))
}

async fn groups(State(state): State<AppState>) -> Result<impl IntoResponse, ReportError> {
    Ok(Json(resolved_groups(&state).await?))
}

pub async fn group_downtime(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let members = group_members(&state, &name).await?;
    let options = params.options(&state, &format!("group/{name}/downtime"))?;
    let report = state
        .service
        .group_downtime_periods(&members, range.start, range.end, options)
        .await?;
    Ok(Json(report))
}

pub async fn group_summary(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let filter = params.filter()?;
    let members = group_members(&state, &name).await?;
    let options = params.options(&state, &format!("group/{name}/summary"))?;
    let summary = state
        .service
        .summarize_group(&members, range.start, range.end, &filter, options)
        .await?;
    Ok(Json(summary))
}

async fn uptime_chart(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let points = state
        .service
        .uptime_series(&params.target_list(), range.start, range.end, None)
        .await?;
    Ok(Json(points))
}

async fn response_time_chart(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ReportError> {
    let range = params.resolve(Utc::now())?;
    let points = state
        .service
        .response_time_series(&params.target_list(), range.start, range.end, None)
        .await?;
    Ok(Json(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_params_default_to_last_day() {
        let now = Utc.with_ymd_and_hms(2025, 6, 22, 12, 0, 0).unwrap();
        let range = RangeParams::default().resolve(now).unwrap();
        assert_eq!(range.end, now);
        assert_eq!(range.duration(), TimeDelta::hours(24));
    }

    #[test]
    fn test_range_params_preset_and_errors() {
        let now = Utc.with_ymd_and_hms(2025, 6, 22, 12, 0, 0).unwrap();

        let params = RangeParams {
            range: Some("7d".to_string()),
            ..Default::default()
        };
        assert_eq!(params.resolve(now).unwrap().duration(), TimeDelta::days(7));

        let params = RangeParams {
            range: Some("forever".to_string()),
            ..Default::default()
        };
        assert!(matches!(params.resolve(now), Err(ReportError::Config(_))));

        let params = RangeParams {
            start: Some(now),
            end: Some(now - TimeDelta::hours(1)),
            ..Default::default()
        };
        assert!(matches!(params.resolve(now), Err(ReportError::InvalidRange { .. })));
    }

    #[test]
    fn test_range_params_filter_and_targets() {
        let params = RangeParams {
            min_duration_minutes: Some(2),
            kind: Some("unplanned".to_string()),
            targets: Some(" a.example.com, ,b.example.com".to_string()),
            ..Default::default()
        };

        let filter = params.filter().unwrap();
        assert_eq!(filter.min_duration, Some(TimeDelta::minutes(2)));
        assert_eq!(filter.kind, KindFilter::Unplanned);
        assert_eq!(params.target_list(), vec!["a.example.com", "b.example.com"]);

        let bad = RangeParams {
            kind: Some("sometimes".to_string()),
            ..Default::default()
        };
        assert!(bad.filter().is_err());
    }

    fn state() -> AppState {
        let client = crate::prometheus_client::PrometheusClient::new(
            "http://127.0.0.1:1",
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        let service = ReportService::new(
            client,
            crate::query::SeriesNames::default(),
            crate::fetcher::FetchConfig::default(),
            crate::chunker::DayBoundary::Local,
            None,
        );
        AppState::new(service, vec![])
    }

    #[test]
    fn test_session_views_are_per_endpoint() {
        let state = state();
        let params = RangeParams {
            session: Some("tab1".to_string()),
            ..Default::default()
        };

        let downtime = params.options(&state, "target/a/downtime").unwrap();
        let summary = params.options(&state, "target/a/summary").unwrap();
        let newer = params.options(&state, "target/a/downtime").unwrap();

        assert!(downtime.ticket.unwrap().ensure_current().is_err());
        assert!(summary.ticket.unwrap().is_current());
        assert!(newer.ticket.unwrap().is_current());
        assert_eq!(state.sessions().len(), 2);
    }

    #[test]
    fn test_session_length_is_bounded() {
        let state = state();
        let params = RangeParams {
            session: Some("x".repeat(MAX_SESSION_LEN + 1)),
            ..Default::default()
        };

        assert!(matches!(
            params.options(&state, "group/g/downtime"),
            Err(ReportError::Config(_))
        ));
        assert!(state.sessions().is_empty());

        let without_session = RangeParams::default().options(&state, "group/g/downtime").unwrap();
        assert!(without_session.ticket.is_none());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ReportError::DegenerateRange, StatusCode::BAD_REQUEST),
            (
                ReportError::Superseded {
                    generation: 1,
                    current: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                ReportError::Timeout(std::time::Duration::from_secs(5)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ReportError::BackendUnavailable("down".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
