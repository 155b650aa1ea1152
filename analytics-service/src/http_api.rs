use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use meter_domain::{AnomalyEvent, ConsumptionInterval, KpiReport};
use serde::Deserialize;
use serde_json::json;

use crate::{
    export::{self, ExportError},
    pipeline::{Pipeline, PipelineError, Source},
    report::{Analysis, ReportQuery},
};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Pipeline(PipelineError::DataUnavailable(msg) | PipelineError::Source(msg)) => {
                tracing::warn!(error = %msg, "no data for request");
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "state": "no_data", "error": self.to_string() }))
            }
            ApiError::Pipeline(PipelineError::Query(e)) => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
            ApiError::Pipeline(PipelineError::Config(e)) => {
                tracing::error!(error = %e, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "configuration error" }))
            }
            ApiError::Export(e) => {
                tracing::error!(error = %e, "export failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "export failed" }))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub struct AppState<S> {
    pub pipeline: Arc<Pipeline<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { pipeline: self.pipeline.clone() }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeParams {
    pub meter: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ScopeParams {
    fn query(&self) -> Result<ReportQuery, PipelineError> {
        Ok(ReportQuery::parse(self.meter.as_deref(), self.from.as_deref(), self.to.as_deref())?)
    }
}

async fn analysis<S: Source>(state: &AppState<S>, params: &ScopeParams) -> Result<Analysis, ApiError> {
    let query = params.query()?;
    Ok(state.pipeline.run(&query).await?)
}

fn csv_response(filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn report<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Json<KpiReport>, ApiError> {
    Ok(Json(analysis(&state, &params).await?.report))
}

async fn report_csv<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Response, ApiError> {
    let a = analysis(&state, &params).await?;
    Ok(csv_response("kpi-report.csv", export::report_csv(&a, &state.pipeline.config().tariff.schedule)?))
}

async fn intervals<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Json<Vec<ConsumptionInterval>>, ApiError> {
    Ok(Json(analysis(&state, &params).await?.intervals))
}

async fn intervals_csv<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Response, ApiError> {
    let a = analysis(&state, &params).await?;
    Ok(csv_response("intervals.csv", export::intervals_csv(&a.intervals)?))
}

async fn events<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Json<Vec<AnomalyEvent>>, ApiError> {
    Ok(Json(analysis(&state, &params).await?.events))
}

async fn events_csv<S: Source + 'static>(
    State(state): State<AppState<S>>,
    Query(params): Query<ScopeParams>,
) -> Result<Response, ApiError> {
    let a = analysis(&state, &params).await?;
    Ok(csv_response("events.csv", export::events_csv(&a.events)?))
}

/// Drop the cached table and recompute from a fresh fetch.
async fn refresh<S: Source + 'static>(State(state): State<AppState<S>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.pipeline.invalidate().await;
    let a = state.pipeline.run(&ReportQuery::default()).await?;
    tracing::info!(snapshot = %a.report.snapshot_id, "refreshed on request");
    Ok(Json(json!({
        "state": "refreshed",
        "snapshot_id": a.report.snapshot_id,
        "total_readings": a.report.total_readings,
    })))
}

pub fn router<S: Source + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/report", get(report::<S>))
        .route("/api/report.csv", get(report_csv::<S>))
        .route("/api/intervals", get(intervals::<S>))
        .route("/api/intervals.csv", get(intervals_csv::<S>))
        .route("/api/events", get(events::<S>))
        .route("/api/events.csv", get(events_csv::<S>))
        .route("/api/refresh", post(refresh::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AnalyticsConfig, sources::RawTable};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticSource(Option<&'static str>);

    #[async_trait::async_trait]
    impl Source for StaticSource {
        fn identity(&self) -> String {
            "test://static".to_string()
        }

        async fn fetch(&self) -> Result<RawTable, PipelineError> {
            match self.0 {
                Some(body) => crate::sources::parse_csv_table(body.as_bytes()),
                None => Err(PipelineError::DataUnavailable("sheet unreachable".to_string())),
            }
        }
    }

    const BODY: &str = "Timestamp,Location,Energy_kWh,kW_Total\n\
        2024-06-10 10:00:00,Shed_01,100,10\n\
        2024-06-10 10:05:00,Shed_01,101,12\n";

    fn app_with(body: Option<&'static str>, cfg: AnalyticsConfig) -> Router {
        let pipeline = Pipeline::new(StaticSource(body), Duration::from_secs(15), cfg).unwrap();
        router(AppState { pipeline: Arc::new(pipeline) })
    }

    fn app(body: Option<&'static str>) -> Router {
        app_with(body, AnalyticsConfig::default())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn report_json() {
        let (status, body) = get_json(app(Some(BODY)), "/api/report?meter=Shed_01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["energy"]["total_kwh"], 1.0);
        assert_eq!(body["scope"]["meter"], "Shed_01");
        assert_eq!(body["savings"]["label"], "Conservative estimate, not a guarantee");
    }

    #[tokio::test]
    async fn unavailable_source_is_no_data_503() {
        let (status, body) = get_json(app(None), "/api/report").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["state"], "no_data");
        assert!(body["error"].as_str().unwrap().contains("sheet unreachable"));
    }

    #[tokio::test]
    async fn bad_query_is_400() {
        let (status, _) = get_json(app(Some(BODY)), "/api/events?from=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(app(Some(BODY)), "/api/intervals?meter=Nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Nope"));
    }

    #[tokio::test]
    async fn report_csv_is_an_attachment() {
        let resp = app(Some(BODY))
            .oneshot(Request::get("/api/report.csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(bytes.to_vec()).unwrap().starts_with("Period\n"));
    }

    #[tokio::test]
    async fn report_csv_labels_hours_from_the_configured_tariff() {
        let mut cfg = AnalyticsConfig::default();
        cfg.tariff.schedule.peak_start = 18;
        cfg.tariff.schedule.peak_end = 22;
        let resp = app_with(Some(BODY), cfg)
            .oneshot(Request::get("/api/report.csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let out = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(out.contains("PEAK,18:00-22:00,"));
    }

    #[tokio::test]
    async fn report_json_carries_the_tod_planner() {
        let (status, body) = get_json(app(Some(BODY)), "/api/report").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tod_planner"]["latest_week"]["label"], "2024-W24");
        assert_eq!(body["tod_planner"]["latest_week"]["already_optimal"], false);
        assert_eq!(body["demand"]["load_distribution"][0]["share_pct"], 100.0);
    }

    #[tokio::test]
    async fn refresh_and_health() {
        let resp = app(Some(BODY))
            .oneshot(Request::post("/api/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, body) = get_json(app(None), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
