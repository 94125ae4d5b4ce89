//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use metric_watch_agent::{
    api::{create_router, AppState},
    scheduler::LastReport,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceExt;
use watch_lib::{
    health::{components, HealthRegistry},
    observability::WatchMetrics,
    pipeline::{MetricOutcome, MetricStatus},
    MetricId, RunReport,
};

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = WatchMetrics::new();
    let last_report: LastReport = Arc::new(RwLock::new(None));
    let state = Arc::new(AppState::new(health_registry, metrics, last_report));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["metric_source"].is_object());
    assert!(health["components"]["notifier"].is_object());
    assert!(health["components"]["scheduler"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failures(components::METRIC_SOURCE, 1, 3)
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failures(components::METRIC_SOURCE, 3, 3)
        .await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"]["metric_source"]["message"],
        "all 3 operations failed"
    );
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_run_latency(0.4);
    state.metrics.inc_evaluated(MetricId::Views, "normal");
    state.metrics.inc_anomalies_detected(MetricId::Likes);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("metric_watch_run_latency_seconds_bucket"));
    assert!(metrics_text.contains("metric_watch_metrics_evaluated_total"));
    assert!(metrics_text.contains("metric_watch_anomalies_detected_total{metric=\"likes\"}"));
}

#[tokio::test]
async fn test_last_run_is_404_before_first_run() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/runs/last").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].is_string());
}

#[tokio::test]
async fn test_last_run_returns_report() {
    let (app, state) = setup_test_app().await;

    let at = Utc.with_ymd_and_hms(2024, 3, 23, 11, 0, 0).unwrap();
    let report = RunReport {
        started_at: at,
        finished_at: at,
        outcomes: vec![
            MetricOutcome {
                metric: MetricId::Views,
                status: MetricStatus::Normal {
                    observed: 12.0,
                    lower: 8.0,
                    upper: 15.0,
                },
            },
            MetricOutcome {
                metric: MetricId::Likes,
                status: MetricStatus::TimedOut,
            },
        ],
    };
    *state.last_report.write().await = Some(report.clone());

    let (status, body) = get(app, "/runs/last").await;

    assert_eq!(status, StatusCode::OK);
    let returned: RunReport = serde_json::from_slice(&body).unwrap();
    assert_eq!(returned, report);
}
