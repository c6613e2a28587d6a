//! Integration tests for the controller API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use k20s_controller::api::{create_router, AppState};
use optimizer_lib::{
    health::{components, HealthRegistry},
    ActionKind, ActionReporter, CycleState, PolicyKind, ProfileKey, PrometheusReporter,
};
use prometheus::Registry;
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, PrometheusReporter) {
    let health_registry = HealthRegistry::with_default_components().await;
    let registry = Registry::new();
    let reporter = PrometheusReporter::new(&registry).unwrap();

    let state = Arc::new(AppState::new(health_registry, registry));
    let router = create_router(state.clone());

    (router, state, reporter)
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
    let (app, _state, _) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["metrics_source"].is_object());
    assert!(health["components"]["workload_store"].is_object());
    assert!(health["components"]["profile_store"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::METRICS_SOURCE, "Prometheus timeouts")
        .await;

    // Degraded still returns 200 (operational)
    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["metrics_source"]["message"], "Prometheus timeouts");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::PROFILE_STORE, "CRD not installed")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state, _) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state, _) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_unhealthy(components::WORKLOAD_STORE, "Forbidden")
        .await;

    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_reporter_metrics() {
    let (app, _state, reporter) = setup_test_app().await;
    let key = ProfileKey::new("shop", "web");

    reporter.observed_value(&key, Some(75.0));
    reporter.cycle_evaluated(&key, PolicyKind::Scale, CycleState::Acted, ActionKind::ScaleUp);

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

    assert!(metrics_text.contains("k20s_observed_cpu_percent{profile=\"shop/web\"} 75"));
    let cycles = r#"k20s_cycles_total{action="ScaleUp",policy="Scale",state="acted"} 1"#;
    assert!(metrics_text.contains(cycles));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _state, _) = setup_test_app().await;
    let (status, _) = get(app, "/apply").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
