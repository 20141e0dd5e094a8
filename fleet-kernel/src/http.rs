/**
 * HTTP API - Read access to the fleet and alert acknowledgment
 *
 * ROUTES:
 * - GET  /health                     liveness probe, always open
 * - GET  /system/health              kernel counters (see health.rs)
 * - GET  /nodes                      every node, ordered by name
 * - GET  /nodes/{name}               one node, 404 if unknown
 * - GET  /alerts?acknowledged=false  alerts, newest first
 * - POST /alerts                     manual alert
 * - POST /alerts/{id}/acknowledge    idempotent, 404 if unknown
 *
 * SECURITY: when FLEET_API_KEY is set every route except /health* requires a
 * matching `x-api-key` header. Unset means the API is open.
 */

use crate::alerts::{Alert, AlertError, AlertFilter, AlertSeverity};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{MetricsSample, Node, NodeStatus};
use crate::monitor::FleetMonitor;
use crate::registry::RegistryError;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<FleetMonitor>,
    pub health: HealthTracker,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub name: String,
    pub node_type: String,
    pub address: Option<String>,
    pub status: NodeStatus,
    pub first_seen: String,
    pub last_seen: String,
    pub status_changed_at: String,
    /// Seconds since the last heartbeat.
    pub stale_for_seconds: i64,
    pub metrics: Option<MetricsSample>,
}

fn fmt_time(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

fn to_view(node: Node, now: OffsetDateTime) -> NodeView {
    NodeView {
        stale_for_seconds: (now - node.last_seen).whole_seconds().max(0),
        first_seen: fmt_time(node.first_seen),
        last_seen: fmt_time(node.last_seen),
        status_changed_at: fmt_time(node.status_changed_at),
        name: node.name,
        node_type: node.node_type,
        address: node.address,
        status: node.status,
        metrics: node.metrics,
    }
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError(StatusCode::NOT_FOUND, e.to_string())
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        ApiError(StatusCode::NOT_FOUND, e.to_string())
    }
}

fn key_matches(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => presented == Some(expected),
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let presented = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());
    if !key_matches(app.api_key.as_deref(), presented) {
        warn!(path = %req.uri().path(), "rejected request with missing or wrong API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/nodes", get(get_nodes))
        .route("/nodes/{name}", get(get_node))
        .route("/alerts", get(get_alerts).post(create_alert))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.monitor))
}

// GET /nodes
async fn get_nodes(State(app): State<AppState>) -> Json<Vec<NodeView>> {
    let now = app.monitor.now();
    Json(app.monitor.query_all_nodes().into_iter().map(|n| to_view(n, now)).collect())
}

// GET /nodes/{name}
async fn get_node(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<NodeView>, ApiError> {
    let node = app.monitor.query_node(&name)?;
    Ok(Json(to_view(node, app.monitor.now())))
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub acknowledged: Option<bool>,
}

// GET /alerts
async fn get_alerts(State(app): State<AppState>, Query(q): Query<AlertsQuery>) -> Json<Vec<Alert>> {
    let alerts = match q.acknowledged {
        None => app.monitor.query_alerts(AlertFilter::All),
        Some(false) => app.monitor.query_alerts(AlertFilter::Unacknowledged),
        Some(true) => app
            .monitor
            .query_alerts(AlertFilter::All)
            .into_iter()
            .filter(|a| a.acknowledged)
            .collect(),
    };
    Json(alerts)
}

#[derive(Debug, Deserialize)]
pub struct NewAlert {
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: AlertSeverity,
}

fn default_severity() -> AlertSeverity {
    AlertSeverity::Warning
}

// POST /alerts
async fn create_alert(
    State(app): State<AppState>,
    Json(body): Json<NewAlert>,
) -> Result<(StatusCode, Json<Alert>), ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "message must not be empty".into()));
    }
    let alert = app.monitor.manual_alert(message.to_string(), body.severity);
    Ok((StatusCode::CREATED, Json(alert)))
}

// POST /alerts/{id}/acknowledge
async fn acknowledge_alert(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Alert>, ApiError> {
    Ok(Json(app.monitor.acknowledge_alert(&id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::KernelConfig;
    use std::time::Duration;
    use time::macros::datetime;

    fn app() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 0:00 UTC)));
        let monitor = Arc::new(FleetMonitor::new(&KernelConfig::default(), clock.clone()));
        (AppState { monitor, health: HealthTracker::new(), api_key: None }, clock)
    }

    #[test]
    fn api_key_is_only_enforced_when_configured() {
        assert!(key_matches(None, None));
        assert!(key_matches(None, Some("anything")));
        assert!(key_matches(Some("s3cret"), Some("s3cret")));
        assert!(!key_matches(Some("s3cret"), Some("wrong")));
        assert!(!key_matches(Some("s3cret"), None));
    }

    #[test]
    fn router_builds() {
        let (state, _) = app();
        let _ = build_router(state);
    }

    #[tokio::test]
    async fn node_views_report_staleness() {
        let (state, clock) = app();
        state.monitor.ingest_raw(br#"{"node": "b"}"#, None).unwrap();
        state.monitor.ingest_raw(br#"{"node": "a"}"#, None).unwrap();
        clock.advance(Duration::from_secs(42));

        let Json(nodes) = get_nodes(State(state.clone())).await;
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(nodes[0].stale_for_seconds, 42);
        assert_eq!(nodes[0].last_seen, "2026-01-01T00:00:00Z");

        let Json(one) = get_node(State(state.clone()), Path("a".into())).await.ok().unwrap();
        assert_eq!(one.status, NodeStatus::Online);

        let missing = get_node(State(state), Path("zz".into())).await;
        assert!(matches!(missing, Err(ApiError(code, _)) if code == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn manual_alerts_can_be_created_listed_and_acknowledged() {
        let (state, _) = app();
        let body = NewAlert { message: "  rack 4 door open ".into(), severity: AlertSeverity::Critical };
        let (code, Json(alert)) = create_alert(State(state.clone()), Json(body)).await.ok().unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(alert.message, "rack 4 door open");

        let Json(open) = get_alerts(State(state.clone()), Query(AlertsQuery { acknowledged: Some(false) })).await;
        assert_eq!(open.len(), 1);

        let Json(acked) = acknowledge_alert(State(state.clone()), Path(alert.id.clone())).await.ok().unwrap();
        assert!(acked.acknowledged);
        let Json(again) = acknowledge_alert(State(state.clone()), Path(alert.id.clone())).await.ok().unwrap();
        assert_eq!(again.acknowledged_at, acked.acknowledged_at);

        let Json(open) = get_alerts(State(state.clone()), Query(AlertsQuery { acknowledged: Some(false) })).await;
        assert!(open.is_empty());
        let Json(done) = get_alerts(State(state.clone()), Query(AlertsQuery { acknowledged: Some(true) })).await;
        assert_eq!(done.len(), 1);

        let missing = acknowledge_alert(State(state), Path("nope".into())).await;
        assert!(matches!(missing, Err(ApiError(code, _)) if code == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn blank_manual_alerts_are_rejected() {
        let (state, _) = app();
        let body = NewAlert { message: "   ".into(), severity: AlertSeverity::Info };
        let res = create_alert(State(state.clone()), Json(body)).await;
        assert!(matches!(res, Err(ApiError(code, _)) if code == StatusCode::BAD_REQUEST));
        assert!(state.monitor.query_alerts(AlertFilter::All).is_empty());
    }

    #[tokio::test]
    async fn system_health_counts_nodes() {
        let (state, _) = app();
        state.monitor.ingest_raw(br#"{"node": "a"}"#, None).unwrap();
        let Json(health) = get_system_health(State(state)).await;
        assert_eq!(health.nodes_tracked, 1);
        assert_eq!(health.nodes_online, 1);
    }
}
