/// Health check endpoints for liveness and readiness probes
///
/// Provides detailed health status including:
/// - Operation journal connectivity
/// - Publication scheduler backlog
///
/// Supports two types of probes:
/// - Liveness: Is the application alive? (restart if not)
/// - Readiness: Can the application serve traffic? (remove from load balancer if not)

use crate::{context::AppContext, jobs, metrics, store::OperationStatus};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    /// Application version
    pub version: String,

    /// Uptime in seconds
    pub uptime_seconds: f64,

    /// Individual component checks
    pub checks: Vec<ComponentHealth>,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health status of individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    /// Response time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Optional error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/ready", get(readiness_probe))
        .route("/health/detailed", get(health_detailed))
}

/// Basic health check
pub async fn health_basic(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": ctx.config.service.version
    }))
}

/// Readiness probe
///
/// Returns 503 while the operation journal is unreachable.
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = jobs::tasks::health_check(&ctx).await {
        tracing::warn!(error = %e, "readiness_probe_failed: journal check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": ctx.config.service.version
    })))
}

/// Detailed health check with all component statuses
pub async fn health_detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let start = Instant::now();
    let checks = vec![check_journal_detailed(&ctx).await, check_scheduler_detailed(&ctx)];

    let overall_status = determine_overall_status(&checks);

    metrics::UPTIME_SECONDS.set(ctx.started_at.elapsed().as_secs_f64());
    let uptime = metrics::UPTIME_SECONDS.get();

    let health = HealthStatus {
        status: overall_status.clone(),
        version: ctx.config.service.version.clone(),
        uptime_seconds: uptime,
        checks,
        message: if overall_status == "healthy" {
            None
        } else {
            Some("One or more components are unhealthy".to_string())
        },
    };

    let status_code = match overall_status.as_str() {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    tracing::info!(
        status = %overall_status,
        duration_ms = start.elapsed().as_millis(),
        "health_check_completed"
    );

    (status_code, Json(health))
}

/// Check the operation journal with detailed metrics
async fn check_journal_detailed(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();

    match jobs::tasks::health_check(ctx).await {
        Ok(_) => ComponentHealth {
            name: "operation_journal".to_string(),
            status: "healthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
            details: Some(serde_json::json!({
                "type": if ctx.registrar.store().is_durable() { "sqlite" } else { "memory" },
                "pool_size": ctx.journal_db.as_ref().map(|db| db.size()).unwrap_or(0),
            })),
        },
        Err(e) => ComponentHealth {
            name: "operation_journal".to_string(),
            status: "unhealthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: Some(e.to_string()),
            details: None,
        },
    }
}

/// Scheduler backlog; halted identifiers degrade the service
fn check_scheduler_detailed(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let store = ctx.registrar.store();

    let in_flight = ctx
        .registrar
        .scheduler()
        .list()
        .iter()
        .filter(|op| op.status == OperationStatus::Pending)
        .count();
    let halted: Vec<String> = store
        .identifiers()
        .into_iter()
        .filter(|did| store.halted(did).is_some())
        .collect();

    ComponentHealth {
        name: "publication_scheduler".to_string(),
        status: if halted.is_empty() { "healthy" } else { "degraded" }.to_string(),
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        error: if halted.is_empty() {
            None
        } else {
            Some(format!("{} identifier(s) halted", halted.len()))
        },
        details: Some(serde_json::json!({
            "in_flight": in_flight,
            "halted": halted,
        })),
    }
}

/// Determine overall health status from individual checks
fn determine_overall_status(checks: &[ComponentHealth]) -> String {
    let unhealthy_count = checks.iter().filter(|c| c.status == "unhealthy").count();
    let degraded_count = checks.iter().filter(|c| c.status == "degraded").count();

    if unhealthy_count > 0 {
        "unhealthy".to_string()
    } else if degraded_count > 0 {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
