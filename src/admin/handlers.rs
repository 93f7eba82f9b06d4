use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigUpdate, GuardConfig};
use crate::error::GuardError;
use crate::guard::{ExecutionGuard, GuardStats, HealthReport, ResetTarget};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub in_flight: usize,
    pub cached: usize,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub component: ResetTarget,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub reset: ResetTarget,
}

/// JSON error body.
#[derive(Debug)]
pub struct AdminError {
    status: StatusCode,
    message: String,
    details: Vec<String>,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AdminError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "invalid request body".to_string(),
            details: vec![rejection.body_text()],
        }
    }
}

impl From<GuardError> for AdminError {
    fn from(err: GuardError) -> Self {
        let details = match &err {
            GuardError::Configuration(errors) => errors.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        };
        Self {
            status: StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
            details,
        }
    }
}

pub async fn get_status(State(guard): State<ExecutionGuard>) -> Json<SystemStatus> {
    let stats = guard.get_stats();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        in_flight: stats.in_flight,
        cached: stats.deduplication.cached_request_count,
    })
}

pub async fn get_stats(State(guard): State<ExecutionGuard>) -> Json<GuardStats> {
    Json(guard.get_stats())
}

pub async fn get_health(State(guard): State<ExecutionGuard>) -> Json<HealthReport> {
    Json(guard.health())
}

pub async fn get_config(State(guard): State<ExecutionGuard>) -> Json<GuardConfig> {
    Json(guard.config().as_ref().clone())
}

pub async fn patch_config(
    State(guard): State<ExecutionGuard>,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<GuardConfig>, AdminError> {
    let Json(update) = body?;
    guard.update_config(update)?;
    Ok(Json(guard.config().as_ref().clone()))
}

pub async fn post_reset(
    State(guard): State<ExecutionGuard>,
    body: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, AdminError> {
    let Json(request) = body?;
    guard.reset(request.component);
    tracing::info!(component = ?request.component, "Admin reset");
    Ok(Json(ResetResponse {
        reset: request.component,
    }))
}
