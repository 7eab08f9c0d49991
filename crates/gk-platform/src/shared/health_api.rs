//! Health Check Endpoints
//!
//! - /health: combined status with per-dependency checks
//! - /health/live: liveness
//! - /health/ready: readiness, pings the refresh token registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::refresh_token_store::RefreshTokenStore;

const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
    /// Functional but not fully ready
    Degraded,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub uptime_secs: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn RefreshTokenStore>,
    pub version: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set once start-up has finished
    pub ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(store: Arc<dyn RefreshTokenStore>, version: Option<String>) -> Self {
        Self {
            store,
            version,
            started_at: Utc::now(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn check_registry(&self) -> HealthCheck {
        let start = Instant::now();
        let name = format!("refresh-registry:{}", self.store.backend_name());

        let (status, message) = match tokio::time::timeout(CHECK_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => (HealthStatus::Up, None),
            Ok(Err(e)) => (HealthStatus::Down, Some(format!("Ping failed: {}", e))),
            Err(_) => (HealthStatus::Down, Some("Ping timed out".to_string())),
        };

        HealthCheck {
            name,
            status,
            message,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        }
    }
}

fn status_code(status: HealthStatus) -> StatusCode {
    if status == HealthStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

pub async fn get_health(State(state): State<HealthState>) -> Response {
    let check = state.check_registry().await;

    let status = match (check.status, state.is_ready()) {
        (HealthStatus::Down, _) => HealthStatus::Down,
        (_, false) => HealthStatus::Degraded,
        (status, true) => status,
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        version: state.version.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        checks: vec![check],
    };
    (status_code(status), Json(response)).into_response()
}

pub async fn get_liveness() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse { status: HealthStatus::Up })
}

pub async fn get_readiness(State(state): State<HealthState>) -> Response {
    let status = if state.is_ready() && state.check_registry().await.status == HealthStatus::Up {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    };
    (status_code(status), Json(SimpleHealthResponse { status })).into_response()
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(get_health))
        .route("/live", get(get_liveness))
        .route("/ready", get(get_readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Up).unwrap(), "\"UP\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"DEGRADED\"");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(HealthStatus::Up), StatusCode::OK);
        assert_eq!(status_code(HealthStatus::Degraded), StatusCode::OK);
        assert_eq!(status_code(HealthStatus::Down), StatusCode::SERVICE_UNAVAILABLE);
    }
}
