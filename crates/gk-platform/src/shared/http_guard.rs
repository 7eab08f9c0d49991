//! HTTP Guards
//!
//! Middleware functions for maintenance mode, security response headers and
//! response timing. Installed with `axum::middleware::from_fn`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::shared::error::ErrorResponse;

/// Paths that stay reachable while in maintenance. The settings API is kept
/// open so maintenance can be switched off again.
const MAINTENANCE_ALLOWED_PREFIXES: &[&str] = &["/health", "/api/v1/auth/login", "/api/v1/admin/settings"];

const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// Runtime maintenance switch
#[derive(Clone, Default)]
pub struct MaintenanceMode(Arc<AtomicBool>);

impl MaintenanceMode {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    pub fn allows(&self, path: &str) -> bool {
        !self.is_enabled() || MAINTENANCE_ALLOWED_PREFIXES.iter().any(|p| path.starts_with(p))
    }
}

/// 503 for everything except health, login and settings while maintenance is on
pub async fn maintenance_guard(State(mode): State<MaintenanceMode>, req: Request, next: Next) -> Response {
    if mode.allows(req.uri().path()) {
        return next.run(req).await;
    }

    let body = ErrorResponse {
        error: "MAINTENANCE".to_string(),
        message: "Service under maintenance".to_string(),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

/// Adds `x-response-time` in seconds
pub async fn response_time(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = format!("{:.4}s", start.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response.headers_mut().insert(X_RESPONSE_TIME, value);
    }
    response
}
