//! Auth API Endpoints
//!
//! - POST /register: self-service sign-up (Viewer role)
//! - POST /login: password login, returns a token pair
//! - POST /refresh: rotate a refresh token
//! - POST /logout: revoke a refresh token
//! - POST /logout-all: revoke every refresh token of the caller (204)
//! - GET /me: caller profile and resolved permissions
//! - GET /permissions/{action}: whether the caller's role permits `action`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::token_authority::{ClientInfo, NewPrincipal, TokenAuthority, TokenPair};
use crate::principal::api::PrincipalResponse;
use crate::role::entity::Role;
use crate::settings::entity::RuntimeSettings;
use crate::shared::error::{PlatformError, Result};
use crate::shared::middleware::Authenticated;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Username or email
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub principal: PrincipalResponse,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionCheckResponse {
    pub action: String,
    pub allowed: bool,
}

#[derive(Clone)]
pub struct AuthState {
    pub authority: Arc<TokenAuthority>,
    /// Read on every registration, so admin changes apply immediately
    pub settings: RuntimeSettings,
}

impl AuthState {
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self {
            authority,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl ClientInfo {
    /// Client address from `x-forwarded-for` (first hop) or `x-real-ip`, plus user agent
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| header("x-real-ip"));

        Self {
            ip,
            user_agent: header("user-agent"),
        }
    }
}

pub async fn register(
    State(state): State<AuthState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    if !state.settings.registration_allowed() {
        return Err(PlatformError::forbidden("Self-registration is disabled"));
    }

    let principal = state
        .authority
        .create_principal(
            NewPrincipal {
                username: req.username,
                email: req.email,
                password: req.password,
                full_name: req.full_name,
                role: Role::Viewer,
            },
            None,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(PrincipalResponse::from(&principal))))
}

pub async fn login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPair>> {
    let client = ClientInfo::from_headers(&headers);
    let (_, pair) = state.authority.login(&req.username, &req.password, &client).await?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    let client = ClientInfo::from_headers(&headers);
    let pair = state.authority.refresh(&req.refresh_token, &client).await?;
    Ok(Json(pair))
}

/// Always 204, whether or not the token was live
pub async fn logout(State(state): State<AuthState>, Json(req): Json<RefreshRequest>) -> Result<StatusCode> {
    state.authority.revoke(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(State(state): State<AuthState>, auth: Authenticated) -> Result<StatusCode> {
    state
        .authority
        .revoke_all(&auth.principal_id, &auth.principal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Profile from the principal store; permissions from the role in the token
pub async fn me(State(state): State<AuthState>, auth: Authenticated) -> Result<Json<MeResponse>> {
    let principal = state
        .authority
        .get_principal(&auth.principal_id)
        .await
        .map_err(|e| match e {
            PlatformError::NotFound { .. } => PlatformError::Unauthorized,
            other => other,
        })?;

    Ok(Json(MeResponse {
        principal: PrincipalResponse::from(&principal),
        permissions: auth.permissions().iter().map(|p| p.as_str().to_string()).collect(),
    }))
}

/// Answers for any action name; unknown names are simply not allowed
pub async fn check_permission(
    State(state): State<AuthState>,
    auth: Authenticated,
    Path(action): Path<String>,
) -> Json<PermissionCheckResponse> {
    let allowed = state.authority.authorize(&auth.0, &action);
    Json(PermissionCheckResponse { action, allowed })
}

pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route("/permissions/{action}", get(check_permission))
        .with_state(state)
}
