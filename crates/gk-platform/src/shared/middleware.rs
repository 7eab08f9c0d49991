//! API Middleware
//!
//! Bearer-token authentication for Axum. [`AuthLayer`] puts the shared
//! [`AppState`] into request extensions; [`Authenticated`] reads it back and
//! validates the `Authorization: Bearer` header.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    response::Response,
};
use tower::{Layer, Service};

use crate::auth::token_authority::TokenAuthority;
use crate::auth::token_service::extract_bearer_token;
use crate::role::entity::Permission;
use crate::shared::authorization_service::AuthContext;
use crate::shared::error::{PlatformError, Result};

/// State shared with every request through extensions
#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<TokenAuthority>,
}

/// Validated caller. Missing, malformed, expired and forged tokens all
/// reject with the same `Unauthorized`.
pub struct Authenticated(pub AuthContext);

impl std::ops::Deref for Authenticated {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Authenticated {
    /// `Forbidden` unless the caller's role grants `permission`
    pub fn require(&self, permission: Permission) -> Result<()> {
        self.0.require(permission)
    }
}

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = PlatformError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let app_state = parts
            .extensions
            .get::<AppState>()
            .ok_or_else(|| PlatformError::internal("Auth layer not configured"))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or(PlatformError::Unauthorized)?;

        let context = app_state.authority.validate(token)?;
        Ok(Authenticated(context))
    }
}

/// Injects [`AppState`] into request extensions
#[derive(Clone)]
pub struct AuthLayer {
    state: AppState,
}

impl AuthLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    state: AppState,
}

impl<S, B> Service<axum::http::Request<B>> for AuthMiddleware<S>
where
    S: Service<axum::http::Request<B>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.state.clone());
        Box::pin(self.inner.call(req))
    }
}
