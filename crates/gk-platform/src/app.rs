//! Platform Router
//!
//! Assembles every platform API under its path prefix and applies the shared
//! request layers. Server-level layers (tracing, CORS, timeouts, request ids)
//! are added by the binary.

use std::sync::Arc;

use axum::{middleware, Router};
use chrono::Utc;

use crate::audit::api::{audit_logs_router, AuditLogsState};
use crate::auth::auth_api::{auth_router, AuthState};
use crate::auth::token_authority::TokenAuthority;
use crate::dashboard::api::{dashboard_router, DashboardState};
use crate::principal::api::{users_router, UsersState};
use crate::role::api::roles_router;
use crate::settings::api::{settings_router, SettingsState};
use crate::settings::entity::RuntimeSettings;
use crate::shared::health_api::{health_router, HealthState};
use crate::shared::http_guard::{maintenance_guard, response_time, security_headers};
use crate::shared::middleware::{AppState, AuthLayer};

/// Inputs for [`platform_router`]
#[derive(Clone)]
pub struct PlatformRouterConfig {
    pub authority: Arc<TokenAuthority>,
    pub health: HealthState,
    /// Maintenance mode and self-registration, changeable at runtime
    pub settings: RuntimeSettings,
}

impl PlatformRouterConfig {
    pub fn new(authority: Arc<TokenAuthority>, health: HealthState) -> Self {
        Self {
            authority,
            health,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }
}

pub fn platform_router(config: PlatformRouterConfig) -> Router {
    let audit = config.authority.audit().clone();
    let auth_state = AuthState::new(config.authority.clone()).with_settings(config.settings.clone());
    let users_state = UsersState {
        authority: config.authority.clone(),
    };
    let audit_logs_state = AuditLogsState { audit: audit.clone() };
    let settings_state = SettingsState {
        settings: config.settings.clone(),
        audit,
    };
    let dashboard_state = DashboardState {
        authority: config.authority.clone(),
        settings: config.settings.clone(),
        started_at: Utc::now(),
    };
    let app_state = AppState {
        authority: config.authority,
    };

    Router::new()
        .nest("/health", health_router(config.health))
        .nest("/api/v1/auth", auth_router(auth_state))
        .nest("/api/v1/roles", roles_router())
        .nest("/api/v1/dashboard", dashboard_router(dashboard_state))
        .nest("/api/v1/admin/users", users_router(users_state))
        .nest("/api/v1/admin/audit-logs", audit_logs_router(audit_logs_state))
        .nest("/api/v1/admin/settings", settings_router(settings_state))
        .layer(AuthLayer::new(app_state))
        .layer(middleware::from_fn_with_state(
            config.settings.maintenance().clone(),
            maintenance_guard,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(response_time))
}
