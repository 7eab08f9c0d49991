//! Dashboard API
//!
//! - GET /stats: principal headcounts (`view_dashboard`)
//! - GET /system: uptime and backend reachability (`edit_settings`)

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::token_authority::TokenAuthority;
use crate::role::entity::Permission;
use crate::settings::entity::RuntimeSettings;
use crate::shared::error::Result;
use crate::shared::health_api::HealthStatus;
use crate::shared::middleware::Authenticated;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub active_users: u64,
    /// Created since midnight UTC
    pub new_users_today: u64,
    pub admin_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub server_time: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub database_status: HealthStatus,
    pub registry_status: HealthStatus,
    pub registry_backend: String,
    pub maintenance_mode: bool,
}

#[derive(Clone)]
pub struct DashboardState {
    pub authority: Arc<TokenAuthority>,
    pub settings: RuntimeSettings,
    pub started_at: DateTime<Utc>,
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn status<T>(result: &Result<T>) -> HealthStatus {
    if result.is_ok() {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    }
}

pub async fn get_stats(State(state): State<DashboardState>, auth: Authenticated) -> Result<Json<DashboardStats>> {
    auth.require(Permission::ViewDashboard)?;

    let stats = state.authority.principal_stats(start_of_day(Utc::now())).await?;
    Ok(Json(DashboardStats {
        total_users: stats.total,
        active_users: stats.active,
        new_users_today: stats.created_since,
        admin_count: stats.admins,
    }))
}

/// Backend failures are reported as `DOWN`, not as an error response
pub async fn get_system(State(state): State<DashboardState>, auth: Authenticated) -> Result<Json<SystemInfo>> {
    auth.require(Permission::EditSettings)?;

    let (database, registry) = state.authority.ping_backends().await;
    let now = Utc::now();
    Ok(Json(SystemInfo {
        server_time: now,
        uptime_seconds: (now - state.started_at).num_seconds().max(0) as u64,
        database_status: status(&database),
        registry_status: status(&registry),
        registry_backend: state.authority.store().backend_name().to_string(),
        maintenance_mode: state.settings.maintenance().is_enabled(),
    }))
}

pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/system", get(get_system))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day() {
        let now = DateTime::parse_from_rfc3339("2026-03-14T15:09:26Z").unwrap().with_timezone(&Utc);
        assert_eq!(start_of_day(now).to_rfc3339(), "2026-03-14T00:00:00+00:00");
    }

    #[test]
    fn test_stats_field_names() {
        let json = serde_json::to_value(DashboardStats {
            total_users: 3,
            active_users: 2,
            new_users_today: 1,
            admin_count: 1,
        })
        .unwrap();
        assert_eq!(json["newUsersToday"], 1);
        assert_eq!(json["adminCount"], 1);
    }
}
