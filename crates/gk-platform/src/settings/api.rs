//! Settings Admin API
//!
//! - GET /: current runtime settings
//! - PUT /: change maintenance mode and/or self-registration
//!
//! Both require `edit_settings`. The route stays reachable in maintenance
//! mode so an administrator can switch it off again.

use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::audit::service::AuditService;
use crate::role::entity::Permission;
use crate::settings::entity::{RuntimeSettings, SettingsSnapshot};
use crate::shared::error::{PlatformError, Result};
use crate::shared::middleware::Authenticated;

/// Partial update; omitted fields keep their value
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub maintenance_mode: Option<bool>,
    pub allow_registration: Option<bool>,
}

#[derive(Clone)]
pub struct SettingsState {
    pub settings: RuntimeSettings,
    pub audit: AuditService,
}

pub async fn get_settings(State(state): State<SettingsState>, auth: Authenticated) -> Result<Json<SettingsSnapshot>> {
    auth.require(Permission::EditSettings)?;
    Ok(Json(state.settings.snapshot()))
}

pub async fn update_settings(
    State(state): State<SettingsState>,
    auth: Authenticated,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsSnapshot>> {
    auth.require(Permission::EditSettings)?;
    if req.maintenance_mode.is_none() && req.allow_registration.is_none() {
        return Err(PlatformError::validation("No settings to update"));
    }

    let (before, after) = state.settings.apply(req.maintenance_mode, req.allow_registration);

    let mut changes = Map::new();
    if before.maintenance_mode != after.maintenance_mode {
        changes.insert(
            "maintenanceMode".to_string(),
            json!({ "from": before.maintenance_mode, "to": after.maintenance_mode }),
        );
    }
    if before.allow_registration != after.allow_registration {
        changes.insert(
            "allowRegistration".to_string(),
            json!({ "from": before.allow_registration, "to": after.allow_registration }),
        );
    }

    if !changes.is_empty() {
        info!(
            admin_id = %auth.principal_id,
            maintenance_mode = after.maintenance_mode,
            allow_registration = after.allow_registration,
            "Runtime settings updated"
        );
        state
            .audit
            .log_settings_updated(&auth.principal_id, Value::Object(changes))
            .await;
    }

    Ok(Json(after))
}

pub fn settings_router(state: SettingsState) -> Router {
    Router::new()
        .route("/", get(get_settings).put(update_settings))
        .with_state(state)
}
