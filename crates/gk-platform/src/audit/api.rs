//! Audit Logs Admin API
//!
//! Read-only view of the audit trail, newest first.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::audit::entity::{AuditAction, AuditLog};
use crate::audit::repository::AuditLogFilter;
use crate::audit::service::AuditService;
use crate::role::entity::Permission;
use crate::shared::api_common::{PaginatedResponse, PaginationParams};
use crate::shared::error::Result;
use crate::shared::middleware::Authenticated;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogsQuery {
    pub action: Option<String>,
    pub entity_id: Option<String>,
    pub principal_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionsResponse {
    pub actions: Vec<String>,
}

#[derive(Clone)]
pub struct AuditLogsState {
    pub audit: AuditService,
}

pub async fn list_audit_logs(
    State(state): State<AuditLogsState>,
    auth: Authenticated,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<Json<PaginatedResponse<AuditLog>>> {
    auth.require(Permission::ViewLogs)?;

    let action = query.action.as_deref().map(str::parse::<AuditAction>).transpose()?;
    let filter = AuditLogFilter {
        action,
        entity_id: query.entity_id,
        principal_id: query.principal_id,
        offset: pagination.offset(),
        limit: pagination.limit(),
    };

    let (logs, total) = state.audit.list(&filter).await?;
    Ok(Json(PaginatedResponse::new(logs, &pagination, total)))
}

/// Action names accepted by the `action` filter
pub async fn list_actions(auth: Authenticated) -> Result<Json<ActionsResponse>> {
    auth.require(Permission::ViewLogs)?;
    Ok(Json(ActionsResponse {
        actions: AuditAction::ALL.iter().map(|a| a.as_str().to_string()).collect(),
    }))
}

pub fn audit_logs_router(state: AuditLogsState) -> Router {
    Router::new()
        .route("/", get(list_audit_logs))
        .route("/actions", get(list_actions))
        .with_state(state)
}
